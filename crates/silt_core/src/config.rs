//! Store configuration.

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Values the per-dictionary read cache holds before it empties itself.
    pub cache_capacity: usize,

    /// Whether to flush the data and log streams on every commit.
    ///
    /// Disabling trades durability of the most recent commits for commit
    /// latency; recovery still discards any torn tail.
    pub sync_on_commit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_capacity: 1024,
            sync_on_commit: true,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the read cache capacity. Zero disables caching.
    #[must_use]
    pub const fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Sets whether to flush streams on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.cache_capacity, 1024);
        assert!(config.sync_on_commit);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new().cache_capacity(16).sync_on_commit(false);
        assert_eq!(config.cache_capacity, 16);
        assert!(!config.sync_on_commit);
    }
}
