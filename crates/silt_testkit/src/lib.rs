//! # Silt Testkit
//!
//! Test utilities for Silt.
//!
//! This crate provides:
//! - Store fixtures over memory and file sources
//! - A crash-injecting source for durability tests
//! - A gated source that parks compaction swaps for interleaving tests
//! - Property-based key and value generators using proptest
//! - Concurrency stress harnesses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use silt_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     with_memory_store(|fixture| {
//!         // ... operations against fixture.store
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod gate;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::gate::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use crash::*;
pub use fixtures::*;
pub use gate::*;
pub use generators::*;
pub use stress::*;
