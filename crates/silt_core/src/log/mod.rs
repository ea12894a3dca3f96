//! The append-only commit log.
//!
//! Every commit appends exactly one framed, checksummed record describing
//! the batch. On startup the log is replayed from the front; the first
//! incomplete or checksum-failing record marks the torn tail left by a
//! crash, and the log is truncated there.

mod reader;
mod record;

pub use reader::{read_batch, BatchReadOutcome};
pub use record::{
    compute_crc32, decode_payload, encode_batch, Command, HEADER_SIZE, LOG_MAGIC, LOG_VERSION,
    TRAILER_SIZE,
};
