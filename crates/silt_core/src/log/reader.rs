//! Sequential record reading for crash recovery.

use silt_storage::PersistentSource;

use crate::error::{CoreError, CoreResult};
use crate::log::record::{
    compute_crc32, decode_payload, Command, HEADER_SIZE, LOG_MAGIC, LOG_VERSION, TRAILER_SIZE,
};

/// Outcome of attempting to read one record from the log.
#[derive(Debug)]
pub enum BatchReadOutcome {
    /// A whole record validated and decoded.
    Batch {
        /// The commands the record carried, in commit order.
        commands: Vec<Command>,
        /// Offset of the byte just past this record.
        next_offset: u64,
    },
    /// The offset sits at or past the end of the log.
    EndOfLog,
    /// The bytes at the offset do not form a complete checksummed record.
    /// Recovery truncates the log here.
    Torn,
}

/// Reads the record starting at `offset`.
///
/// A record is accepted only when every byte of it is present and its CRC
/// matches. Anything short of that is a torn tail, which is an expected
/// crash artifact. Once the CRC has vouched for the bytes, any remaining
/// mismatch (wrong magic, unsupported version, undecodable payload) means
/// the log was damaged some other way and surfaces as a fatal error.
///
/// # Errors
///
/// Returns an error if the underlying reads fail or if a checksummed
/// record cannot be decoded.
pub fn read_batch(source: &dyn PersistentSource, offset: u64) -> CoreResult<BatchReadOutcome> {
    let log_len = source.log_len()?;
    if offset >= log_len {
        return Ok(BatchReadOutcome::EndOfLog);
    }

    let remaining = (log_len - offset) as usize;
    if remaining < HEADER_SIZE + TRAILER_SIZE {
        return Ok(BatchReadOutcome::Torn);
    }

    let header = source.log_read(offset, HEADER_SIZE)?;
    let payload_len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]) as usize;
    let total = HEADER_SIZE + payload_len + TRAILER_SIZE;
    if remaining < total {
        return Ok(BatchReadOutcome::Torn);
    }

    let record = source.log_read(offset, total)?;
    let body = &record[..total - TRAILER_SIZE];
    let stored_crc = u32::from_le_bytes([
        record[total - 4],
        record[total - 3],
        record[total - 2],
        record[total - 1],
    ]);
    if compute_crc32(body) != stored_crc {
        return Ok(BatchReadOutcome::Torn);
    }

    if record[0..4] != LOG_MAGIC {
        return Err(CoreError::log_corruption("bad record magic"));
    }
    let version = u16::from_le_bytes([record[4], record[5]]);
    if version != LOG_VERSION {
        return Err(CoreError::log_corruption(format!(
            "unsupported log version {version}"
        )));
    }

    let commands = decode_payload(&record[HEADER_SIZE..total - TRAILER_SIZE])?;
    Ok(BatchReadOutcome::Batch {
        commands,
        next_offset: offset + total as u64,
    })
}
