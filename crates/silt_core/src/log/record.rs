//! Commit record wire format.
//!
//! One record holds one committed batch:
//!
//! ```text
//! ┌───────┬─────────┬─────────────┬─────────┬───────┐
//! │ magic │ version │ payload len │ payload │ CRC32 │
//! │ 4B    │ 2B LE   │ 4B LE       │ ...     │ 4B LE │
//! └───────┴─────────┴─────────────┴─────────┴───────┘
//! ```
//!
//! The CRC covers the header and payload. The payload is a command count
//! followed by that many commands; each command carries its kind, dictionary
//! id, and key, and a put additionally carries the data-stream offset and
//! byte length of its value. All integers are little-endian.

use std::sync::Arc;

use chrono::DateTime;

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::types::DictionaryId;

/// Magic bytes identifying a commit record.
pub const LOG_MAGIC: [u8; 4] = *b"SLOG";

/// Current record format version.
pub const LOG_VERSION: u16 = 1;

/// Record header size: magic + version + payload length.
pub const HEADER_SIZE: usize = 4 + 2 + 4;

/// Record trailer size: the CRC32.
pub const TRAILER_SIZE: usize = 4;

const COMMAND_PUT: u8 = 1;
const COMMAND_DELETE: u8 = 2;

/// Nesting limit when decoding keys, so corrupted-but-checksummed input
/// cannot blow the stack.
const MAX_KEY_DEPTH: u32 = 128;

/// A single staged or replayed operation.
///
/// Keys are shared: the same `Arc` travels from staging through the log
/// encoder and into the committed index.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Upsert of `key` to the value stored at `offset..offset + len` in the
    /// data stream.
    Put {
        /// Owning dictionary.
        dictionary: DictionaryId,
        /// The key being written.
        key: Arc<Key>,
        /// Offset of the value bytes in the data stream.
        offset: u64,
        /// Length of the value in bytes.
        len: u32,
    },
    /// Removal of `key` from the committed index.
    Delete {
        /// Owning dictionary.
        dictionary: DictionaryId,
        /// The key being removed.
        key: Arc<Key>,
    },
}

impl Command {
    /// Returns the dictionary this command applies to.
    #[must_use]
    pub fn dictionary(&self) -> DictionaryId {
        match self {
            Command::Put { dictionary, .. } | Command::Delete { dictionary, .. } => *dictionary,
        }
    }

    /// Returns the key this command touches.
    #[must_use]
    pub fn key(&self) -> &Arc<Key> {
        match self {
            Command::Put { key, .. } | Command::Delete { key, .. } => key,
        }
    }
}

/// Encodes a batch of commands as one framed record.
#[must_use]
pub fn encode_batch(commands: &[Command]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + commands.len() * 32);
    payload.extend_from_slice(&(commands.len() as u32).to_le_bytes());
    for command in commands {
        encode_command(&mut payload, command);
    }

    let mut record = Vec::with_capacity(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    record.extend_from_slice(&LOG_MAGIC);
    record.extend_from_slice(&LOG_VERSION.to_le_bytes());
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(&payload);
    let crc = compute_crc32(&record);
    record.extend_from_slice(&crc.to_le_bytes());
    record
}

fn encode_command(buf: &mut Vec<u8>, command: &Command) {
    match command {
        Command::Put {
            dictionary,
            key,
            offset,
            len,
        } => {
            buf.push(COMMAND_PUT);
            buf.extend_from_slice(&dictionary.as_u32().to_le_bytes());
            encode_key(buf, key);
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&len.to_le_bytes());
        }
        Command::Delete { dictionary, key } => {
            buf.push(COMMAND_DELETE);
            buf.extend_from_slice(&dictionary.as_u32().to_le_bytes());
            encode_key(buf, key);
        }
    }
}

fn encode_key(buf: &mut Vec<u8>, key: &Key) {
    // The wire tag doubles as the comparator's type rank
    buf.push(key.type_rank());
    match key {
        Key::Null => {}
        Key::Bool(value) => buf.push(u8::from(*value)),
        Key::Int(value) => buf.extend_from_slice(&value.to_le_bytes()),
        Key::Float(value) => buf.extend_from_slice(&value.to_bits().to_le_bytes()),
        Key::Text(value) => {
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value.as_bytes());
        }
        Key::Timestamp(value) => {
            buf.extend_from_slice(&value.timestamp_micros().to_le_bytes());
        }
        Key::Bytes(value) => {
            buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
            buf.extend_from_slice(value);
        }
        Key::Array(items) => {
            buf.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_key(buf, item);
            }
        }
        Key::Object(fields) => {
            buf.extend_from_slice(&(fields.len() as u32).to_le_bytes());
            for (name, value) in fields {
                buf.extend_from_slice(&(name.len() as u32).to_le_bytes());
                buf.extend_from_slice(name.as_bytes());
                encode_key(buf, value);
            }
        }
    }
}

/// Decodes a record payload whose checksum already validated.
///
/// # Errors
///
/// Any structural failure here is fatal corruption, never a torn tail: the
/// checksum vouched for these bytes, so a record this engine wrote cannot
/// fail to decode.
pub fn decode_payload(payload: &[u8]) -> CoreResult<Vec<Command>> {
    let mut reader = PayloadReader::new(payload);
    let count = reader.read_u32()? as usize;
    if count > reader.remaining() {
        return Err(CoreError::log_corruption(format!(
            "command count {count} exceeds payload size"
        )));
    }

    let mut commands = Vec::with_capacity(count);
    for _ in 0..count {
        commands.push(decode_command(&mut reader)?);
    }
    if !reader.finished() {
        return Err(CoreError::log_corruption("trailing bytes after batch payload"));
    }
    Ok(commands)
}

fn decode_command(reader: &mut PayloadReader<'_>) -> CoreResult<Command> {
    let kind = reader.read_u8()?;
    match kind {
        COMMAND_PUT => {
            let dictionary = DictionaryId::new(reader.read_u32()?);
            let key = Arc::new(decode_key(reader, 0)?);
            let offset = reader.read_u64()?;
            let len = reader.read_u32()?;
            Ok(Command::Put {
                dictionary,
                key,
                offset,
                len,
            })
        }
        COMMAND_DELETE => {
            let dictionary = DictionaryId::new(reader.read_u32()?);
            let key = Arc::new(decode_key(reader, 0)?);
            Ok(Command::Delete { dictionary, key })
        }
        other => Err(CoreError::log_corruption(format!(
            "unknown command kind {other}"
        ))),
    }
}

fn decode_key(reader: &mut PayloadReader<'_>, depth: u32) -> CoreResult<Key> {
    if depth > MAX_KEY_DEPTH {
        return Err(CoreError::log_corruption("key nesting too deep"));
    }

    let tag = reader.read_u8()?;
    match tag {
        0 => Ok(Key::Null),
        1 => match reader.read_u8()? {
            0 => Ok(Key::Bool(false)),
            1 => Ok(Key::Bool(true)),
            other => Err(CoreError::log_corruption(format!(
                "invalid boolean byte {other}"
            ))),
        },
        2 => Ok(Key::Int(reader.read_i64()?)),
        3 => Ok(Key::Float(f64::from_bits(reader.read_u64()?))),
        4 => {
            let len = reader.read_u32()? as usize;
            let bytes = reader.read_bytes(len)?;
            let text = std::str::from_utf8(bytes)
                .map_err(|_| CoreError::log_corruption("text key is not valid UTF-8"))?;
            Ok(Key::Text(text.to_string()))
        }
        5 => {
            let micros = reader.read_i64()?;
            DateTime::from_timestamp_micros(micros)
                .map(Key::Timestamp)
                .ok_or_else(|| {
                    CoreError::log_corruption(format!("timestamp {micros} out of range"))
                })
        }
        6 => {
            let len = reader.read_u32()? as usize;
            Ok(Key::Bytes(reader.read_bytes(len)?.to_vec()))
        }
        7 => {
            let count = reader.read_u32()? as usize;
            if count > reader.remaining() {
                return Err(CoreError::log_corruption("array length exceeds payload"));
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_key(reader, depth + 1)?);
            }
            Ok(Key::Array(items))
        }
        8 => {
            let count = reader.read_u32()? as usize;
            if count > reader.remaining() {
                return Err(CoreError::log_corruption("field count exceeds payload"));
            }
            let mut fields = Vec::with_capacity(count);
            for _ in 0..count {
                let name_len = reader.read_u32()? as usize;
                let name = std::str::from_utf8(reader.read_bytes(name_len)?)
                    .map_err(|_| CoreError::log_corruption("field name is not valid UTF-8"))?
                    .to_string();
                let value = decode_key(reader, depth + 1)?;
                fields.push((name, value));
            }
            Ok(Key::Object(fields))
        }
        other => Err(CoreError::log_corruption(format!("unknown key tag {other}"))),
    }
}

struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn finished(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[inline]
    fn read_u8(&mut self) -> CoreResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CoreError::log_corruption("record payload truncated"));
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(CoreError::log_corruption("record payload truncated"));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    #[inline]
    fn read_u32(&mut self) -> CoreResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    #[inline]
    fn read_u64(&mut self) -> CoreResult<u64> {
        let bytes = self.read_bytes(8)?;
        Ok(u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    #[inline]
    fn read_i64(&mut self) -> CoreResult<i64> {
        self.read_u64().map(|bits| bits as i64)
    }
}

/// Computes the CRC32 checksum of `data` (IEEE polynomial).
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
