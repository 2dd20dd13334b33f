//! Log record definitions and codec
//!
//! Defines the structure of individual log entries and their on-disk form.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{CaskError, Result};

use super::varint::{get_uvarint, put_uvarint, MAX_VARINT_LEN32, MAX_VARINT_LEN64};

/// CRC (4) + type (1) + two 32-bit varint lengths
pub const MAX_LOG_RECORD_HEADER_SIZE: usize = 4 + 1 + MAX_VARINT_LEN32 * 2;

/// Sequence number carried by plain put/delete records
pub const NON_TRANSACTION_SEQ_NO: u64 = 0;

const CRC_SIZE: usize = 4;

/// Kind of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A live key/value pair
    Normal = 0,

    /// A tombstone, carries no value
    Deleted = 1,

    /// Closes a write batch, carries no value
    BatchFinished = 2,
}

impl TryFrom<u8> for LogRecordType {
    type Error = CaskError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Deleted),
            2 => Ok(Self::BatchFinished),
            other => Err(CaskError::Corruption(format!(
                "unknown log record type {}",
                other
            ))),
        }
    }
}

/// A single entry in the log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: LogRecordType,
}

impl LogRecord {
    pub fn normal(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            rec_type: LogRecordType::Normal,
        }
    }

    pub fn deleted(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            rec_type: LogRecordType::Deleted,
        }
    }

    pub fn batch_finished(key: Vec<u8>) -> Self {
        Self {
            key,
            value: Vec::new(),
            rec_type: LogRecordType::BatchFinished,
        }
    }
}

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordHeader {
    pub crc: u32,
    /// Raw type byte, validated only after the checksum passes
    pub rec_type: u8,
    pub key_size: u32,
    pub value_size: u32,
}

impl LogRecordHeader {
    /// All-zero header: unwritten tail of a segment
    pub fn is_end_of_data(&self) -> bool {
        self.crc == 0 && self.key_size == 0 && self.value_size == 0
    }
}

/// Location of one physical record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogRecordPos {
    /// Segment the record lives in
    pub file_id: u32,

    /// Byte offset of the record header within the segment
    pub offset: u64,
}

/// Encode a record into its on-disk form
///
/// Returns the encoded bytes and their length.
pub fn encode_log_record(record: &LogRecord) -> (Bytes, u64) {
    let mut buf = BytesMut::with_capacity(
        MAX_LOG_RECORD_HEADER_SIZE + record.key.len() + record.value.len(),
    );

    // CRC placeholder, patched once the rest is written
    buf.put_u32_le(0);
    buf.put_u8(record.rec_type as u8);
    put_uvarint(&mut buf, record.key.len() as u64);
    put_uvarint(&mut buf, record.value.len() as u64);
    buf.put_slice(&record.key);
    buf.put_slice(&record.value);

    let crc = crc32fast::hash(&buf[CRC_SIZE..]);
    buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());

    let len = buf.len() as u64;
    (buf.freeze(), len)
}

/// Decode a record header from the front of `buf`
///
/// Returns the header and its encoded length, or `None` when `buf` is too
/// short to hold a header.
pub fn decode_log_record_header(buf: &[u8]) -> Option<(LogRecordHeader, usize)> {
    if buf.len() <= CRC_SIZE {
        return None;
    }

    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let rec_type = buf[4];
    let mut index = CRC_SIZE + 1;

    let (key_size, n) = get_uvarint(&buf[index..])?;
    index += n;
    let (value_size, n) = get_uvarint(&buf[index..])?;
    index += n;

    let header = LogRecordHeader {
        crc,
        rec_type,
        key_size: u32::try_from(key_size).ok()?,
        value_size: u32::try_from(value_size).ok()?,
    };
    Some((header, index))
}

/// Decode one complete record from the front of `buf`
///
/// Returns the record and its encoded length, or `None` unless `buf` starts
/// with a whole, checksum-valid, non-padding record.
pub fn decode_log_record(buf: &[u8]) -> Option<(LogRecord, usize)> {
    let (header, header_size) = decode_log_record_header(buf)?;
    if header.is_end_of_data() {
        return None;
    }

    let key_end = header_size.checked_add(header.key_size as usize)?;
    let value_end = key_end.checked_add(header.value_size as usize)?;
    if value_end > buf.len() || crc32fast::hash(&buf[CRC_SIZE..value_end]) != header.crc {
        return None;
    }

    let rec_type = LogRecordType::try_from(header.rec_type).ok()?;
    let record = LogRecord {
        key: buf[header_size..key_end].to_vec(),
        value: buf[key_end..value_end].to_vec(),
        rec_type,
    };
    Some((record, value_end))
}

/// CRC32 over the header (minus its CRC field), then key, then value
pub fn log_record_crc(record: &LogRecord, header_without_crc: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header_without_crc);
    hasher.update(&record.key);
    hasher.update(&record.value);
    hasher.finalize()
}

/// Encode a position as `varint(file_id) | varint(offset)`
pub fn encode_position(pos: &LogRecordPos) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN32 + MAX_VARINT_LEN64);
    put_uvarint(&mut buf, u64::from(pos.file_id));
    put_uvarint(&mut buf, pos.offset);
    buf
}

/// Decode a position written by [`encode_position`]
pub fn decode_position(buf: &[u8]) -> Result<LogRecordPos> {
    let corrupt = || CaskError::Corruption("malformed record position".to_string());

    let (file_id, n) = get_uvarint(buf).ok_or_else(corrupt)?;
    let (offset, _) = get_uvarint(&buf[n..]).ok_or_else(corrupt)?;

    Ok(LogRecordPos {
        file_id: u32::try_from(file_id).map_err(|_| corrupt())?,
        offset,
    })
}

/// Prefix `key` with a varint sequence number, as stored in the log
pub fn key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN64 + key.len());
    put_uvarint(&mut buf, seq_no);
    buf.extend_from_slice(key);
    buf
}

/// Split a logged key into the user key and its sequence number
pub fn parse_key_with_seq(key: &[u8]) -> Result<(&[u8], u64)> {
    let (seq_no, n) = get_uvarint(key)
        .ok_or_else(|| CaskError::Corruption("malformed sequence prefix".to_string()))?;
    Ok((&key[n..], seq_no))
}
