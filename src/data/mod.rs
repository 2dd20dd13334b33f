//! Data Module
//!
//! The append-only log: record codec and segment files.
//!
//! ## Responsibilities
//! - Binary encoding of log records with CRC32 integrity checks
//! - Sequence-number prefixed keys for atomic batches
//! - Segment files (sequential writer + random-access reader)
//! - Naming conventions for segments and special files
//!
//! ## Record Format
//! ```text
//! ┌─────────┬──────────┬───────────────┬─────────────────┬───────┬─────────┐
//! │ CRC (4) │ Type (1) │ KeySize (var) │ ValueSize (var) │  Key  │  Value  │
//! └─────────┴──────────┴───────────────┴─────────────────┴───────┴─────────┘
//!   CRC covers every byte after itself; sizes are unsigned varints
//! ```

mod data_file;
mod log_record;
mod varint;

pub use data_file::{
    data_file_name, DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME,
    SEQ_NO_FILE_NAME,
};
pub use log_record::{
    decode_log_record, decode_log_record_header, decode_position, encode_log_record,
    encode_position, key_with_seq, log_record_crc, parse_key_with_seq, LogRecord,
    LogRecordHeader, LogRecordPos, LogRecordType, MAX_LOG_RECORD_HEADER_SIZE,
    NON_TRANSACTION_SEQ_NO,
};
pub use varint::{get_uvarint, put_uvarint, MAX_VARINT_LEN32, MAX_VARINT_LEN64};
