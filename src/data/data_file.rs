//! Segment files
//!
//! Append-only log files: sequential writer + random-access reader.

use std::path::{Path, PathBuf};

use crate::error::{CaskError, Result};
use crate::fio::{new_io_manager, IoManager};

use super::log_record::{
    decode_log_record, decode_log_record_header, encode_log_record, encode_position,
    log_record_crc, LogRecord, LogRecordPos, LogRecordType, MAX_LOG_RECORD_HEADER_SIZE,
};

/// Extension of numbered segment files
pub const DATA_FILE_SUFFIX: &str = ".data";

/// key → position records produced by merge
pub const HINT_FILE_NAME: &str = "hint";

/// Single record naming the first segment a merge did not cover
pub const MERGE_FINISHED_FILE_NAME: &str = "merge";

/// Last used batch sequence number, written at clean shutdown
pub const SEQ_NO_FILE_NAME: &str = "seq.no";

/// File name of segment `file_id`: 9-digit zero-padded id + suffix
pub fn data_file_name(file_id: u32) -> String {
    format!("{:09}{}", file_id, DATA_FILE_SUFFIX)
}

/// One append-only log file
pub struct DataFile {
    /// Segment id (0 for the fixed-name special files)
    file_id: u32,

    /// Where the next append lands
    write_offset: u64,

    /// Underlying file
    io: Box<dyn IoManager>,
}

impl DataFile {
    /// Open or create segment `file_id` under `dir`
    pub fn open(dir: &Path, file_id: u32) -> Result<Self> {
        Self::open_path(dir.join(data_file_name(file_id)), file_id)
    }

    /// Open or create the hint file under `dir`
    pub fn open_hint(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(HINT_FILE_NAME), 0)
    }

    /// Open or create the merge completion marker under `dir`
    pub fn open_merge_finished(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(MERGE_FINISHED_FILE_NAME), 0)
    }

    /// Open or create the sequence number snapshot under `dir`
    pub fn open_seq_no(dir: &Path) -> Result<Self> {
        Self::open_path(dir.join(SEQ_NO_FILE_NAME), 0)
    }

    fn open_path(path: PathBuf, file_id: u32) -> Result<Self> {
        let io = new_io_manager(&path)?;
        let write_offset = io.size()?;
        Ok(Self {
            file_id,
            write_offset,
            io,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub fn set_write_offset(&mut self, offset: u64) {
        self.write_offset = offset;
    }

    /// Read the record starting at `offset`
    ///
    /// Returns:
    /// - `Ok(Some((record, size)))`: record and its full on-disk length
    /// - `Ok(None)`: end of data, either EOF or zero padding
    /// - `Err(UnexpectedEof)`: the record runs past the end of the file
    /// - `Err(ChecksumMismatch)`: the record's bytes do not match its CRC
    /// - `Err(Corruption)`: a full-length header that cannot be decoded
    pub fn read_log_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // Header is variable length; never read past EOF
        let header_len = (MAX_LOG_RECORD_HEADER_SIZE as u64).min(file_size - offset) as usize;
        let mut header_buf = vec![0u8; header_len];
        let n = self.io.read(&mut header_buf, offset)?;
        header_buf.truncate(n);

        let Some((header, header_size)) = decode_log_record_header(&header_buf) else {
            if header_buf.iter().all(|&b| b == 0) {
                return Ok(None);
            }
            if header_buf.len() < MAX_LOG_RECORD_HEADER_SIZE {
                return Err(self.cut_short(offset));
            }
            return Err(CaskError::Corruption(format!(
                "undecodable record header in data file {} at offset {}",
                self.file_id, offset
            )));
        };
        if header.is_end_of_data() {
            return Ok(None);
        }

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;
        let record_size = (header_size + key_size + value_size) as u64;
        if offset + record_size > file_size {
            return Err(self.cut_short(offset));
        }

        let mut kv = vec![0u8; key_size + value_size];
        if !kv.is_empty() {
            let n = self.io.read(&mut kv, offset + header_size as u64)?;
            if n < kv.len() {
                return Err(self.cut_short(offset));
            }
        }
        let value = kv.split_off(key_size);

        let mut record = LogRecord {
            key: kv,
            value,
            rec_type: LogRecordType::Normal,
        };
        let crc = log_record_crc(&record, &header_buf[4..header_size]);
        if crc != header.crc {
            return Err(CaskError::ChecksumMismatch {
                file_id: self.file_id,
                offset,
            });
        }
        record.rec_type = LogRecordType::try_from(header.rec_type)?;

        Ok(Some((record, record_size)))
    }

    fn cut_short(&self, offset: u64) -> CaskError {
        CaskError::UnexpectedEof {
            file_id: self.file_id,
            offset,
        }
    }

    /// Whether a complete, checksum-valid record starts anywhere after `offset`
    ///
    /// A torn append only ever leaves a prefix of the last record, so a valid
    /// record past an unreadable one means the unreadable one is corrupt.
    pub fn has_record_after(&self, offset: u64) -> Result<bool> {
        let file_size = self.io.size()?;
        let start = offset + 1;
        if start >= file_size {
            return Ok(false);
        }

        let mut tail = vec![0u8; (file_size - start) as usize];
        let n = self.io.read(&mut tail, start)?;
        tail.truncate(n);

        Ok((0..tail.len()).any(|i| decode_log_record(&tail[i..]).is_some()))
    }

    /// Append raw bytes at the end of the file
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        let n = self.io.write(buf)?;
        self.write_offset += n as u64;
        Ok(())
    }

    /// Append a hint record mapping `key` to `pos`
    pub fn write_hint_record(&mut self, key: &[u8], pos: &LogRecordPos) -> Result<()> {
        let record = LogRecord::normal(key.to_vec(), encode_position(pos));
        let (buf, _) = encode_log_record(&record);
        self.write(&buf)
    }

    /// Force all writes to stable storage
    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Current on-disk size
    pub fn size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Drop everything past `len` and continue appending from there
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.io.truncate(len)?;
        self.write_offset = len;
        Ok(())
    }

    /// Sync and release the file handle
    pub fn close(self) -> Result<()> {
        self.io.sync()
    }
}
