//! File I/O Module
//!
//! Minimal I/O abstraction the segment layer is written against.
//!
//! ## Responsibilities
//! - Positional reads (no shared cursor, safe under a read lock)
//! - Appends at the OS-level end of file
//! - Durability (fsync), size queries, tail truncation

mod file_io;

use std::path::Path;

use crate::error::Result;

pub use file_io::FileIo;

/// I/O operations a segment needs from its backing file
pub trait IoManager: Send + Sync {
    /// Read into `buf` starting at `offset`; returns bytes read (short at EOF)
    fn read(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Append `buf` at the end of the file
    fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Flush all written data to stable storage
    fn sync(&self) -> Result<()>;

    /// Current file size in bytes
    fn size(&self) -> Result<u64>;

    /// Cut the file down to `len` bytes
    fn truncate(&self, len: u64) -> Result<()>;
}

/// Open the default I/O manager for `path`, creating the file if absent
pub fn new_io_manager(path: &Path) -> Result<Box<dyn IoManager>> {
    Ok(Box::new(FileIo::open(path)?))
}
