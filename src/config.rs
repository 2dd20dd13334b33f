//! Configuration for CaskKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a CaskKV store
#[derive(Debug, Clone)]
pub struct Options {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding every file of the store
    /// Internal structure:
    ///   {dir_path}/
    ///     ├── 000000000.data   (log segments)
    ///     ├── hint             (merge-produced index snapshot)
    ///     ├── merge            (merge completion marker)
    ///     ├── seq.no           (sequence snapshot, disk index only)
    ///     ├── bptree-index     (disk index only)
    ///     └── flock            (directory lock)
    pub dir_path: PathBuf,

    /// Max size of one segment in bytes before a new one is started
    pub data_file_size: u64,

    /// fsync the active segment after every append
    pub sync_writes: bool,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Which index backend maps keys to log positions
    pub index_type: IndexType,
}

/// Index backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// In-memory ordered tree
    BTree,

    /// In-memory adaptive radix tree
    Art,

    /// Disk-backed B+tree, survives restarts without log replay
    BPlusTree,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("./caskkv_data"),
            data_file_size: 256 * 1024 * 1024, // 256 MB
            sync_writes: false,
            index_type: IndexType::BTree,
        }
    }
}

impl Options {
    /// Create a new options builder
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }
}

/// Builder for Options
#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Set the store directory
    pub fn dir_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.dir_path = path.into();
        self
    }

    /// Set the max segment size (in bytes)
    pub fn data_file_size(mut self, size: u64) -> Self {
        self.options.data_file_size = size;
        self
    }

    /// Sync after every write
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.options.sync_writes = sync;
        self
    }

    /// Set the index backend
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.options.index_type = index_type;
        self
    }

    pub fn build(self) -> Options {
        self.options
    }
}

/// Options for [`crate::Engine::iter`]
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix (empty = all keys)
    pub prefix: Vec<u8>,

    /// Iterate from the largest key down
    pub reverse: bool,
}

/// Options for [`crate::Engine::new_write_batch`]
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    /// Max number of staged records a single commit accepts
    pub max_batch_num: usize,

    /// fsync the active segment once the batch is written
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 10_000,
            sync_writes: true,
        }
    }
}
