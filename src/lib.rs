//! # CaskKV
//!
//! An embeddable, log-structured key-value store in the Bitcask model:
//! - Append-only segment files with CRC-checked records
//! - In-memory (BTree / adaptive radix tree) or disk-backed B+tree index
//! - Atomic write batches with crash-safe replay
//! - Online merge that reclaims space from overwritten and deleted keys
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │      put / get / delete / fold / WriteBatch / iter / merge   │
//! └───────────────┬─────────────────────────────┬───────────────┘
//!                 │                             │
//!                 ▼                             ▼
//!        ┌─────────────────┐          ┌──────────────────┐
//!        │      Index      │          │   SegmentState   │
//!        │ key → (file,off)│          │ active + older   │
//!        │ BTree/ART/B+tree│          │   (RwLock)       │
//!        └─────────────────┘          └────────┬─────────┘
//!                                              │
//!                                              ▼
//!                                     ┌──────────────────┐
//!                                     │ DataFile (.data) │
//!                                     │   LogRecord codec│
//!                                     │   IoManager      │
//!                                     └──────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod fio;
pub mod data;
pub mod index;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CaskError, Result};
pub use config::{IndexType, IteratorOptions, Options, WriteBatchOptions};
pub use engine::{Engine, EngineIterator, WriteBatch};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of CaskKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
