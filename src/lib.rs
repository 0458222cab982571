//! An embedded, persistent key-value storage engine built on the Bitcask
//! model: an append-only log on disk, an in-memory index mapping every
//! live key to its most recent on-disk position, and a merge procedure
//! that reclaims space held by superseded or deleted records.
//!
//! ```no_run
//! use caskdb::{Engine, Options};
//!
//! # fn main() -> caskdb::Result<()> {
//! let options = Options { dir_path: "/tmp/caskdb-example".into(), ..Options::default() };
//! let engine = Engine::open(options)?;
//! engine.put(b"key", b"value")?;
//! assert_eq!(engine.get(b"key")?, "value".as_bytes());
//! engine.close()?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod crc32;
pub mod data_file;
pub mod engine;
pub mod error;
pub mod index;
pub mod io;
pub mod iterator;
pub mod merge;
pub mod options;
pub mod position;
pub mod record;
mod util;
pub mod varint;

pub use batch::WriteBatch;
pub use engine::{Engine, Stat};
pub use error::{Result, StorageError};
pub use iterator::DbIterator;
pub use options::{IndexType, IteratorOptions, Options, WriteBatchOptions};
pub use position::Position;
