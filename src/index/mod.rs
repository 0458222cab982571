//! The in-memory index abstraction: a pluggable key -> [`Position`]
//! mapping with an ordered, snapshot-style iterator. Three variants share
//! this one contract; the engine never inspects which variant is in use.

pub mod art;
pub mod bptree;
pub mod btree;

use std::path::Path;

use crate::error::Result;
use crate::options::IndexType;
use crate::position::Position;

pub trait Indexer: Send + Sync {
    /// Inserts or replaces `key`'s position, returning the replaced one.
    fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position>;
    fn get(&self, key: &[u8]) -> Option<Position>;
    /// Removes `key`, returning its prior position and whether it was present.
    fn delete(&self, key: &[u8]) -> (Option<Position>, bool);
    fn size(&self) -> usize;
    /// A snapshot iterator over entries in lexicographic key order (or its
    /// reverse), decoupled from subsequent mutations.
    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator>;
    fn close(&self) -> Result<()>;
}

pub trait IndexIterator {
    fn rewind(&mut self);
    /// Seeks to the first entry >= `key` (or, in reverse mode, <= `key`).
    fn seek(&mut self, key: &[u8]);
    fn next(&mut self);
    fn valid(&self) -> bool;
    fn key(&self) -> &[u8];
    fn value(&self) -> Position;
    fn close(&mut self) {}
}

pub fn new_indexer(index_type: IndexType, dir_path: &Path) -> Result<Box<dyn Indexer>> {
    match index_type {
        IndexType::OrderedTree => Ok(Box::new(btree::BTreeIndex::new())),
        IndexType::Art => Ok(Box::new(art::AdaptiveRadixTree::new())),
        IndexType::PersistentBPlusTree => Ok(Box::new(bptree::BPlusTreeIndex::open(dir_path)?)),
    }
}
