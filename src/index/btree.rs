//! Ordered in-memory index backed by [`std::collections::BTreeMap`].
//! Safe for concurrent reads; writes take an exclusive lock. The iterator
//! materializes a snapshot vector at construction so traversal is decoupled
//! from future mutations.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::Result;
use crate::index::{IndexIterator, Indexer};
use crate::position::Position;

#[derive(Default)]
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl BTreeIndex {
    pub fn new() -> Self {
        Self { tree: RwLock::new(BTreeMap::new()) }
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, pos: Position) -> Option<Position> {
        self.tree.write().expect("index lock poisoned").insert(key, pos)
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.tree.read().expect("index lock poisoned").get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> (Option<Position>, bool) {
        let removed = self.tree.write().expect("index lock poisoned").remove(key);
        let present = removed.is_some();
        (removed, present)
    }

    fn size(&self) -> usize {
        self.tree.read().expect("index lock poisoned").len()
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let guard = self.tree.read().expect("index lock poisoned");
        let mut items: Vec<(Vec<u8>, Position)> = guard.iter().map(|(k, v)| (k.clone(), *v)).collect();
        if reverse {
            items.reverse();
        }
        Box::new(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Shared by all in-memory index variants: a pre-sorted snapshot plus a
/// cursor. `items` is already in the direction the iterator walks
/// (reversed up front when `reverse` is set), so `seek` just needs to know
/// which comparison counts as "at or past" `key` in that direction.
pub struct SnapshotIterator {
    items: Vec<(Vec<u8>, Position)>,
    reverse: bool,
    pos: usize,
}

impl SnapshotIterator {
    pub fn new(items: Vec<(Vec<u8>, Position)>, reverse: bool) -> Self {
        Self { items, reverse, pos: 0 }
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) {
        self.pos = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.pos = if self.reverse {
            self.items.iter().position(|(k, _)| k.as_slice() <= key).unwrap_or(self.items.len())
        } else {
            self.items.iter().position(|(k, _)| k.as_slice() >= key).unwrap_or(self.items.len())
        };
    }

    fn next(&mut self) {
        if self.pos < self.items.len() {
            self.pos += 1;
        }
    }

    fn valid(&self) -> bool {
        self.pos < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.pos].0
    }

    fn value(&self) -> Position {
        self.items[self.pos].1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let idx = BTreeIndex::new();
        assert_eq!(idx.put(b"a".to_vec(), Position::new(0, 0, 10)), None);
        assert_eq!(idx.get(b"a"), Some(Position::new(0, 0, 10)));
        let (old, removed) = idx.delete(b"a");
        assert_eq!(old, Some(Position::new(0, 0, 10)));
        assert!(removed);
        assert_eq!(idx.get(b"a"), None);
    }

    #[test]
    fn iterator_yields_keys_in_order() {
        let idx = BTreeIndex::new();
        for key in [b"c".to_vec(), b"a".to_vec(), b"b".to_vec()] {
            idx.put(key, Position::new(0, 0, 1));
        }
        let mut it = idx.iterator(false);
        it.rewind();
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn reverse_iterator_yields_reverse_order() {
        let idx = BTreeIndex::new();
        for key in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
            idx.put(key, Position::new(0, 0, 1));
        }
        let mut it = idx.iterator(true);
        it.rewind();
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(seen, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }
}
