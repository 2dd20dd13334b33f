//! Adaptive radix tree index
//!
//! Keys are split into a path-compressed trie whose inner nodes grow through
//! four layouts as their fan-out increases:
//!
//! ```text
//! Node4    keys[4]   + children[4]      sorted, linear scan
//! Node16   keys[16]  + children[16]     sorted, linear scan
//! Node48   index[256] → children[48]    byte → slot indirection
//! Node256  children[256]                direct addressing
//! ```
//!
//! Nodes shrink back with some hysteresis when keys are removed, and an inner
//! node left with no value and a single child is merged into it.

use parking_lot::RwLock;

use crate::data::LogRecordPos;
use crate::error::Result;

use super::{IndexIter, Indexer, SnapshotIterator};

// =============================================================================
// Index
// =============================================================================

/// In-memory index backed by an [`AdaptiveRadixTree`]
pub struct ArtIndex {
    tree: RwLock<AdaptiveRadixTree<LogRecordPos>>,
}

impl ArtIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(AdaptiveRadixTree::new()),
        }
    }
}

impl Default for ArtIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for ArtIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> bool {
        self.tree.write().insert(&key, pos);
        true
    }

    fn get(&self, key: &[u8]) -> Option<LogRecordPos> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.tree.write().remove(key).is_some()
    }

    fn size(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> IndexIter {
        let tree = self.tree.read();
        let mut items = Vec::with_capacity(tree.len());
        tree.for_each(|key, pos| items.push((key.to_vec(), *pos)));
        if reverse {
            items.reverse();
        }
        IndexIter::Snapshot(SnapshotIterator::new(items, reverse))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Tree
// =============================================================================

/// Ordered map from byte strings to `V`
pub struct AdaptiveRadixTree<V> {
    root: Node<V>,
    len: usize,
}

impl<V> AdaptiveRadixTree<V> {
    pub fn new() -> Self {
        Self {
            root: Node::empty(Vec::new()),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or replace; returns the previous value
    pub fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        let old = self.root.insert(key, value);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    pub fn get(&self, key: &[u8]) -> Option<&V> {
        let mut node = &self.root;
        let mut key = key;
        loop {
            key = key.strip_prefix(node.prefix.as_slice())?;
            let Some((&byte, tail)) = key.split_first() else {
                return node.value.as_ref();
            };
            node = node.children.find(byte)?;
            key = tail;
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let removed = self.root.remove(key);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Visit every entry in ascending key order
    pub fn for_each(&self, mut f: impl FnMut(&[u8], &V)) {
        let mut key = Vec::new();
        self.root.walk(&mut key, &mut f);
    }
}

impl<V> Default for AdaptiveRadixTree<V> {
    fn default() -> Self {
        Self::new()
    }
}

struct Node<V> {
    /// Compressed path below the parent's edge byte
    prefix: Vec<u8>,

    /// Set when a key ends exactly at this node
    value: Option<V>,

    children: Children<V>,
}

impl<V> Node<V> {
    fn empty(prefix: Vec<u8>) -> Self {
        Self {
            prefix,
            value: None,
            children: Children::Node4(SmallNode::new()),
        }
    }

    fn leaf(prefix: Vec<u8>, value: V) -> Self {
        Self {
            value: Some(value),
            ..Self::empty(prefix)
        }
    }

    fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        let common = common_prefix_len(&self.prefix, key);
        if common < self.prefix.len() {
            self.split(common);
        }

        let Some((&byte, tail)) = key[common..].split_first() else {
            return self.value.replace(value);
        };
        if let Some(child) = self.children.find_mut(byte) {
            return child.insert(tail, value);
        }
        self.children
            .insert(byte, Box::new(Node::leaf(tail.to_vec(), value)));
        None
    }

    /// Keep `prefix[..at]` here and push everything else one level down
    fn split(&mut self, at: usize) {
        let edge = self.prefix[at];
        let child = Node {
            prefix: self.prefix[at + 1..].to_vec(),
            value: self.value.take(),
            children: std::mem::replace(&mut self.children, Children::Node4(SmallNode::new())),
        };
        self.prefix.truncate(at);
        self.children.insert(edge, Box::new(child));
    }

    fn remove(&mut self, key: &[u8]) -> Option<V> {
        let rest = key.strip_prefix(self.prefix.as_slice())?;
        let Some((&byte, tail)) = rest.split_first() else {
            return self.value.take();
        };

        let child = self.children.find_mut(byte)?;
        let removed = child.remove(tail)?;

        if child.value.is_none() {
            match child.children.len() {
                0 => {
                    self.children.remove(byte);
                }
                1 => child.absorb_only_child(),
                _ => {}
            }
        }
        Some(removed)
    }

    /// Merge the single child into this valueless node
    fn absorb_only_child(&mut self) {
        if let Some((byte, child)) = self.children.drain().pop() {
            let child = *child;
            self.prefix.push(byte);
            self.prefix.extend_from_slice(&child.prefix);
            self.value = child.value;
            self.children = child.children;
        }
    }

    fn walk(&self, key: &mut Vec<u8>, f: &mut dyn FnMut(&[u8], &V)) {
        let base = key.len();
        key.extend_from_slice(&self.prefix);

        // A key ending here sorts before every key below it
        if let Some(value) = &self.value {
            f(key.as_slice(), value);
        }
        self.children.for_each(&mut |byte, child| {
            key.push(byte);
            child.walk(key, f);
            key.pop();
        });

        key.truncate(base);
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

// =============================================================================
// Inner node layouts
// =============================================================================

enum Children<V> {
    Node4(SmallNode<V, 4>),
    Node16(SmallNode<V, 16>),
    Node48(Box<Node48<V>>),
    Node256(Box<Node256<V>>),
}

impl<V> Children<V> {
    /// Smallest layout able to hold `n` children
    fn with_capacity(n: usize) -> Self {
        match n {
            0..=4 => Children::Node4(SmallNode::new()),
            5..=16 => Children::Node16(SmallNode::new()),
            17..=48 => Children::Node48(Box::new(Node48::new())),
            _ => Children::Node256(Box::new(Node256::new())),
        }
    }

    fn len(&self) -> usize {
        match self {
            Children::Node4(n) => n.len,
            Children::Node16(n) => n.len,
            Children::Node48(n) => n.len,
            Children::Node256(n) => n.len,
        }
    }

    fn is_full(&self) -> bool {
        match self {
            Children::Node4(n) => n.len == 4,
            Children::Node16(n) => n.len == 16,
            Children::Node48(n) => n.len == 48,
            Children::Node256(_) => false,
        }
    }

    fn should_shrink(&self) -> bool {
        match self {
            Children::Node4(_) => false,
            Children::Node16(n) => n.len <= 3,
            Children::Node48(n) => n.len <= 12,
            Children::Node256(n) => n.len <= 37,
        }
    }

    fn find(&self, byte: u8) -> Option<&Node<V>> {
        match self {
            Children::Node4(n) => n.find(byte),
            Children::Node16(n) => n.find(byte),
            Children::Node48(n) => n.find(byte),
            Children::Node256(n) => n.children[byte as usize].as_deref(),
        }
    }

    fn find_mut(&mut self, byte: u8) -> Option<&mut Node<V>> {
        match self {
            Children::Node4(n) => n.find_mut(byte),
            Children::Node16(n) => n.find_mut(byte),
            Children::Node48(n) => n.find_mut(byte),
            Children::Node256(n) => n.children[byte as usize].as_deref_mut(),
        }
    }

    /// Add a child under a byte that is not present yet
    fn insert(&mut self, byte: u8, child: Box<Node<V>>) {
        if self.is_full() {
            self.resize(self.len() + 1);
        }
        match self {
            Children::Node4(n) => n.insert(byte, child),
            Children::Node16(n) => n.insert(byte, child),
            Children::Node48(n) => n.insert(byte, child),
            Children::Node256(n) => n.insert(byte, child),
        }
    }

    fn remove(&mut self, byte: u8) -> Option<Box<Node<V>>> {
        let removed = match self {
            Children::Node4(n) => n.remove(byte),
            Children::Node16(n) => n.remove(byte),
            Children::Node48(n) => n.remove(byte),
            Children::Node256(n) => n.remove(byte),
        };
        if self.should_shrink() {
            self.resize(self.len());
        }
        removed
    }

    /// Move every child into the smallest layout holding `capacity`
    fn resize(&mut self, capacity: usize) {
        let entries = self.drain();
        *self = Children::with_capacity(capacity);
        for (byte, child) in entries {
            match self {
                Children::Node4(n) => n.insert(byte, child),
                Children::Node16(n) => n.insert(byte, child),
                Children::Node48(n) => n.insert(byte, child),
                Children::Node256(n) => n.insert(byte, child),
            }
        }
    }

    /// Take all children out in ascending byte order
    fn drain(&mut self) -> Vec<(u8, Box<Node<V>>)> {
        let mut entries = Vec::with_capacity(self.len());
        match self {
            Children::Node4(n) => n.drain_into(&mut entries),
            Children::Node16(n) => n.drain_into(&mut entries),
            Children::Node48(n) => {
                for byte in 0..=255u8 {
                    if let Some(child) = n.remove(byte) {
                        entries.push((byte, child));
                    }
                }
            }
            Children::Node256(n) => {
                for byte in 0..=255u8 {
                    if let Some(child) = n.remove(byte) {
                        entries.push((byte, child));
                    }
                }
            }
        }
        entries
    }

    /// Visit children in ascending byte order
    fn for_each(&self, f: &mut dyn FnMut(u8, &Node<V>)) {
        match self {
            Children::Node4(n) => n.for_each(f),
            Children::Node16(n) => n.for_each(f),
            Children::Node48(n) => {
                for byte in 0..=255u8 {
                    if let Some(child) = n.find(byte) {
                        f(byte, child);
                    }
                }
            }
            Children::Node256(n) => {
                for (byte, child) in n.children.iter().enumerate() {
                    if let Some(child) = child.as_deref() {
                        f(byte as u8, child);
                    }
                }
            }
        }
    }
}

/// Node4 / Node16: parallel sorted key and child arrays
struct SmallNode<V, const N: usize> {
    len: usize,
    keys: [u8; N],
    children: [Option<Box<Node<V>>>; N],
}

impl<V, const N: usize> SmallNode<V, N> {
    fn new() -> Self {
        Self {
            len: 0,
            keys: [0; N],
            children: std::array::from_fn(|_| None),
        }
    }

    fn slot(&self, byte: u8) -> Option<usize> {
        self.keys[..self.len].iter().position(|&k| k == byte)
    }

    fn find(&self, byte: u8) -> Option<&Node<V>> {
        self.slot(byte).and_then(|i| self.children[i].as_deref())
    }

    fn find_mut(&mut self, byte: u8) -> Option<&mut Node<V>> {
        let i = self.slot(byte)?;
        self.children[i].as_deref_mut()
    }

    fn insert(&mut self, byte: u8, child: Box<Node<V>>) {
        let pos = self.keys[..self.len].partition_point(|&k| k < byte);
        for i in (pos..self.len).rev() {
            self.keys[i + 1] = self.keys[i];
            self.children[i + 1] = self.children[i].take();
        }
        self.keys[pos] = byte;
        self.children[pos] = Some(child);
        self.len += 1;
    }

    fn remove(&mut self, byte: u8) -> Option<Box<Node<V>>> {
        let i = self.slot(byte)?;
        let child = self.children[i].take();
        for j in i..self.len - 1 {
            self.keys[j] = self.keys[j + 1];
            self.children[j] = self.children[j + 1].take();
        }
        self.len -= 1;
        child
    }

    fn drain_into(&mut self, out: &mut Vec<(u8, Box<Node<V>>)>) {
        for i in 0..self.len {
            if let Some(child) = self.children[i].take() {
                out.push((self.keys[i], child));
            }
        }
        self.len = 0;
    }

    fn for_each(&self, f: &mut dyn FnMut(u8, &Node<V>)) {
        for i in 0..self.len {
            if let Some(child) = self.children[i].as_deref() {
                f(self.keys[i], child);
            }
        }
    }
}

/// Node48: byte → slot table (0 = empty, otherwise slot + 1)
struct Node48<V> {
    len: usize,
    index: [u8; 256],
    children: [Option<Box<Node<V>>>; 48],
}

impl<V> Node48<V> {
    fn new() -> Self {
        Self {
            len: 0,
            index: [0; 256],
            children: std::array::from_fn(|_| None),
        }
    }

    fn find(&self, byte: u8) -> Option<&Node<V>> {
        match self.index[byte as usize] {
            0 => None,
            slot => self.children[slot as usize - 1].as_deref(),
        }
    }

    fn find_mut(&mut self, byte: u8) -> Option<&mut Node<V>> {
        match self.index[byte as usize] {
            0 => None,
            slot => self.children[slot as usize - 1].as_deref_mut(),
        }
    }

    fn insert(&mut self, byte: u8, child: Box<Node<V>>) {
        if let Some(slot) = self.children.iter().position(Option::is_none) {
            self.children[slot] = Some(child);
            self.index[byte as usize] = slot as u8 + 1;
            self.len += 1;
        }
    }

    fn remove(&mut self, byte: u8) -> Option<Box<Node<V>>> {
        match self.index[byte as usize] {
            0 => None,
            slot => {
                self.index[byte as usize] = 0;
                self.len -= 1;
                self.children[slot as usize - 1].take()
            }
        }
    }
}

/// Node256: one slot per byte value
struct Node256<V> {
    len: usize,
    children: [Option<Box<Node<V>>>; 256],
}

impl<V> Node256<V> {
    fn new() -> Self {
        Self {
            len: 0,
            children: std::array::from_fn(|_| None),
        }
    }

    fn insert(&mut self, byte: u8, child: Box<Node<V>>) {
        if self.children[byte as usize].replace(child).is_none() {
            self.len += 1;
        }
    }

    fn remove(&mut self, byte: u8) -> Option<Box<Node<V>>> {
        let removed = self.children[byte as usize].take();
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }
}
