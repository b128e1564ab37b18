//! Persistent weight-balanced ordered maps.
//!
//! Trees follow Adams' weight-balanced scheme with the `(delta, gamma) = (3, 2)`
//! parameters of Hirai and Yamamoto, *Balancing Weight-Balanced Trees* (JFP 2011).
//! Every update returns a new map that shares all untouched subtrees with the
//! original; nothing reachable from an existing map is ever mutated, so old
//! versions stay valid and may be read from any thread.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

const DELTA: usize = 3;
const GAMMA: usize = 2;

type Tree<K, V> = Option<Arc<Node<K, V>>>;

struct Node<K, V> {
    left: Tree<K, V>,
    key: K,
    value: V,
    right: Tree<K, V>,
    size: usize,
}

fn size<K, V>(tree: &Tree<K, V>) -> usize {
    tree.as_ref().map_or(0, |node| node.size)
}

fn weight<K, V>(tree: &Tree<K, V>) -> usize {
    size(tree) + 1
}

fn make<K, V>(left: Tree<K, V>, key: K, value: V, right: Tree<K, V>) -> Tree<K, V> {
    let size = size(&left) + size(&right) + 1;
    Some(Arc::new(Node {
        left,
        key,
        value,
        right,
        size,
    }))
}

fn single_left<K: Clone, V: Clone>(
    x: Tree<K, V>,
    key: K,
    value: V,
    r: &Node<K, V>,
) -> Tree<K, V> {
    make(
        make(x, key, value, r.left.clone()),
        r.key.clone(),
        r.value.clone(),
        r.right.clone(),
    )
}

fn single_right<K: Clone, V: Clone>(
    l: &Node<K, V>,
    key: K,
    value: V,
    z: Tree<K, V>,
) -> Tree<K, V> {
    make(
        l.left.clone(),
        l.key.clone(),
        l.value.clone(),
        make(l.right.clone(), key, value, z),
    )
}

fn double_left<K: Clone, V: Clone>(
    x: Tree<K, V>,
    key: K,
    value: V,
    r: &Node<K, V>,
) -> Tree<K, V> {
    let Some(rl) = r.left.as_deref() else {
        return single_left(x, key, value, r);
    };
    make(
        make(x, key, value, rl.left.clone()),
        rl.key.clone(),
        rl.value.clone(),
        make(rl.right.clone(), r.key.clone(), r.value.clone(), r.right.clone()),
    )
}

fn double_right<K: Clone, V: Clone>(
    l: &Node<K, V>,
    key: K,
    value: V,
    z: Tree<K, V>,
) -> Tree<K, V> {
    let Some(lr) = l.right.as_deref() else {
        return single_right(l, key, value, z);
    };
    make(
        make(l.left.clone(), l.key.clone(), l.value.clone(), lr.left.clone()),
        lr.key.clone(),
        lr.value.clone(),
        make(lr.right.clone(), key, value, z),
    )
}

/// Joins two subtrees around a key, rotating when one side outweighs the other
/// by more than `DELTA`.
fn join<K: Clone, V: Clone>(l: Tree<K, V>, key: K, value: V, r: Tree<K, V>) -> Tree<K, V> {
    let lw = weight(&l);
    let rw = weight(&r);
    if rw > DELTA * lw {
        if let Some(rn) = r.as_deref() {
            return if weight(&rn.left) < GAMMA * weight(&rn.right) {
                single_left(l, key, value, rn)
            } else {
                double_left(l, key, value, rn)
            };
        }
    } else if lw > DELTA * rw {
        if let Some(ln) = l.as_deref() {
            return if weight(&ln.right) < GAMMA * weight(&ln.left) {
                single_right(ln, key, value, r)
            } else {
                double_right(ln, key, value, r)
            };
        }
    }
    make(l, key, value, r)
}

fn lookup<'a, K: Ord, V>(mut tree: &'a Tree<K, V>, key: &K) -> Option<&'a V> {
    while let Some(node) = tree.as_deref() {
        match key.cmp(&node.key) {
            Ordering::Less => tree = &node.left,
            Ordering::Greater => tree = &node.right,
            Ordering::Equal => return Some(&node.value),
        }
    }
    None
}

fn insert<K: Ord + Clone, V: Clone>(tree: &Tree<K, V>, key: K, value: V) -> Tree<K, V> {
    let Some(node) = tree.as_deref() else {
        return make(None, key, value, None);
    };
    match key.cmp(&node.key) {
        Ordering::Less => join(
            insert(&node.left, key, value),
            node.key.clone(),
            node.value.clone(),
            node.right.clone(),
        ),
        Ordering::Greater => join(
            node.left.clone(),
            node.key.clone(),
            node.value.clone(),
            insert(&node.right, key, value),
        ),
        Ordering::Equal => make(node.left.clone(), key, value, node.right.clone()),
    }
}

fn adjust<K: Ord + Clone, V: Clone>(
    tree: &Tree<K, V>,
    key: &K,
    f: impl FnOnce(&V) -> V,
) -> Tree<K, V> {
    let Some(node) = tree.as_deref() else {
        return None;
    };
    match key.cmp(&node.key) {
        Ordering::Less => make(
            adjust(&node.left, key, f),
            node.key.clone(),
            node.value.clone(),
            node.right.clone(),
        ),
        Ordering::Greater => make(
            node.left.clone(),
            node.key.clone(),
            node.value.clone(),
            adjust(&node.right, key, f),
        ),
        Ordering::Equal => make(
            node.left.clone(),
            node.key.clone(),
            f(&node.value),
            node.right.clone(),
        ),
    }
}

/// Removes the minimum entry, returning it with the remaining tree.
fn pop_min<K: Clone, V: Clone>(node: &Node<K, V>) -> (K, V, Tree<K, V>) {
    match node.left.as_deref() {
        None => (node.key.clone(), node.value.clone(), node.right.clone()),
        Some(left) => {
            let (key, value, rest) = pop_min(left);
            (
                key,
                value,
                join(rest, node.key.clone(), node.value.clone(), node.right.clone()),
            )
        }
    }
}

fn delete<K: Ord + Clone, V: Clone>(tree: &Tree<K, V>, key: &K) -> Tree<K, V> {
    let Some(node) = tree.as_deref() else {
        return None;
    };
    match key.cmp(&node.key) {
        Ordering::Less => join(
            delete(&node.left, key),
            node.key.clone(),
            node.value.clone(),
            node.right.clone(),
        ),
        Ordering::Greater => join(
            node.left.clone(),
            node.key.clone(),
            node.value.clone(),
            delete(&node.right, key),
        ),
        Ordering::Equal => match (node.left.as_ref(), node.right.as_deref()) {
            (_, None) => node.left.clone(),
            (None, Some(_)) => node.right.clone(),
            (Some(_), Some(right)) => {
                let (min_key, min_value, rest) = pop_min(right);
                join(node.left.clone(), min_key, min_value, rest)
            }
        },
    }
}

fn nth<K, V>(mut tree: &Tree<K, V>, mut index: usize) -> Option<(&K, &V)> {
    while let Some(node) = tree.as_deref() {
        let left = size(&node.left);
        match index.cmp(&left) {
            Ordering::Less => tree = &node.left,
            Ordering::Equal => return Some((&node.key, &node.value)),
            Ordering::Greater => {
                index -= left + 1;
                tree = &node.right;
            }
        }
    }
    None
}

fn depth<K, V>(tree: &Tree<K, V>) -> usize {
    tree.as_deref()
        .map_or(0, |node| 1 + depth(&node.left).max(depth(&node.right)))
}

fn balanced<K: Ord, V>(tree: &Tree<K, V>, lower: Option<&K>, upper: Option<&K>) -> bool {
    let Some(node) = tree.as_deref() else {
        return true;
    };
    let lw = weight(&node.left);
    let rw = weight(&node.right);
    let ordered = lower.map_or(true, |lo| lo < &node.key) && upper.map_or(true, |hi| &node.key < hi);
    ordered
        && node.size == size(&node.left) + size(&node.right) + 1
        && rw <= DELTA * lw
        && lw <= DELTA * rw
        && balanced(&node.left, lower, Some(&node.key))
        && balanced(&node.right, Some(&node.key), upper)
}

/// Immutable ordered map backed by a weight-balanced binary search tree.
///
/// Cloning is O(1). `lookup` returns `Option<&V>`, so absence is never encoded
/// as a stored value.
pub struct PersistentMap<K, V> {
    root: Tree<K, V>,
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            root: self.root.clone(),
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self { root: None }
    }
}

impl<K: Ord + Clone, V: Clone> PersistentMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value bound to `key`, if any.
    pub fn lookup(&self, key: &K) -> Option<&V> {
        lookup(&self.root, key)
    }

    /// Returns whether `key` is bound.
    pub fn contains(&self, key: &K) -> bool {
        self.lookup(key).is_some()
    }

    /// Returns a new map with `key` bound to `value`.
    pub fn insert(&self, key: K, value: V) -> Self {
        Self {
            root: insert(&self.root, key, value),
        }
    }

    /// Returns a new map with `f` applied to the value at `key`.
    ///
    /// Returns a map sharing this map's root when the key is absent.
    pub fn adjust(&self, key: &K, f: impl FnOnce(&V) -> V) -> Self {
        if !self.contains(key) {
            return self.clone();
        }
        Self {
            root: adjust(&self.root, key, f),
        }
    }

    /// Returns a new map without `key`.
    pub fn delete(&self, key: &K) -> Self {
        if !self.contains(key) {
            return self.clone();
        }
        Self {
            root: delete(&self.root, key),
        }
    }

    /// Returns the entry with the given rank in key order.
    pub fn nth(&self, index: usize) -> Option<(&K, &V)> {
        nth(&self.root, index)
    }

    /// Returns the entry with the smallest key.
    pub fn min(&self) -> Option<(&K, &V)> {
        self.nth(0)
    }

    /// Returns whether sizes, ordering and the weight-balance invariant hold at every node.
    pub fn is_balanced(&self) -> bool {
        balanced(&self.root, None, None)
    }
}

impl<K, V> PersistentMap<K, V> {
    /// Number of entries.
    pub fn len(&self) -> usize {
        size(&self.root)
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Height of the underlying tree.
    pub fn depth(&self) -> usize {
        depth(&self.root)
    }

    /// In-order iterator over entries.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter { stack: Vec::new() };
        iter.descend(&self.root);
        iter
    }

    /// In-order iterator over keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(key, _)| key)
    }

    /// In-order iterator over values.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    /// Whether both maps share the same root allocation.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

/// In-order iterator over a [`PersistentMap`].
pub struct Iter<'a, K, V> {
    stack: Vec<&'a Node<K, V>>,
}

impl<'a, K, V> Iter<'a, K, V> {
    fn descend(&mut self, mut tree: &'a Tree<K, V>) {
        while let Some(node) = tree.as_deref() {
            self.stack.push(node);
            tree = &node.left;
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.descend(&node.right);
        Some((&node.key, &node.value))
    }
}

impl<K: Ord + Clone, V: Clone> FromIterator<(K, V)> for PersistentMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |map, (key, value)| map.insert(key, value))
    }
}

impl<K: PartialEq, V: PartialEq> PartialEq for PersistentMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Ordered set view over a [`PersistentMap`] with unit values.
pub struct PersistentSet<K> {
    map: PersistentMap<K, ()>,
}

impl<K> Clone for PersistentSet<K> {
    fn clone(&self) -> Self {
        Self {
            map: self.map.clone(),
        }
    }
}

impl<K> Default for PersistentSet<K> {
    fn default() -> Self {
        Self {
            map: PersistentMap::default(),
        }
    }
}

impl<K: Ord + Clone> PersistentSet<K> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `key` is a member.
    pub fn contains(&self, key: &K) -> bool {
        self.map.contains(key)
    }

    /// Returns a new set including `key`.
    pub fn insert(&self, key: K) -> Self {
        Self {
            map: self.map.insert(key, ()),
        }
    }

    /// Returns a new set without `key`.
    pub fn remove(&self, key: &K) -> Self {
        Self {
            map: self.map.delete(key),
        }
    }

    /// Returns the member with the given rank.
    pub fn nth(&self, index: usize) -> Option<&K> {
        self.map.nth(index).map(|(key, _)| key)
    }
}

impl<K> PersistentSet<K> {
    /// Number of members.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// In-order iterator over members.
    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }
}

impl<K: Ord + Clone> FromIterator<K> for PersistentSet<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        iter.into_iter().fold(Self::new(), |set, key| set.insert(key))
    }
}

impl<K: PartialEq> PartialEq for PersistentSet<K> {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl<K: fmt::Debug> fmt::Debug for PersistentSet<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
