//! Persistent AVL-balanced ordered list (spec §3.1, §4.6).
//!
//! Keyed implicitly by in-order position rather than by a sort key (an
//! "order-statistics tree"): every node tracks the size of its subtree
//! (`count`) so indexing, insertion and removal at a given position can
//! all walk down in O(log n) comparisons. Every mutator returns a new
//! root; unchanged subtrees are shared via `Rc`, mirroring the teacher's
//! node layout (`count`/`height` fields alongside `left`/`right`) while
//! replacing its in-place red-black rebalancing with immutable AVL
//! rotations, per spec §4.6.

use std::cmp::max;
use std::rc::Rc;

use crate::atom::AtomPointer;
use crate::collections::index_registry::{IndexDefinition, IndexRegistry};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Node {
    value: crate::atom::AtomValue,
    left: Link,
    right: Link,
    height: u32,
    count: usize,
}

type Link = Option<Rc<Node>>;

fn height(n: &Link) -> u32 {
    n.as_ref().map_or(0, |n| n.height)
}

fn count(n: &Link) -> usize {
    n.as_ref().map_or(0, |n| n.count)
}

fn balance_factor(n: &Node) -> i32 {
    height(&n.right) as i32 - height(&n.left) as i32
}

fn make(value: crate::atom::AtomValue, left: Link, right: Link) -> Rc<Node> {
    Rc::new(Node {
        height: 1 + max(height(&left), height(&right)),
        count: 1 + count(&left) + count(&right),
        value,
        left,
        right,
    })
}

fn rotate_left(n: &Node) -> Rc<Node> {
    let r = n.right.as_ref().expect("rotate_left requires a right child").clone();
    let new_left = make(n.value.clone(), n.left.clone(), r.left.clone());
    make(r.value.clone(), Some(new_left), r.right.clone())
}

fn rotate_right(n: &Node) -> Rc<Node> {
    let l = n.left.as_ref().expect("rotate_right requires a left child").clone();
    let new_right = make(n.value.clone(), l.right.clone(), n.right.clone());
    make(l.value.clone(), l.left.clone(), Some(new_right))
}

fn rebalance(n: Rc<Node>) -> Rc<Node> {
    let bf = balance_factor(&n);
    if bf > 1 {
        let right = n.right.as_ref().unwrap();
        if balance_factor(right) < 0 {
            let new_right = rotate_right(right);
            let n = make(n.value.clone(), n.left.clone(), Some(new_right));
            rotate_left(&n)
        } else {
            rotate_left(&n)
        }
    } else if bf < -1 {
        let left = n.left.as_ref().unwrap();
        if balance_factor(left) > 0 {
            let new_left = rotate_left(left);
            let n = make(n.value.clone(), Some(new_left), n.right.clone());
            rotate_right(&n)
        } else {
            rotate_right(&n)
        }
    } else {
        n
    }
}

fn insert_at(n: &Link, i: usize, value: crate::atom::AtomValue) -> Rc<Node> {
    match n {
        None => make(value, None, None),
        Some(node) => {
            let l = count(&node.left);
            if i <= l {
                let new_left = insert_at(&node.left, i, value);
                rebalance(make(node.value.clone(), Some(new_left), node.right.clone()))
            } else {
                let new_right = insert_at(&node.right, i - l - 1, value);
                rebalance(make(node.value.clone(), node.left.clone(), Some(new_right)))
            }
        }
    }
}

fn min_value(node: &Node) -> crate::atom::AtomValue {
    match &node.left {
        None => node.value.clone(),
        Some(l) => min_value(l),
    }
}

fn remove_min(node: &Node) -> Link {
    match &node.left {
        None => node.right.clone(),
        Some(l) => {
            let new_left = remove_min(l);
            Some(rebalance(make(node.value.clone(), new_left, node.right.clone())))
        }
    }
}

fn remove_at(n: &Link, i: usize) -> Link {
    match n {
        None => None,
        Some(node) => {
            let l = count(&node.left);
            if i < l {
                let new_left = remove_at(&node.left, i);
                Some(rebalance(make(node.value.clone(), new_left, node.right.clone())))
            } else if i > l {
                let new_right = remove_at(&node.right, i - l - 1);
                Some(rebalance(make(node.value.clone(), node.left.clone(), new_right)))
            } else {
                match (&node.left, &node.right) {
                    (None, None) => None,
                    (Some(left), None) => Some(left.clone()),
                    (None, Some(right)) => Some(right.clone()),
                    (Some(_), Some(right)) => {
                        let succ = min_value(right);
                        let new_right = remove_min(right);
                        Some(rebalance(make(succ, node.left.clone(), new_right)))
                    }
                }
            }
        }
    }
}

fn set_at(n: &Link, i: usize, value: crate::atom::AtomValue) -> Rc<Node> {
    match n {
        None => make(value, None, None),
        Some(node) => {
            let l = count(&node.left);
            if i < l {
                let new_left = set_at(&node.left, i, value);
                rebalance(make(node.value.clone(), Some(new_left), node.right.clone()))
            } else if i == l {
                make(value, node.left.clone(), node.right.clone())
            } else {
                // `i == count` (the append case) recurses past every
                // existing node down to the `None` arm above, so this
                // branch's rebuild must rebalance just like `insert_at`
                // or repeated appends skew the tree (spec §8 `max_abs_balance`).
                let new_right = set_at(&node.right, i - l - 1, value);
                rebalance(make(node.value.clone(), node.left.clone(), Some(new_right)))
            }
        }
    }
}

fn get_at(n: &Link, i: usize) -> Option<crate::atom::AtomValue> {
    n.as_ref().and_then(|node| {
        let l = count(&node.left);
        if i < l {
            get_at(&node.left, i)
        } else if i == l {
            Some(node.value.clone())
        } else {
            get_at(&node.right, i - l - 1)
        }
    })
}

fn in_order(n: &Link, out: &mut Vec<crate::atom::AtomValue>) {
    if let Some(node) = n {
        in_order(&node.left, out);
        out.push(node.value.clone());
        in_order(&node.right, out);
    }
}

/// Max AVL balance factor observed in the subtree, used only by the
/// property tests (spec §8: "AVL balance factor ... within [-1, +1]").
fn max_abs_balance(n: &Link) -> i32 {
    match n {
        None => 0,
        Some(node) => {
            let here = balance_factor(node).abs();
            here.max(max_abs_balance(&node.left)).max(max_abs_balance(&node.right))
        }
    }
}

/// Persistent, immutable, structurally-shared ordered list (spec §4.6).
///
/// `indexes`, when present, mirrors every element currently in the list
/// (spec: "may carry an index registry"); mutators that change membership
/// keep it in sync via `with_add`/`with_remove`/`with_replace`.
#[derive(Debug, Clone, Default)]
pub struct List {
    pub pointer: Option<AtomPointer>,
    root: Link,
    indexes: Option<IndexRegistry>,
}

impl List {
    pub fn new() -> Self {
        List {
            pointer: None,
            root: None,
            indexes: None,
        }
    }

    pub fn from_vec(values: Vec<crate::atom::AtomValue>) -> Self {
        let mut list = List::new();
        for v in values {
            list = list.append_last(v);
        }
        list
    }

    pub fn indexes(&self) -> Option<&IndexRegistry> {
        self.indexes.as_ref()
    }

    /// Registers `definition` and builds its bucket dictionary from every
    /// element currently in the list (spec §4.6 `add_index`). Each
    /// element acts as its own object id, since list membership alone
    /// identifies it.
    pub fn add_index(&self, definition: IndexDefinition) -> Result<List> {
        let elements: Vec<_> = self.to_vec();
        let pairs: Vec<_> = elements.iter().map(|e| (e.clone(), e.clone())).collect();
        let registry = self.indexes.clone().unwrap_or_default().add_index(definition, &pairs)?;
        Ok(List {
            pointer: None,
            root: self.root.clone(),
            indexes: Some(registry),
        })
    }

    pub fn remove_index(&self, name: &str) -> List {
        List {
            pointer: None,
            root: self.root.clone(),
            indexes: self.indexes.as_ref().map(|r| r.remove_index(name)),
        }
    }

    /// Reattaches an index registry carried over from a prior version of
    /// this list (used by the atom save path, which rebuilds elements
    /// without touching membership).
    pub(crate) fn with_indexes(&self, indexes: IndexRegistry) -> List {
        List {
            pointer: None,
            root: self.root.clone(),
            indexes: Some(indexes),
        }
    }

    pub fn len(&self) -> usize {
        count(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn resolve_index(&self, i: i64) -> Option<usize> {
        let n = self.len() as i64;
        let idx = if i < 0 { n + i } else { i };
        if idx < 0 || idx >= n {
            None
        } else {
            Some(idx as usize)
        }
    }

    /// Negative indices count from the end; out-of-range returns `None`
    /// (spec §8 boundary behavior).
    pub fn get_at(&self, i: i64) -> Option<crate::atom::AtomValue> {
        let idx = self.resolve_index(i)?;
        get_at(&self.root, idx)
    }

    /// `set_at(count, v)` appends; `set_at(i, v)` for `i > count` raises
    /// (spec §9 resolution of the `set_at` Open Question).
    pub fn set_at(&self, i: i64, value: crate::atom::AtomValue) -> Result<List> {
        let n = self.len() as i64;
        let idx = if i < 0 { n + i } else { i };
        if idx < 0 || idx > n {
            return Err(Error::validation(format!("index {} out of range for list of len {}", i, n)));
        }
        let old = get_at(&self.root, idx as usize);
        let root = Some(set_at(&self.root, idx as usize, value.clone()));
        let indexes = self.reindex_replace(old.as_ref(), &value)?;
        Ok(List { pointer: None, root, indexes })
    }

    pub fn insert_at(&self, i: i64, value: crate::atom::AtomValue) -> Result<List> {
        let n = self.len() as i64;
        let idx = if i < 0 { n + i } else { i };
        if idx < 0 || idx > n {
            return Err(Error::validation(format!("index {} out of range for list of len {}", i, n)));
        }
        let root = Some(insert_at(&self.root, idx as usize, value.clone()));
        let indexes = self.reindex_add(&value)?;
        Ok(List { pointer: None, root, indexes })
    }

    pub fn remove_at(&self, i: i64) -> Result<List> {
        let idx = self
            .resolve_index(i)
            .ok_or_else(|| Error::validation(format!("index {} out of range for list of len {}", i, self.len())))?;
        let removed = get_at(&self.root, idx);
        let indexes = self.reindex_remove(removed.as_ref())?;
        Ok(List {
            pointer: None,
            root: remove_at(&self.root, idx),
            indexes,
        })
    }

    pub fn append_first(&self, value: crate::atom::AtomValue) -> List {
        let indexes = self.reindex_add(&value).expect("append_first index update");
        List {
            pointer: None,
            root: Some(insert_at(&self.root, 0, value)),
            indexes,
        }
    }

    pub fn append_last(&self, value: crate::atom::AtomValue) -> List {
        let n = self.len();
        let indexes = self.reindex_add(&value).expect("append_last index update");
        List {
            pointer: None,
            root: Some(insert_at(&self.root, n, value)),
            indexes,
        }
    }

    fn reindex_add(&self, value: &crate::atom::AtomValue) -> Result<Option<IndexRegistry>> {
        match &self.indexes {
            None => Ok(None),
            Some(registry) => Ok(Some(registry.with_add(value.clone(), value)?)),
        }
    }

    fn reindex_remove(&self, value: Option<&crate::atom::AtomValue>) -> Result<Option<IndexRegistry>> {
        match (&self.indexes, value) {
            (None, _) => Ok(None),
            (Some(registry), Some(value)) => Ok(Some(registry.with_remove(value, value)?)),
            (Some(registry), None) => Ok(Some(registry.clone())),
        }
    }

    fn reindex_replace(
        &self,
        old: Option<&crate::atom::AtomValue>,
        new: &crate::atom::AtomValue,
    ) -> Result<Option<IndexRegistry>> {
        match (&self.indexes, old) {
            (None, _) => Ok(None),
            (Some(registry), Some(old)) => Ok(Some(registry.with_replace(new.clone(), old, new)?)),
            (Some(registry), None) => Ok(Some(registry.with_add(new.clone(), new)?)),
        }
    }

    pub fn head(&self, n: usize) -> List {
        let mut out = self.to_vec();
        out.truncate(n);
        List::from_vec(out)
    }

    pub fn tail(&self, n: usize) -> List {
        let out = self.to_vec();
        let start = n.min(out.len());
        List::from_vec(out[start..].to_vec())
    }

    pub fn slice(&self, a: usize, b: usize) -> List {
        self.tail(a).head(b.saturating_sub(a))
    }

    pub fn extend(&self, other: &List) -> List {
        let mut result = self.clone();
        result.pointer = None;
        for v in other.to_vec() {
            result = result.append_last(v);
        }
        result
    }

    pub fn to_vec(&self) -> Vec<crate::atom::AtomValue> {
        let mut out = Vec::with_capacity(self.len());
        in_order(&self.root, &mut out);
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = crate::atom::AtomValue> {
        self.to_vec().into_iter()
    }

    /// For property tests: the maximum `|balance factor|` across every
    /// node visited, which must stay within `[-1, 1]` (spec §8).
    pub fn max_abs_balance(&self) -> i32 {
        max_abs_balance(&self.root)
    }
}

#[cfg(test)]
#[path = "list_test.rs"]
mod list_test;
