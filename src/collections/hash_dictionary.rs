//! Persistent AVL tree keyed by integer hash (spec §3.1, §4.6). `Set`,
//! `CountedSet` and the index layer are all built on top of this one
//! structure rather than re-deriving their own balanced tree, mirroring
//! how the Python original layers `Set`/`CountedSet` over `HashDictionary`.

use std::cmp::max;
use std::rc::Rc;

use crate::atom::{AtomPointer, AtomValue};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Node {
    key: i64,
    value: AtomValue,
    left: Link,
    right: Link,
    height: u32,
}

type Link = Option<Rc<Node>>;

fn height(n: &Link) -> u32 {
    n.as_ref().map_or(0, |n| n.height)
}

fn balance_factor(n: &Node) -> i32 {
    height(&n.right) as i32 - height(&n.left) as i32
}

fn make(key: i64, value: AtomValue, left: Link, right: Link) -> Rc<Node> {
    Rc::new(Node {
        height: 1 + max(height(&left), height(&right)),
        key,
        value,
        left,
        right,
    })
}

fn rotate_left(n: &Node) -> Rc<Node> {
    let r = n.right.as_ref().expect("rotate_left requires a right child").clone();
    let new_left = make(n.key, n.value.clone(), n.left.clone(), r.left.clone());
    make(r.key, r.value.clone(), Some(new_left), r.right.clone())
}

fn rotate_right(n: &Node) -> Rc<Node> {
    let l = n.left.as_ref().expect("rotate_right requires a left child").clone();
    let new_right = make(n.key, n.value.clone(), l.right.clone(), n.right.clone());
    make(l.key, l.value.clone(), l.left.clone(), Some(new_right))
}

fn rebalance(n: Rc<Node>) -> Rc<Node> {
    let bf = balance_factor(&n);
    if bf > 1 {
        let right = n.right.as_ref().unwrap();
        if balance_factor(right) < 0 {
            let new_right = rotate_right(right);
            let n = make(n.key, n.value.clone(), n.left.clone(), Some(new_right));
            rotate_left(&n)
        } else {
            rotate_left(&n)
        }
    } else if bf < -1 {
        let left = n.left.as_ref().unwrap();
        if balance_factor(left) > 0 {
            let new_left = rotate_left(left);
            let n = make(n.key, n.value.clone(), Some(new_left), n.right.clone());
            rotate_right(&n)
        } else {
            rotate_right(&n)
        }
    } else {
        n
    }
}

fn insert(n: &Link, key: i64, value: AtomValue) -> Rc<Node> {
    match n {
        None => make(key, value, None, None),
        Some(node) => {
            if key < node.key {
                let new_left = insert(&node.left, key, value);
                rebalance(make(node.key, node.value.clone(), Some(new_left), node.right.clone()))
            } else if key > node.key {
                let new_right = insert(&node.right, key, value);
                rebalance(make(node.key, node.value.clone(), node.left.clone(), Some(new_right)))
            } else {
                make(key, value, node.left.clone(), node.right.clone())
            }
        }
    }
}

fn min_node(node: &Node) -> (i64, AtomValue) {
    match &node.left {
        None => (node.key, node.value.clone()),
        Some(l) => min_node(l),
    }
}

fn remove_min(node: &Node) -> Link {
    match &node.left {
        None => node.right.clone(),
        Some(l) => {
            let new_left = remove_min(l);
            Some(rebalance(make(node.key, node.value.clone(), new_left, node.right.clone())))
        }
    }
}

fn remove(n: &Link, key: i64) -> Link {
    match n {
        None => None,
        Some(node) => {
            if key < node.key {
                let new_left = remove(&node.left, key);
                Some(rebalance(make(node.key, node.value.clone(), new_left, node.right.clone())))
            } else if key > node.key {
                let new_right = remove(&node.right, key);
                Some(rebalance(make(node.key, node.value.clone(), node.left.clone(), new_right)))
            } else {
                match (&node.left, &node.right) {
                    (None, None) => None,
                    (Some(left), None) => Some(left.clone()),
                    (None, Some(right)) => Some(right.clone()),
                    (Some(_), Some(right)) => {
                        let (succ_key, succ_value) = min_node(right);
                        let new_right = remove_min(right);
                        Some(rebalance(make(succ_key, succ_value, node.left.clone(), new_right)))
                    }
                }
            }
        }
    }
}

fn get(n: &Link, key: i64) -> Option<AtomValue> {
    n.as_ref().and_then(|node| {
        if key < node.key {
            get(&node.left, key)
        } else if key > node.key {
            get(&node.right, key)
        } else {
            Some(node.value.clone())
        }
    })
}

fn in_order(n: &Link, out: &mut Vec<(i64, AtomValue)>) {
    if let Some(node) = n {
        in_order(&node.left, out);
        out.push((node.key, node.value.clone()));
        in_order(&node.right, out);
    }
}

fn node_count(n: &Link) -> usize {
    match n {
        None => 0,
        Some(node) => 1 + node_count(&node.left) + node_count(&node.right),
    }
}

fn max_abs_balance(n: &Link) -> i32 {
    match n {
        None => 0,
        Some(node) => {
            let here = balance_factor(node).abs();
            here.max(max_abs_balance(&node.left)).max(max_abs_balance(&node.right))
        }
    }
}

/// Persistent, integer-keyed balanced tree (spec §4.6). In-order traversal
/// yields `(key, value)` ascending by key.
#[derive(Debug, Clone, Default)]
pub struct HashDictionary {
    pub pointer: Option<AtomPointer>,
    root: Link,
}

impl HashDictionary {
    pub fn new() -> Self {
        HashDictionary { pointer: None, root: None }
    }

    pub fn len(&self) -> usize {
        node_count(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn get_at(&self, key: i64) -> Option<AtomValue> {
        get(&self.root, key)
    }

    pub fn has(&self, key: i64) -> bool {
        self.get_at(key).is_some()
    }

    pub fn set_at(&self, key: i64, value: AtomValue) -> HashDictionary {
        HashDictionary {
            pointer: None,
            root: Some(insert(&self.root, key, value)),
        }
    }

    /// Removing an absent key is a no-op, returning a structurally
    /// identical tree (spec §3.1 collections are total over `remove_at`).
    pub fn remove_at(&self, key: i64) -> Result<HashDictionary> {
        Ok(HashDictionary {
            pointer: None,
            root: remove(&self.root, key),
        })
    }

    /// Set-union keyed by hash, with `other` winning on key collisions
    /// (spec §4.6: "`merge(other)` yields the set-union with 'other'
    /// winning on key collisions").
    pub fn merge(&self, other: &HashDictionary) -> HashDictionary {
        let mut result = self.clone();
        result.pointer = None;
        for (k, v) in other.entries() {
            result = result.set_at(k, v);
        }
        result
    }

    pub fn entries(&self) -> Vec<(i64, AtomValue)> {
        let mut out = Vec::with_capacity(self.len());
        in_order(&self.root, &mut out);
        out
    }

    pub fn values(&self) -> Vec<AtomValue> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, AtomValue)> {
        self.entries().into_iter()
    }

    pub fn max_abs_balance(&self) -> i32 {
        max_abs_balance(&self.root)
    }
}

#[cfg(test)]
#[path = "hash_dictionary_test.rs"]
mod hash_dictionary_test;
