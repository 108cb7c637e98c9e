//! A persistent treap whose nodes carry values from an *ordered monoid*,
//! allowing O(log n) lookup by any key the monoid knows how to compare
//! against a prefix combination. The same tree can be addressed by several
//! keys at once (eg. a text tree addressed by byte offset or by 2d point),
//! because the descent only ever asks the value "have we reached the key
//! yet?".
//!
//! Trees are immutable: [`Tree::merge`] and [`Tree::split`] allocate new
//! nodes along the touched spine and share everything else, so older trees
//! remain valid and cheap to keep around (for snapshots, undo data and the
//! like).
//!
//! Balance comes from random heap priorities assigned at node creation.
//! Priorities are drawn from a fixed-seed thread-local generator, so a test
//! run always builds the same shapes.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

mod iter;

pub use iter::TreeIter;

/// A monoid: an identity element and an associative `combine`.
///
/// "Ordered" adds two predicates comparing a combined value against a lookup
/// key. For the tree descent to be meaningful they must be monotonic in
/// monoid multiplication: once a growing prefix combination reaches a key,
/// combining more values on the right must not un-reach it.
pub trait OrderedMonoid: Clone {
    type Key: Copy;

    fn identity() -> Self;
    fn combine(a: &Self, b: &Self) -> Self;

    /// Whether the value is strictly greater than the key.
    fn exceeds(&self, key: Self::Key) -> bool;

    /// Whether the value is greater than or equal to the key.
    fn reaches(&self, key: Self::Key) -> bool;
}

/// `value` combines the whole subtree. `self_value` is only materialized
/// once the node gains children; for leaves `value` *is* the node's own
/// value. `h` is the treap heap priority.
pub(crate) struct Node<D, V> {
    pub(crate) data: D,
    pub(crate) value: V,
    pub(crate) self_value: Option<V>,
    h: u64,
    pub(crate) left: Link<D, V>,
    pub(crate) right: Link<D, V>,
}

pub(crate) type Link<D, V> = Option<Rc<Node<D, V>>>;

impl<D, V> Node<D, V> {
    /// The value of just this node, children excluded.
    pub(crate) fn own_value(&self) -> &V {
        self.self_value.as_ref().unwrap_or(&self.value)
    }
}

thread_local! {
    static PRIORITIES: RefCell<SmallRng> =
        RefCell::new(SmallRng::seed_from_u64(0x6d74_7265_6531));
}

fn next_priority() -> u64 {
    PRIORITIES.with(|rng| rng.borrow_mut().gen())
}

/// A detached copy of a node: same data and priority, no children, value
/// reset to the node's own value.
fn detach<D: Clone, V: OrderedMonoid>(node: &Node<D, V>) -> Node<D, V> {
    Node {
        data: node.data.clone(),
        value: node.own_value().clone(),
        self_value: None,
        h: node.h,
        left: None,
        right: None,
    }
}

/// Attaches children to a freshly created or detached node, recomputing the
/// subtree value. `node` must not already have children.
fn set_children<D, V: OrderedMonoid>(
    mut node: Node<D, V>,
    left: Link<D, V>,
    right: Link<D, V>,
) -> Node<D, V> {
    debug_assert!(node.left.is_none() && node.right.is_none());
    if node.self_value.is_none() && (left.is_some() || right.is_some()) {
        node.self_value = Some(node.value.clone());
    }
    if let Some(left) = left {
        node.value = V::combine(&left.value, &node.value);
        node.left = Some(left);
    }
    if let Some(right) = right {
        node.value = V::combine(&node.value, &right.value);
        node.right = Some(right);
    }
    node
}

fn merge_nodes<D: Clone, V: OrderedMonoid>(left: &Link<D, V>, right: &Link<D, V>) -> Link<D, V> {
    match (left, right) {
        (None, _) => right.clone(),
        (_, None) => left.clone(),
        (Some(l), Some(r)) => {
            if l.h > r.h {
                let merged = merge_nodes(&l.right, right);
                Some(Rc::new(set_children(detach(l), l.left.clone(), merged)))
            } else {
                let merged = merge_nodes(left, &r.left);
                Some(Rc::new(set_children(detach(r), merged, r.right.clone())))
            }
        }
    }
}

/// The left part receives all nodes up to `key`. A node straddling the key
/// goes to whichever side `straddle_to_left` says.
fn split_nodes<D: Clone, V: OrderedMonoid>(
    root: &Link<D, V>,
    key: V::Key,
    straddle_to_left: bool,
    current: &V,
) -> (Link<D, V>, Link<D, V>) {
    let Some(node) = root else {
        return (None, None);
    };
    let before = match &node.left {
        Some(left) => V::combine(current, &left.value),
        None => current.clone(),
    };
    let after = V::combine(&before, node.own_value());
    let node_to_left = if before.reaches(key) {
        false
    } else if after.exceeds(key) {
        straddle_to_left
    } else {
        true
    };
    if node_to_left {
        let (l, r) = split_nodes(&node.right, key, straddle_to_left, &after);
        (
            Some(Rc::new(set_children(detach(node), node.left.clone(), l))),
            r,
        )
    } else {
        let (l, r) = split_nodes(&node.left, key, straddle_to_left, current);
        (
            l,
            Some(Rc::new(set_children(detach(node), r, node.right.clone()))),
        )
    }
}

fn split_first_node<D: Clone, V: OrderedMonoid>(root: &Link<D, V>) -> (Link<D, V>, Link<D, V>) {
    let Some(node) = root else {
        return (None, None);
    };
    if node.left.is_some() {
        let (first, rest) = split_first_node(&node.left);
        (
            first,
            Some(Rc::new(set_children(detach(node), rest, node.right.clone()))),
        )
    } else {
        (Some(Rc::new(detach(node))), node.right.clone())
    }
}

fn split_last_node<D: Clone, V: OrderedMonoid>(root: &Link<D, V>) -> (Link<D, V>, Link<D, V>) {
    let Some(node) = root else {
        return (None, None);
    };
    if node.right.is_some() {
        let (rest, last) = split_last_node(&node.right);
        (
            Some(Rc::new(set_children(detach(node), node.left.clone(), rest))),
            last,
        )
    } else {
        (node.left.clone(), Some(Rc::new(detach(node))))
    }
}

/// An immutable tree of `(data, value)` pairs which efficiently computes
/// monoid combinations of contiguous ranges and locates positions by lookup
/// key. Cloning a tree is O(1).
pub struct Tree<D, V: OrderedMonoid> {
    root: Link<D, V>,
}

impl<D, V: OrderedMonoid> Clone for Tree<D, V> {
    fn clone(&self) -> Self {
        Tree {
            root: self.root.clone(),
        }
    }
}

pub struct Split<D, V: OrderedMonoid> {
    pub left: Tree<D, V>,
    pub middle: Tree<D, V>,
    pub right: Tree<D, V>,
}

impl<D: Clone, V: OrderedMonoid> Tree<D, V> {
    pub fn new() -> Self {
        Tree { root: None }
    }

    /// Builds a tree from a sequence of data and matching values in
    /// amortized O(n), using the stack-based Cartesian tree construction
    /// over the nodes' priorities.
    ///
    /// Panics when the lengths differ; that is a caller bug, not a
    /// recoverable condition.
    pub fn build(data: Vec<D>, values: Vec<V>) -> Self {
        assert_eq!(
            data.len(),
            values.len(),
            "data and values must be of the same length"
        );
        let n = data.len();
        let mut nodes: Vec<Node<D, V>> = data
            .into_iter()
            .zip(values)
            .map(|(data, value)| Node {
                data,
                value,
                self_value: None,
                h: next_priority(),
                left: None,
                right: None,
            })
            .collect();
        if n == 0 {
            return Tree { root: None };
        }
        if n == 1 {
            return Tree {
                root: Some(Rc::new(nodes.pop().unwrap())),
            };
        }

        const NIL: usize = usize::MAX;

        // Nearest index to the left with a strictly higher priority.
        let mut stack: Vec<usize> = Vec::with_capacity(n);
        let mut left_parent = vec![NIL; n];
        for i in 0..n {
            while stack.last().is_some_and(|&j| nodes[j].h <= nodes[i].h) {
                stack.pop();
            }
            left_parent[i] = stack.last().copied().unwrap_or(NIL);
            stack.push(i);
        }
        stack.clear();

        // Same from the right; the true parent is whichever neighbour has
        // the lower priority.
        let mut left = vec![NIL; n];
        let mut right = vec![NIL; n];
        let mut root = NIL;
        for i in (0..n).rev() {
            while stack.last().is_some_and(|&j| nodes[j].h <= nodes[i].h) {
                stack.pop();
            }
            let mut parent = stack.last().copied().unwrap_or(NIL);
            if parent == NIL || (left_parent[i] != NIL && nodes[left_parent[i]].h < nodes[parent].h)
            {
                parent = left_parent[i];
            }
            if parent == NIL {
                root = i;
            } else if parent > i {
                left[parent] = i;
            } else {
                right[parent] = i;
            }
            stack.push(i);
        }

        fn attach<D: Clone, V: OrderedMonoid>(
            i: usize,
            slots: &mut [Option<Node<D, V>>],
            left: &[usize],
            right: &[usize],
        ) -> Rc<Node<D, V>> {
            const NIL: usize = usize::MAX;
            let l = (left[i] != NIL).then(|| attach(left[i], slots, left, right));
            let r = (right[i] != NIL).then(|| attach(right[i], slots, left, right));
            let node = slots[i].take().unwrap();
            Rc::new(set_children(node, l, r))
        }

        let mut slots: Vec<Option<Node<D, V>>> = nodes.into_iter().map(Some).collect();
        Tree {
            root: Some(attach(root, &mut slots, &left, &right)),
        }
    }

    /// Merges two trees in the order left then right. All of `left`'s keys
    /// must precede all of `right`'s; that is the caller's responsibility.
    /// Neither input is invalidated.
    pub fn merge(left: &Tree<D, V>, right: &Tree<D, V>) -> Tree<D, V> {
        Tree {
            root: merge_nodes(&left.root, &right.root),
        }
    }

    /// The monoid combination of the whole tree.
    pub fn value(&self) -> V {
        match &self.root {
            Some(root) => root.value.clone(),
            None => V::identity(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Splits by two lookup keys in one pass. Nodes straddling `from` or
    /// `to` end up in the middle part.
    pub fn split(&self, from: V::Key, to: V::Key) -> Split<D, V> {
        let identity = V::identity();
        let (rest, right) = split_nodes(&self.root, to, true, &identity);
        let (left, middle) = split_nodes(&rest, from, false, &identity);
        Split {
            left: Tree { root: left },
            middle: Tree { root: middle },
            right: Tree { root: right },
        }
    }

    /// Data of the first node and the combined value of its subtree.
    pub fn first(&self) -> Option<(&D, &V)> {
        let mut node = self.root.as_ref()?;
        while let Some(left) = &node.left {
            node = left;
        }
        Some((&node.data, &node.value))
    }

    /// Data of the last node and the combined value of its subtree.
    pub fn last(&self) -> Option<(&D, &V)> {
        let mut node = self.root.as_ref()?;
        while let Some(right) = &node.right {
            node = right;
        }
        Some((&node.data, &node.value))
    }

    /// Detaches the first node, returning its data and own value together
    /// with the remaining tree.
    pub fn split_first(&self) -> (Option<(D, V)>, Tree<D, V>) {
        let (first, rest) = split_first_node(&self.root);
        (
            first.map(|n| (n.data.clone(), n.own_value().clone())),
            Tree { root: rest },
        )
    }

    /// Detaches the last node, returning the remaining tree together with
    /// the node's data and own value.
    pub fn split_last(&self) -> (Tree<D, V>, Option<(D, V)>) {
        let (rest, last) = split_last_node(&self.root);
        (
            Tree { root: rest },
            last.map(|n| (n.data.clone(), n.own_value().clone())),
        )
    }

    /// Every node's data and own value, in order.
    pub fn collect(&self) -> Vec<(D, V)> {
        fn walk<D: Clone, V: OrderedMonoid>(node: &Node<D, V>, out: &mut Vec<(D, V)>) {
            if let Some(left) = &node.left {
                walk(left, out);
            }
            out.push((node.data.clone(), node.own_value().clone()));
            if let Some(right) = &node.right {
                walk(right, out);
            }
        }
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            walk(root, &mut out);
        }
        out
    }

    /// An iterator positioned nowhere; call [`TreeIter::locate`] first.
    pub fn iter(&self) -> TreeIter<D, V> {
        TreeIter::new(self.root.clone())
    }
}

impl<D: Clone, V: OrderedMonoid> Default for Tree<D, V> {
    fn default() -> Self {
        Self::new()
    }
}
