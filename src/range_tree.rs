//! A mutable collection of disjoint ranges with data attached, rebased on
//! top of every edit. This is how positions stay meaningful in a constantly
//! changing linear environment: decorations, dirty regions and any other
//! edit-stable spans all live in one of these.
//!
//! The tree optionally hands out a [`RangeHandle`] per range, which can be
//! used to resolve the range's current bounds or remove it later. Handles
//! slow `replace` down a little, so only ask for them when needed.
//!
//! Internally this is a treap over an index arena, keyed by start anchor
//! and balanced by random priorities. Bulk shifts during [`RangeTree::replace`]
//! are a single lazily-propagated delta on a subtree root, pushed down to
//! children whenever a descent passes through. Handles are arena slots with
//! generation counters; parent indices make resolving a handle O(depth)
//! without re-searching by key.

use std::cell::Cell;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use crate::anchor::Anchor;
use crate::Offset;

const NIL: usize = usize::MAX;

/// A range and its attached data, as queries report it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RangeData<T> {
    pub from: Anchor,
    pub to: Anchor,
    pub data: T,
}

/// An opaque reference to a range in a handle-keeping tree. Stays usable
/// across any number of edits, until the range is removed (explicitly or by
/// a `replace` covering it).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RangeHandle {
    tree: u64,
    slot: usize,
    generation: u32,
}

struct Node<T> {
    from: Anchor,
    to: Anchor,
    data: T,
    h: u64,
    size: usize,
    // Pending offset delta for this whole subtree; pushed to children and
    // cleared whenever a descent passes through.
    add: isize,
    left: usize,
    right: usize,
    parent: usize,
}

struct Slot<T> {
    node: Option<Node<T>>,
    generation: u32,
}

/// Which bound a split key compares against.
#[derive(Copy, Clone, PartialEq, Eq)]
enum SplitBy {
    From,
    To,
}

thread_local! {
    static PRIORITIES: std::cell::RefCell<SmallRng> =
        std::cell::RefCell::new(SmallRng::seed_from_u64(0x7261_6e67_6531));
    static TREE_IDS: Cell<u64> = const { Cell::new(0) };
}

fn next_priority() -> u64 {
    PRIORITIES.with(|rng| rng.borrow_mut().gen())
}

fn next_tree_id() -> u64 {
    TREE_IDS.with(|ids| {
        let id = ids.get();
        ids.set(id + 1);
        id
    })
}

/// A treap of disjoint anchor ranges. Ranges must not share interior
/// points; touching at a point is fine. All query methods take `&mut self`
/// because they restructure the treap (split, inspect, merge back); they
/// never leave it unbalanced.
pub struct RangeTree<T> {
    id: u64,
    root: usize,
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    create_handles: bool,
}

impl<T> RangeTree<T> {
    /// A tree without handle support.
    pub fn new() -> Self {
        Self::construct(false)
    }

    /// A tree which returns a [`RangeHandle`] from every [`RangeTree::add`].
    pub fn with_handles() -> Self {
        Self::construct(true)
    }

    fn construct(create_handles: bool) -> Self {
        RangeTree {
            id: next_tree_id(),
            root: NIL,
            slots: Vec::new(),
            free: Vec::new(),
            create_handles,
        }
    }

    /// Adds a range. Panics when `from > to` or when the range would share
    /// an interior point with an existing one. Returns a handle only for
    /// trees created with [`RangeTree::with_handles`].
    pub fn add(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
        data: T,
    ) -> Option<RangeHandle> {
        let (from, to) = (from.into(), to.into());
        assert!(from <= to, "reversed ranges are not allowed");
        let (left, right) = self.split_nodes(self.root, from.next(), SplitBy::To);
        if left != NIL {
            let last = self.last_node(left);
            assert!(self.node(last).to <= from, "ranges must be disjoint");
        }
        if right != NIL {
            let first = self.first_node(right);
            assert!(self.node(first).from >= to, "ranges must be disjoint");
        }
        let slot = self.alloc(from, to, data);
        let handle = RangeHandle {
            tree: self.id,
            slot,
            generation: self.slots[slot].generation,
        };
        let merged = self.merge_nodes(left, slot);
        let merged = self.merge_nodes(merged, right);
        self.set_root(merged);
        self.create_handles.then_some(handle)
    }

    /// The range's current bounds and data. `None` once the range has been
    /// removed. Panics when the handle belongs to a different tree.
    pub fn resolve(&mut self, handle: RangeHandle) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        let slot = self.check_handle(handle)?;
        self.normalize_path(slot);
        let node = self.node(slot);
        Some(RangeData {
            from: node.from,
            to: node.to,
            data: node.data.clone(),
        })
    }

    /// Removes the range behind the handle, returning its last bounds and
    /// data. `None` when it was already removed.
    pub fn remove(&mut self, handle: RangeHandle) -> Option<RangeData<T>> {
        let slot = self.check_handle(handle)?;
        self.normalize_path(slot);
        let (from, to) = {
            let node = self.node(slot);
            (node.from, node.to)
        };
        let (left, rest) = self.split_nodes(self.root, from, SplitBy::To);
        let (mid, right) = if from == to {
            self.split_nodes(rest, to.next(), SplitBy::To)
        } else {
            self.split_nodes(rest, to, SplitBy::From)
        };
        assert!(mid == slot, "range tree out of sync with handle");
        {
            let node = self.node(mid);
            assert!(
                node.left == NIL && node.right == NIL,
                "range tree out of sync with handle"
            );
        }
        let merged = self.merge_nodes(left, right);
        self.set_root(merged);
        let node = self.free_slot(slot);
        Some(RangeData {
            from,
            to,
            data: node.data,
        })
    }

    /// Rebases every range over the replacement of `[from, to)` by
    /// `inserted` content units. The first matching rule applies:
    ///
    /// - ranges covered by the replaced span are dropped (and reported, with
    ///   their handles, when the tree keeps handles);
    /// - ranges covering the replaced span are resized by
    ///   `inserted - (to - from)`;
    /// - ranges straddling `from` or `to` are cropped by `[from, to)`;
    /// - ranges starting after `to` are shifted by `inserted - (to - from)`.
    pub fn replace(
        &mut self,
        from: Offset,
        to: Offset,
        inserted: usize,
    ) -> Vec<(RangeHandle, RangeData<T>)> {
        assert!(from <= to, "reversed replace range");
        let delta = inserted as isize - (to - from) as isize;
        let (left, rest) = self.split_nodes(self.root, Anchor::left(from), SplitBy::To);
        let (rest, right) = self.split_nodes(rest, Anchor::right(to), SplitBy::From);
        let (cross_left, rest) = self.split_nodes(rest, Anchor::right(from), SplitBy::From);
        let (covered, cross_right) = self.split_nodes(rest, Anchor::left(to), SplitBy::To);

        let mut removed = Vec::new();
        let mut covered_slots: SmallVec<usize, 4> = SmallVec::new();
        self.collect_nodes(covered, &mut covered_slots);
        for slot in covered_slots {
            self.drop_node(slot, &mut removed);
        }

        let processed_left = self.process_nodes(cross_left, from, to, inserted, &mut removed);
        let processed_right = self.process_nodes(cross_right, from, to, inserted, &mut removed);
        if right != NIL {
            self.node_mut(right).add += delta;
        }
        let merged = self.merge_nodes(processed_left, processed_right);
        let merged = self.merge_nodes(merged, right);
        let merged = self.merge_nodes(left, merged);
        self.set_root(merged);
        removed
    }

    /// The total number of ranges.
    pub fn count_all(&self) -> usize {
        if self.root == NIL {
            0
        } else {
            self.node(self.root).size
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root == NIL
    }

    /// The number of ranges starting within `[from, to)`.
    pub fn count_starting(&mut self, from: impl Into<Anchor>, to: impl Into<Anchor>) -> usize {
        self.query(from.into(), to.into(), Query::Starting, |tree, mid| {
            tree.subtree_size(mid)
        })
    }

    /// The number of ranges ending within `[from, to)`.
    pub fn count_ending(&mut self, from: impl Into<Anchor>, to: impl Into<Anchor>) -> usize {
        self.query(from.into(), to.into(), Query::Ending, |tree, mid| {
            tree.subtree_size(mid)
        })
    }

    /// The number of ranges intersecting or touching `[from, to)`.
    pub fn count_touching(&mut self, from: impl Into<Anchor>, to: impl Into<Anchor>) -> usize {
        self.query(from.into(), to.into(), Query::Touching, |tree, mid| {
            tree.subtree_size(mid)
        })
    }

    pub fn list_all(&mut self) -> Vec<RangeData<T>>
    where
        T: Clone,
    {
        let mut result = Vec::new();
        self.visit_all(|from, to, data| {
            result.push(RangeData {
                from,
                to,
                data: data.clone(),
            })
        });
        result
    }

    pub fn list_starting(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
    ) -> Vec<RangeData<T>>
    where
        T: Clone,
    {
        self.list(from.into(), to.into(), Query::Starting)
    }

    pub fn list_ending(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
    ) -> Vec<RangeData<T>>
    where
        T: Clone,
    {
        self.list(from.into(), to.into(), Query::Ending)
    }

    pub fn list_touching(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
    ) -> Vec<RangeData<T>>
    where
        T: Clone,
    {
        self.list(from.into(), to.into(), Query::Touching)
    }

    pub fn visit_all(&mut self, mut visitor: impl FnMut(Anchor, Anchor, &T)) {
        let root = self.root;
        self.visit_nodes(root, &mut visitor);
    }

    pub fn visit_starting(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
        mut visitor: impl FnMut(Anchor, Anchor, &T),
    ) {
        self.query(from.into(), to.into(), Query::Starting, |tree, mid| {
            tree.visit_nodes(mid, &mut visitor)
        });
    }

    pub fn visit_ending(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
        mut visitor: impl FnMut(Anchor, Anchor, &T),
    ) {
        self.query(from.into(), to.into(), Query::Ending, |tree, mid| {
            tree.visit_nodes(mid, &mut visitor)
        });
    }

    pub fn visit_touching(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
        mut visitor: impl FnMut(Anchor, Anchor, &T),
    ) {
        self.query(from.into(), to.into(), Query::Touching, |tree, mid| {
            tree.visit_nodes(mid, &mut visitor)
        });
    }

    pub fn clear_all(&mut self) {
        let root = self.root;
        self.clear_subtree(root);
        self.root = NIL;
    }

    pub fn clear_starting(&mut self, from: impl Into<Anchor>, to: impl Into<Anchor>) {
        self.clear(from.into(), to.into(), Query::Starting);
    }

    pub fn clear_ending(&mut self, from: impl Into<Anchor>, to: impl Into<Anchor>) {
        self.clear(from.into(), to.into(), Query::Ending);
    }

    pub fn clear_touching(&mut self, from: impl Into<Anchor>, to: impl Into<Anchor>) {
        self.clear(from.into(), to.into(), Query::Touching);
    }

    /// The range with the smallest start anchor.
    pub fn first_all(&mut self) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        let root = self.root;
        self.first_in(root)
    }

    pub fn first_starting(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
    ) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        self.query(from.into(), to.into(), Query::Starting, |tree, mid| {
            tree.first_in(mid)
        })
    }

    pub fn first_ending(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
    ) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        self.query(from.into(), to.into(), Query::Ending, |tree, mid| {
            tree.first_in(mid)
        })
    }

    pub fn first_touching(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
    ) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        self.query(from.into(), to.into(), Query::Touching, |tree, mid| {
            tree.first_in(mid)
        })
    }

    /// The range with the greatest start anchor.
    pub fn last_all(&mut self) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        let root = self.root;
        self.last_in(root)
    }

    pub fn last_starting(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
    ) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        self.query(from.into(), to.into(), Query::Starting, |tree, mid| {
            tree.last_in(mid)
        })
    }

    pub fn last_ending(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
    ) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        self.query(from.into(), to.into(), Query::Ending, |tree, mid| {
            tree.last_in(mid)
        })
    }

    pub fn last_touching(
        &mut self,
        from: impl Into<Anchor>,
        to: impl Into<Anchor>,
    ) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        self.query(from.into(), to.into(), Query::Touching, |tree, mid| {
            tree.last_in(mid)
        })
    }

    /// Visits ranges in order, letting the visitor skip ahead: its return
    /// value is the minimum start anchor of the next range visited, so
    /// everything between the visited range's end and that anchor is
    /// skipped. Returning `range.to` visits everything. The returned anchor
    /// must not precede the visited range's start.
    pub fn sparse_visit_all(&mut self, mut visitor: impl FnMut(Anchor, Anchor, &T) -> Anchor) {
        if self.root == NIL {
            return;
        }
        let first = self.first_node(self.root);
        let mut from = self.node(first).from;
        loop {
            let root = self.root;
            let slot = self.find_node(root, from);
            if slot == NIL {
                return;
            }
            let (node_from, node_to) = {
                let node = self.node(slot);
                (node.from, node.to)
            };
            let next = {
                let node = self.node(slot);
                visitor(node.from, node.to, &node.data)
            };
            assert!(next >= node_from, "sparse visitor must not step backwards");
            from = from.next().max(node_to).max(next);
        }
    }

    // Query plumbing: split the matching subtree out, hand it to `f`, merge
    // it back.

    fn query<R>(
        &mut self,
        from: Anchor,
        to: Anchor,
        kind: Query,
        f: impl FnOnce(&mut Self, usize) -> R,
    ) -> R {
        let (by1, by2) = kind.bounds();
        let (left, rest) = self.split_nodes(self.root, from, by1);
        let (mid, right) = self.split_nodes(rest, to, by2);
        let result = f(self, mid);
        let merged = self.merge_nodes(mid, right);
        let merged = self.merge_nodes(left, merged);
        self.set_root(merged);
        result
    }

    fn clear(&mut self, from: Anchor, to: Anchor, kind: Query) {
        let (by1, by2) = kind.bounds();
        let (left, rest) = self.split_nodes(self.root, from, by1);
        let (mid, right) = self.split_nodes(rest, to, by2);
        self.clear_subtree(mid);
        let merged = self.merge_nodes(left, right);
        self.set_root(merged);
    }

    fn list(&mut self, from: Anchor, to: Anchor, kind: Query) -> Vec<RangeData<T>>
    where
        T: Clone,
    {
        let mut result = Vec::new();
        self.query(from, to, kind, |tree, mid| {
            tree.visit_nodes(mid, &mut |from, to, data: &T| {
                result.push(RangeData {
                    from,
                    to,
                    data: data.clone(),
                })
            });
        });
        result
    }

    fn subtree_size(&self, root: usize) -> usize {
        if root == NIL {
            0
        } else {
            self.node(root).size
        }
    }

    fn first_in(&mut self, root: usize) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        if root == NIL {
            return None;
        }
        let first = self.first_node(root);
        let node = self.node(first);
        Some(RangeData {
            from: node.from,
            to: node.to,
            data: node.data.clone(),
        })
    }

    fn last_in(&mut self, root: usize) -> Option<RangeData<T>>
    where
        T: Clone,
    {
        if root == NIL {
            return None;
        }
        let last = self.last_node(root);
        let node = self.node(last);
        Some(RangeData {
            from: node.from,
            to: node.to,
            data: node.data.clone(),
        })
    }

    // Edit-adjustment of the ranges straddling a replace boundary. Each
    // node is adjusted in isolation and re-merged as a singleton.

    fn process_nodes(
        &mut self,
        root: usize,
        from: Offset,
        to: Offset,
        inserted: usize,
        removed: &mut Vec<(RangeHandle, RangeData<T>)>,
    ) -> usize {
        let mut all: SmallVec<usize, 4> = SmallVec::new();
        self.collect_nodes(root, &mut all);
        let delta = inserted as isize - (to - from) as isize;
        let (edit_from, edit_to) = (Anchor::left(from), Anchor::left(to));

        let mut result = NIL;
        for slot in all {
            let (mut start, mut end) = {
                let node = self.node(slot);
                (node.from, node.to)
            };
            if edit_from < start && edit_to >= end {
                self.drop_node(slot, removed);
                continue;
            }

            if edit_from >= start && edit_to < end {
                end = end.shift(delta);
            } else if edit_from < start && edit_to >= start {
                start = Anchor::left(from + inserted);
                end = end.shift(delta);
            } else if edit_from < end && edit_to >= end {
                end = Anchor::left(from);
            } else if edit_to < start {
                start = start.shift(delta);
                end = end.shift(delta);
            }

            let node = self.node_mut(slot);
            node.from = start;
            node.to = end;
            node.left = NIL;
            node.right = NIL;
            node.parent = NIL;
            node.add = 0;
            node.size = 1;
            result = self.merge_nodes(result, slot);
        }
        result
    }

    /// Frees a node, recording its handle and last bounds when the tree
    /// keeps handles.
    fn drop_node(&mut self, slot: usize, removed: &mut Vec<(RangeHandle, RangeData<T>)>) {
        let handle = RangeHandle {
            tree: self.id,
            slot,
            generation: self.slots[slot].generation,
        };
        let node = self.free_slot(slot);
        if self.create_handles {
            removed.push((
                handle,
                RangeData {
                    from: node.from,
                    to: node.to,
                    data: node.data,
                },
            ));
        }
    }

    // Arena and treap internals.

    fn node(&self, slot: usize) -> &Node<T> {
        self.slots[slot].node.as_ref().unwrap()
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node<T> {
        self.slots[slot].node.as_mut().unwrap()
    }

    fn alloc(&mut self, from: Anchor, to: Anchor, data: T) -> usize {
        let node = Node {
            from,
            to,
            data,
            h: next_priority(),
            size: 1,
            add: 0,
            left: NIL,
            right: NIL,
            parent: NIL,
        };
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot].node = Some(node);
                slot
            }
            None => {
                self.slots.push(Slot {
                    node: Some(node),
                    generation: 0,
                });
                self.slots.len() - 1
            }
        }
    }

    fn free_slot(&mut self, slot: usize) -> Node<T> {
        let node = self.slots[slot].node.take().unwrap();
        self.slots[slot].generation = self.slots[slot].generation.wrapping_add(1);
        self.free.push(slot);
        node
    }

    /// Panics for a handle from another tree; `None` for a removed range.
    fn check_handle(&self, handle: RangeHandle) -> Option<usize> {
        assert!(
            handle.tree == self.id && self.create_handles,
            "handle used with a different tree"
        );
        let slot = &self.slots[handle.slot];
        (slot.generation == handle.generation && slot.node.is_some()).then_some(handle.slot)
    }

    /// Pushes pending deltas down along the root-to-node path, so the
    /// node's own bounds are current.
    fn normalize_path(&mut self, slot: usize) {
        let mut path: SmallVec<usize, 16> = SmallVec::new();
        let mut at = slot;
        loop {
            path.push(at);
            let parent = self.node(at).parent;
            if parent == NIL {
                break;
            }
            at = parent;
        }
        debug_assert_eq!(*path.last().unwrap(), self.root, "detached handle node");
        for &ancestor in path.iter().rev() {
            self.normalize(ancestor);
        }
    }

    fn normalize(&mut self, slot: usize) {
        let add = self.node(slot).add;
        if add == 0 {
            return;
        }
        let node = self.node_mut(slot);
        node.from = node.from.shift(add);
        node.to = node.to.shift(add);
        node.add = 0;
        let (left, right) = (node.left, node.right);
        if left != NIL {
            self.node_mut(left).add += add;
        }
        if right != NIL {
            self.node_mut(right).add += add;
        }
    }

    fn set_children(&mut self, slot: usize, left: usize, right: usize) -> usize {
        debug_assert_eq!(self.node(slot).add, 0, "children set under a pending delta");
        let mut size = 1;
        if left != NIL {
            size += self.node(left).size;
            self.node_mut(left).parent = slot;
        }
        if right != NIL {
            size += self.node(right).size;
            self.node_mut(right).parent = slot;
        }
        let node = self.node_mut(slot);
        node.left = left;
        node.right = right;
        node.size = size;
        slot
    }

    fn set_root(&mut self, root: usize) {
        self.root = root;
        if root != NIL {
            self.node_mut(root).parent = NIL;
        }
    }

    fn merge_nodes(&mut self, left: usize, right: usize) -> usize {
        if left == NIL {
            return right;
        }
        if right == NIL {
            return left;
        }
        self.normalize(left);
        self.normalize(right);
        if self.node(left).h > self.node(right).h {
            let (child_left, child_right) = {
                let node = self.node(left);
                (node.left, node.right)
            };
            let merged = self.merge_nodes(child_right, right);
            self.set_children(left, child_left, merged)
        } else {
            let (child_left, child_right) = {
                let node = self.node(right);
                (node.left, node.right)
            };
            let merged = self.merge_nodes(left, child_left);
            self.set_children(right, merged, child_right)
        }
    }

    /// The left part receives all nodes whose compared bound precedes `key`.
    fn split_nodes(&mut self, root: usize, key: Anchor, by: SplitBy) -> (usize, usize) {
        if root == NIL {
            return (NIL, NIL);
        }
        self.normalize(root);
        let (node_to_left, left, right) = {
            let node = self.node(root);
            let to_left = match by {
                SplitBy::From => node.from < key,
                SplitBy::To => node.to < key,
            };
            (to_left, node.left, node.right)
        };
        if node_to_left {
            let (l, r) = self.split_nodes(right, key, by);
            self.node_mut(root).parent = NIL;
            (self.set_children(root, left, l), r)
        } else {
            let (l, r) = self.split_nodes(left, key, by);
            self.node_mut(root).parent = NIL;
            (l, self.set_children(root, r, right))
        }
    }

    fn first_node(&mut self, mut slot: usize) -> usize {
        loop {
            self.normalize(slot);
            let left = self.node(slot).left;
            if left == NIL {
                return slot;
            }
            slot = left;
        }
    }

    fn last_node(&mut self, mut slot: usize) -> usize {
        loop {
            self.normalize(slot);
            let right = self.node(slot).right;
            if right == NIL {
                return slot;
            }
            slot = right;
        }
    }

    /// The first node whose start anchor is at or past `key`.
    fn find_node(&mut self, root: usize, key: Anchor) -> usize {
        if root == NIL {
            return NIL;
        }
        self.normalize(root);
        let (from, left, right) = {
            let node = self.node(root);
            (node.from, node.left, node.right)
        };
        if from >= key {
            let found = self.find_node(left, key);
            if found != NIL {
                found
            } else {
                root
            }
        } else {
            self.find_node(right, key)
        }
    }

    fn visit_nodes(&mut self, root: usize, visitor: &mut impl FnMut(Anchor, Anchor, &T)) {
        if root == NIL {
            return;
        }
        self.normalize(root);
        let (left, right) = {
            let node = self.node(root);
            (node.left, node.right)
        };
        self.visit_nodes(left, visitor);
        {
            let node = self.node(root);
            visitor(node.from, node.to, &node.data);
        }
        self.visit_nodes(right, visitor);
    }

    fn collect_nodes(&mut self, root: usize, out: &mut SmallVec<usize, 4>) {
        if root == NIL {
            return;
        }
        self.normalize(root);
        let (left, right) = {
            let node = self.node(root);
            (node.left, node.right)
        };
        self.collect_nodes(left, out);
        out.push(root);
        self.collect_nodes(right, out);
    }

    fn clear_subtree(&mut self, root: usize) {
        let mut all: SmallVec<usize, 4> = SmallVec::new();
        self.collect_nodes(root, &mut all);
        for slot in all {
            self.free_slot(slot);
        }
    }
}

#[derive(Copy, Clone)]
enum Query {
    Starting,
    Ending,
    Touching,
}

impl Query {
    fn bounds(self) -> (SplitBy, SplitBy) {
        match self {
            Query::Starting => (SplitBy::From, SplitBy::From),
            Query::Ending => (SplitBy::To, SplitBy::To),
            Query::Touching => (SplitBy::To, SplitBy::From),
        }
    }
}

impl<T> Default for RangeTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn bounds(tree: &mut RangeTree<u32>) -> Vec<(usize, usize)> {
        tree.list_all()
            .into_iter()
            .map(|r| (r.from.offset, r.to.offset))
            .collect()
    }

    fn insert(tree: &mut RangeTree<u32>, from: usize, to: usize, data: u32) -> Option<RangeHandle> {
        tree.add(from, to, data)
    }

    #[test]
    fn add_and_list() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 10, 20, 1);
        insert(&mut tree, 0, 5, 2);
        insert(&mut tree, 20, 30, 3);
        assert_eq!(bounds(&mut tree), vec![(0, 5), (10, 20), (20, 30)]);
        assert_eq!(tree.count_all(), 3);
    }

    #[test]
    #[should_panic(expected = "reversed")]
    fn add_rejects_reversed() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 5, 3, 0);
    }

    #[test]
    #[should_panic(expected = "disjoint")]
    fn add_rejects_overlap() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 0, 10, 0);
        insert(&mut tree, 5, 15, 1);
    }

    #[test]
    fn touching_ranges_are_fine() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 0, 10, 0);
        insert(&mut tree, 10, 20, 1);
        // A degenerate range at the shared point, too.
        insert(&mut tree, 10, 10, 2);
        assert_eq!(tree.count_all(), 3);
    }

    #[test]
    #[should_panic(expected = "disjoint")]
    fn right_closed_end_blocks_start_at_same_point() {
        let mut tree = RangeTree::<u32>::new();
        // The right-biased end claims the gap at offset 10, so a range
        // starting there overlaps.
        tree.add(Anchor::left(0), Anchor::right(10), 0);
        tree.add(Anchor::left(10), Anchor::left(12), 1);
    }

    #[test]
    fn replace_ending_at_range_start_leaves_it_alone() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 10, 20, 0);
        tree.replace(5, 10, 5);
        assert_eq!(bounds(&mut tree), vec![(10, 20)]);
    }

    #[test]
    fn replace_overlapping_range_start_crops_it() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 10, 20, 0);
        tree.replace(5, 15, 0);
        assert_eq!(bounds(&mut tree), vec![(5, 10)]);
    }

    #[test]
    fn replace_overlapping_range_end_crops_it() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 10, 20, 0);
        tree.replace(15, 25, 3);
        assert_eq!(bounds(&mut tree), vec![(10, 15)]);
    }

    #[test]
    fn replace_inside_range_resizes_it() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 10, 20, 0);
        tree.replace(12, 14, 7);
        assert_eq!(bounds(&mut tree), vec![(10, 25)]);
    }

    #[test]
    fn replace_after_range_is_ignored_before_range_shifts() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 10, 20, 0);
        tree.replace(25, 30, 0);
        assert_eq!(bounds(&mut tree), vec![(10, 20)]);
        tree.replace(0, 2, 6);
        assert_eq!(bounds(&mut tree), vec![(14, 24)]);
    }

    #[test]
    fn replace_covering_range_drops_it() {
        let mut tree = RangeTree::with_handles();
        let handle = insert(&mut tree, 10, 20, 7).unwrap();
        let removed = tree.replace(5, 25, 1);
        assert_eq!(tree.count_all(), 0);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, handle);
        assert_eq!(removed[0].1.data, 7);
        assert_eq!(tree.resolve(handle), None);
    }

    #[test]
    fn replace_reports_nothing_without_handles() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 10, 20, 0);
        assert!(tree.replace(0, 30, 0).is_empty());
        assert_eq!(tree.count_all(), 0);
    }

    #[test]
    fn right_biased_anchors_grow_with_insertion() {
        let mut tree = RangeTree::<u32>::new();
        tree.add(Anchor::left(0), Anchor::right(4), 0);
        tree.add(Anchor::left(10), Anchor::left(14), 1);
        // Typing at the right-closed end extends the range.
        tree.replace(4, 4, 3);
        let all = tree.list_all();
        assert_eq!(all[0].to, Anchor::right(7));
        // The left-closed one stays put under the same kind of edit.
        tree.replace(17, 17, 3);
        let all = tree.list_all();
        assert_eq!(all[1].to, Anchor::left(17));

        // A right-biased start anchor moves with insertion at its offset.
        let mut tree = RangeTree::<u32>::new();
        tree.add(Anchor::right(4), Anchor::right(8), 0);
        tree.replace(4, 4, 2);
        assert_eq!(tree.list_all()[0].from, Anchor::right(6));
    }

    #[test]
    fn handles_resolve_through_edits() {
        let mut tree = RangeTree::with_handles();
        let handle = insert(&mut tree, 10, 20, 0).unwrap();
        tree.replace(0, 2, 8);
        let resolved = tree.resolve(handle).unwrap();
        assert_eq!((resolved.from.offset, resolved.to.offset), (16, 26));

        let removed = tree.remove(handle).unwrap();
        assert_eq!((removed.from.offset, removed.to.offset), (16, 26));
        assert_eq!(tree.count_all(), 0);
        assert_eq!(tree.remove(handle), None);
        assert_eq!(tree.resolve(handle), None);
    }

    #[test]
    fn handle_slot_reuse_does_not_resurrect() {
        let mut tree = RangeTree::with_handles();
        let old = insert(&mut tree, 0, 5, 0).unwrap();
        tree.remove(old);
        let new = insert(&mut tree, 100, 110, 1).unwrap();
        assert_eq!(tree.resolve(old), None);
        assert_eq!(tree.resolve(new).unwrap().data, 1);
    }

    #[test]
    #[should_panic(expected = "different tree")]
    fn foreign_handle_panics() {
        let mut a = RangeTree::with_handles();
        let mut b = RangeTree::<u32>::with_handles();
        let handle = insert(&mut a, 0, 5, 0).unwrap();
        b.resolve(handle);
    }

    #[test]
    fn counting_and_listing_by_kind() {
        let mut tree = RangeTree::new();
        insert(&mut tree, 0, 10, 0);
        insert(&mut tree, 10, 20, 1);
        insert(&mut tree, 30, 40, 2);

        assert_eq!(tree.count_starting(Anchor::left(0), Anchor::left(30)), 2);
        assert_eq!(tree.count_ending(Anchor::left(15), Anchor::left(41)), 2);
        // Touching includes the range ending exactly at the window start.
        assert_eq!(tree.count_touching(Anchor::left(10), Anchor::left(30)), 2);
        assert_eq!(tree.count_touching(Anchor::right(10), Anchor::left(30)), 1);

        let starting = tree.list_starting(Anchor::left(5), Anchor::left(35));
        assert_eq!(starting.len(), 2);
        assert_eq!(starting[0].data, 1);
        assert_eq!(starting[1].data, 2);

        assert_eq!(tree.first_touching(Anchor::left(0), Anchor::left(50)).unwrap().data, 0);
        assert_eq!(tree.last_touching(Anchor::left(0), Anchor::left(50)).unwrap().data, 2);
        assert_eq!(tree.first_starting(Anchor::left(25), Anchor::left(29)), None);

        // Queries leave the tree intact.
        assert_eq!(tree.count_all(), 3);
        assert_eq!(bounds(&mut tree), vec![(0, 10), (10, 20), (30, 40)]);
    }

    #[test]
    fn clearing_by_kind() {
        let mut tree = RangeTree::new();
        for i in 0..5 {
            insert(&mut tree, i * 10, i * 10 + 5, i as u32);
        }
        tree.clear_starting(Anchor::left(10), Anchor::left(30));
        assert_eq!(bounds(&mut tree), vec![(0, 5), (30, 35), (40, 45)]);
        tree.clear_touching(Anchor::left(35), Anchor::left(41));
        assert_eq!(bounds(&mut tree), vec![(0, 5)]);
        tree.clear_all();
        assert!(tree.is_empty());
    }

    #[test]
    fn sparse_visit_skips_ahead() {
        let mut tree = RangeTree::new();
        for i in 0..10 {
            insert(&mut tree, i * 10, i * 10 + 5, i as u32);
        }
        let mut seen = Vec::new();
        tree.sparse_visit_all(|from, to, data| {
            seen.push(*data);
            // Skip the next two ranges.
            Anchor::left(from.offset + 25).max(to)
        });
        assert_eq!(seen, vec![0, 3, 6, 9]);

        let mut all = Vec::new();
        tree.sparse_visit_all(|_, to, data| {
            all.push(*data);
            to
        });
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    /// The reference: the same adjustment rules applied by a linear scan
    /// over a plain vector. The tree must agree after any interleaving.
    fn replace_model(
        ranges: &mut Vec<(usize, usize)>,
        from: usize,
        to: usize,
        inserted: usize,
    ) {
        let delta = inserted as isize - (to - from) as isize;
        ranges.retain(|&(start, end)| !(from < start && to >= end));
        for range in ranges.iter_mut() {
            let (start, end) = *range;
            if from >= start && to < end {
                *range = (start, end.checked_add_signed(delta).unwrap());
            } else if from < start && to >= start {
                *range = (from + inserted, end.checked_add_signed(delta).unwrap());
            } else if from < end && to >= end {
                *range = (start, from);
            } else if to < start {
                *range = (
                    start.checked_add_signed(delta).unwrap(),
                    end.checked_add_signed(delta).unwrap(),
                );
            }
        }
    }

    #[test]
    fn fuzz_against_linear_model() {
        let mut rng = SmallRng::seed_from_u64(31);
        for _ in 0..50 {
            let mut tree = RangeTree::with_handles();
            let mut model: Vec<(usize, usize)> = Vec::new();
            let mut handles = Vec::new();
            let mut size = 200usize;

            for _ in 0..120 {
                if rng.gen_bool(0.5) {
                    let from = rng.gen_range(0..=size);
                    let to = rng.gen_range(from..=size);
                    let no_overlap = model
                        .iter()
                        .all(|&(start, end)| to <= start || from >= end);
                    if no_overlap
                        && model.iter().all(|&(start, _)| start != from || from != to)
                    {
                        handles.push(tree.add(from, to, 0u32).unwrap());
                        model.push((from, to));
                        model.sort_unstable();
                    }
                } else {
                    let from = rng.gen_range(0..=size);
                    let to = rng.gen_range(from..=size);
                    let inserted = rng.gen_range(0..20);
                    let dropped = tree.replace(from, to, inserted);
                    replace_model(&mut model, from, to, inserted);
                    size = size + inserted - (to - from);
                    for (handle, _) in dropped {
                        assert_eq!(tree.resolve(handle), None);
                        handles.retain(|&h| h != handle);
                    }
                }

                let listed: Vec<(usize, usize)> = tree
                    .list_all()
                    .into_iter()
                    .map(|r| (r.from.offset, r.to.offset))
                    .collect();
                assert_eq!(listed, model);
                assert_eq!(tree.count_all(), handles.len());

                // No two live ranges overlap in their interiors.
                for pair in listed.windows(2) {
                    assert!(pair[0].1 <= pair[1].0);
                }

                // Every live handle still resolves to a listed range.
                for &handle in &handles {
                    let resolved = tree.resolve(handle).unwrap();
                    assert!(listed.contains(&(resolved.from.offset, resolved.to.offset)));
                }
            }
        }
    }
}
