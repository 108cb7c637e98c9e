//! Tree iteration. The iterator points at a node, before the first node or
//! after the last one, and keeps the combined values on both sides of the
//! current node available without re-descending.

use std::rc::Rc;

use crate::{Link, Node, OrderedMonoid};

/// An iterator over a [`Tree`](crate::Tree).
///
/// When pointing past the last node, only `before` is set; when pointing
/// before the first node, only `after` is set. A freshly created iterator
/// is positioned nowhere until [`locate`](TreeIter::locate) is called.
///
/// `next`/`prev` are amortized O(1) thanks to the retained descent stack.
pub struct TreeIter<D, V: OrderedMonoid> {
    root: Link<D, V>,
    // (node, combined value before the node's whole subtree)
    stack: Vec<(Rc<Node<D, V>>, V)>,
    current: Link<D, V>,
    before: Option<V>,
    after: Option<V>,
}

impl<D, V: OrderedMonoid> Clone for TreeIter<D, V> {
    fn clone(&self) -> Self {
        TreeIter {
            root: self.root.clone(),
            stack: self.stack.clone(),
            current: self.current.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

impl<D, V: OrderedMonoid> TreeIter<D, V> {
    pub(crate) fn new(root: Link<D, V>) -> Self {
        TreeIter {
            root,
            stack: Vec::new(),
            current: None,
            before: None,
            after: None,
        }
    }

    /// Data of the current node, if positioned at one.
    pub fn data(&self) -> Option<&D> {
        self.current.as_ref().map(|node| &node.data)
    }

    /// The current node's own value.
    pub fn value(&self) -> Option<&V> {
        self.current.as_ref().map(|node| node.own_value())
    }

    /// Combined value of everything before the current node.
    pub fn before(&self) -> Option<&V> {
        self.before.as_ref()
    }

    /// Combined value of everything up to and including the current node.
    pub fn after(&self) -> Option<&V> {
        self.after.as_ref()
    }

    /// Moves to the first node which covers `key`, or past the last node
    /// when `key` is beyond the whole tree's value.
    pub fn locate(&mut self, key: V::Key) {
        let Some(root) = self.root.clone() else {
            return;
        };
        self.stack.clear();
        let mut value = V::identity();
        let mut node = root;
        loop {
            self.stack.push((node.clone(), value.clone()));
            if let Some(left) = node.left.clone() {
                let next = V::combine(&value, &left.value);
                if next.reaches(key) {
                    node = left;
                    continue;
                }
                value = next;
            }
            let next = V::combine(&value, node.own_value());
            if next.reaches(key) {
                self.current = Some(node);
                self.before = Some(value);
                self.after = Some(next);
                break;
            }
            let Some(right) = node.right.clone() else {
                self.current = None;
                self.before = Some(next);
                self.after = None;
                break;
            };
            value = next;
            node = right;
        }

        // A key sitting exactly on the boundary between two nodes belongs
        // to the following one.
        if let (Some(before), Some(after)) = (&self.before, &self.after) {
            if !before.reaches(key) && !after.exceeds(key) {
                self.next();
            }
        }
    }

    /// Moves to the next node, or past the last one. Returns whether the
    /// new position points at a node.
    pub fn next(&mut self) -> bool {
        if self.root.is_none() || self.after.is_none() {
            return false;
        }
        let (mut node, mut value) = self.stack.last().cloned().unwrap();
        if self.before.is_none() {
            // Pointing before the first node; the stack already leads to it.
        } else if node.right.is_some() {
            if let Some(left) = &node.left {
                value = V::combine(&value, &left.value);
            }
            value = V::combine(&value, node.own_value());
            let mut down = node.right.clone().unwrap();
            loop {
                self.stack.push((down.clone(), value.clone()));
                let Some(left) = down.left.clone() else {
                    break;
                };
                down = left;
            }
            node = down;
        } else {
            let mut len = self.stack.len();
            while len > 1 && {
                let parent = &self.stack[len - 2].0;
                parent
                    .right
                    .as_ref()
                    .is_some_and(|r| Rc::ptr_eq(r, &self.stack[len - 1].0))
            } {
                len -= 1;
            }
            if len == 1 {
                self.current = None;
                self.before = self.after.take();
                return false;
            }
            node = self.stack[len - 2].0.clone();
            value = self.stack[len - 2].1.clone();
            self.stack.truncate(len - 1);
        }

        if let Some(left) = &node.left {
            value = V::combine(&value, &left.value);
        }
        self.before = self.after.take();
        self.after = Some(V::combine(&value, node.own_value()));
        self.current = Some(node);
        true
    }

    /// Moves to the previous node, or before the first one. Returns whether
    /// the new position points at a node.
    pub fn prev(&mut self) -> bool {
        if self.root.is_none() || self.before.is_none() {
            return false;
        }
        let (mut node, mut value) = self.stack.last().cloned().unwrap();
        if self.after.is_none() {
            // Pointing past the last node; the stack already leads to it.
        } else if node.left.is_some() {
            let mut down = node.left.clone().unwrap();
            loop {
                self.stack.push((down.clone(), value.clone()));
                if down.right.is_none() {
                    break;
                }
                if let Some(left) = &down.left {
                    value = V::combine(&value, &left.value);
                }
                value = V::combine(&value, down.own_value());
                let right = down.right.clone().unwrap();
                down = right;
            }
            node = down;
        } else {
            let mut len = self.stack.len();
            while len > 1 && {
                let parent = &self.stack[len - 2].0;
                parent
                    .left
                    .as_ref()
                    .is_some_and(|l| Rc::ptr_eq(l, &self.stack[len - 1].0))
            } {
                len -= 1;
            }
            if len == 1 {
                self.current = None;
                self.after = self.before.take();
                return false;
            }
            node = self.stack[len - 2].0.clone();
            value = self.stack[len - 2].1.clone();
            self.stack.truncate(len - 1);
        }

        if let Some(left) = &node.left {
            value = V::combine(&value, &left.value);
        }
        self.after = self.before.take();
        self.before = Some(value);
        self.current = Some(node);
        true
    }
}
