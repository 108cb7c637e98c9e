//! A dirty-region tracker: which sub-ranges of `[0, size)` still need
//! (re)processing. Consumers pull one bounded range at a time with
//! [`WorkAllocator::work_range`], process it, and mark it
//! [`WorkAllocator::done`]; edits mark spans [`WorkAllocator::undone`]
//! again. Pending ranges are kept maximal: two adjacent pending ranges are
//! always merged, so iteration never sees the same work twice.

use std::ops::Range;

use crate::anchor::Anchor;
use crate::range_tree::RangeTree;
use crate::Offset;

pub struct WorkAllocator {
    size: usize,
    work: RangeTree<()>,
}

impl WorkAllocator {
    /// A tracker over `[0, size)` with the whole span initially pending.
    pub fn new(size: usize) -> Self {
        let mut allocator = WorkAllocator {
            size,
            work: RangeTree::new(),
        };
        allocator.add_work(0, size);
        allocator
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn has_work(&self) -> bool {
        self.work.count_all() > 0
    }

    /// Marks `[from, to)` processed. Pending ranges overlapping the span
    /// are narrowed to their still-pending parts.
    pub fn done(&mut self, from: Offset, to: Offset) {
        let from = self.clamp(from);
        let to = self.clamp(to);
        if from >= to {
            // Nothing was processed; splitting a pending range at `from`
            // would break maximality.
            return;
        }
        // The right-biased end also gathers ranges starting exactly at
        // `to`, keeping the maximality invariant.
        let touched = self.work.list_touching(Anchor::left(from), Anchor::right(to));
        self.work.clear_touching(Anchor::left(from), Anchor::right(to));
        for range in touched {
            if Anchor::left(from) < range.from && range.to < Anchor::left(to) {
                continue;
            }
            if range.from < Anchor::left(from) {
                self.add_work(range.from.offset, from);
            }
            if Anchor::left(to) < range.to {
                self.add_work(to, range.to.offset);
            }
        }
    }

    /// Marks `[from, to)` pending again, merging with any overlapping or
    /// adjacent pending range.
    pub fn undone(&mut self, from: Offset, to: Offset) {
        let mut from = self.clamp(from);
        let mut to = self.clamp(to);
        let touched = self.work.list_touching(Anchor::left(from), Anchor::right(to));
        self.work.clear_touching(Anchor::left(from), Anchor::right(to));
        for range in touched {
            from = from.min(range.from.offset);
            to = to.max(range.to.offset);
        }
        self.add_work(from, to);
    }

    /// The first pending sub-range intersecting `[from, to)`, clamped to
    /// it. `None` when nothing inside the window is pending.
    pub fn work_range(&mut self, from: Offset, to: Offset) -> Option<Range<Offset>> {
        let from = self.clamp(from);
        let to = self.clamp(to);
        // The right-biased start skips ranges merely touching at `from`,
        // so the result is never empty.
        let range = self.work.first_touching(Anchor::right(from), Anchor::left(to))?;
        Some(from.max(range.from.offset)..to.min(range.to.offset))
    }

    /// Rebases pending ranges over a replacement and adjusts the tracked
    /// size.
    pub fn replace(&mut self, from: Offset, to: Offset, inserted: usize) {
        debug_assert!(from <= to && to <= self.size);
        self.work.replace(from, to, inserted);
        self.size = self.size + inserted - (to - from);
    }

    /// Changes the tracked size. Growing marks the new tail pending;
    /// shrinking re-widens the pending range at the boundary.
    pub fn resize(&mut self, size: usize) {
        if size == self.size {
            return;
        }
        if size > self.size {
            self.add_work(self.size, size);
        } else {
            self.undone(size, self.size);
        }
        self.size = size;
    }

    fn clamp(&self, x: Offset) -> Offset {
        x.min(self.size)
    }

    fn add_work(&mut self, from: Offset, to: Offset) {
        if from != to {
            self.work.add(from, to, ());
        }
    }

    #[cfg(test)]
    fn pending(&mut self) -> Vec<Range<Offset>> {
        self.work
            .list_all()
            .into_iter()
            .map(|r| r.from.offset..r.to.offset)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn starts_with_everything_pending() {
        let mut allocator = WorkAllocator::new(100);
        assert!(allocator.has_work());
        assert_eq!(allocator.pending(), vec![0..100]);
        assert_eq!(WorkAllocator::new(0).has_work(), false);
    }

    #[test]
    fn done_narrows_pending_ranges() {
        let mut allocator = WorkAllocator::new(100);
        allocator.done(20, 50);
        assert_eq!(allocator.pending(), vec![0..20, 50..100]);
        allocator.done(0, 20);
        assert_eq!(allocator.pending(), vec![50..100]);
        allocator.done(40, 200);
        assert!(!allocator.has_work());
    }

    #[test]
    fn undone_merges_adjacent_and_overlapping() {
        let mut allocator = WorkAllocator::new(100);
        allocator.done(0, 100);
        allocator.undone(10, 20);
        allocator.undone(30, 40);
        assert_eq!(allocator.pending(), vec![10..20, 30..40]);
        // Touching at 20 merges; overlapping 35..60 merges too.
        allocator.undone(20, 30);
        assert_eq!(allocator.pending(), vec![10..40]);
        allocator.undone(35, 60);
        assert_eq!(allocator.pending(), vec![10..60]);
    }

    #[test]
    fn work_range_clamps_to_the_window() {
        let mut allocator = WorkAllocator::new(100);
        allocator.done(0, 100);
        allocator.undone(20, 60);
        assert_eq!(allocator.work_range(0, 100), Some(20..60));
        assert_eq!(allocator.work_range(30, 40), Some(30..40));
        assert_eq!(allocator.work_range(50, 90), Some(50..60));
        assert_eq!(allocator.work_range(60, 90), None);
        // A range merely touching the window start is not returned.
        assert_eq!(allocator.work_range(0, 20), None);
    }

    #[test]
    fn pull_work_until_converged() {
        let mut allocator = WorkAllocator::new(100);
        let mut covered: Vec<Range<usize>> = Vec::new();
        while let Some(range) = allocator.work_range(0, 100) {
            assert!(!range.is_empty());
            // Simulate processing a bounded piece of the range.
            let to = range.end.min(range.start + 7);
            allocator.done(range.start, to);
            covered.push(range.start..to);
        }
        assert!(!allocator.has_work());
        // The pulled pieces exactly tile [0, 100) with no overlaps.
        covered.sort_by_key(|r| r.start);
        let mut at = 0;
        for range in covered {
            assert_eq!(range.start, at);
            at = range.end;
        }
        assert_eq!(at, 100);
    }

    #[test]
    fn replace_rebases_pending_ranges() {
        let mut allocator = WorkAllocator::new(100);
        allocator.done(0, 100);
        allocator.undone(40, 60);
        allocator.replace(10, 20, 4);
        assert_eq!(allocator.size(), 94);
        assert_eq!(allocator.pending(), vec![34..54]);
        // An edit inside the pending span resizes it.
        allocator.replace(40, 44, 0);
        assert_eq!(allocator.pending(), vec![34..50]);
    }

    #[test]
    fn resize_grows_and_shrinks() {
        let mut allocator = WorkAllocator::new(50);
        allocator.done(0, 50);
        allocator.resize(80);
        assert_eq!(allocator.size(), 80);
        assert_eq!(allocator.pending(), vec![50..80]);
        allocator.done(50, 80);
        allocator.resize(30);
        assert_eq!(allocator.size(), 30);
        // The boundary is pending again after a shrink.
        assert_eq!(allocator.work_range(0, 30), None);
        assert!(allocator.has_work());
    }

    #[test]
    fn fuzz_against_bitmap() {
        let mut rng = SmallRng::seed_from_u64(44);
        for _ in 0..100 {
            let size = 120;
            let mut allocator = WorkAllocator::new(size);
            let mut bitmap = vec![true; size];
            for _ in 0..60 {
                let from = rng.gen_range(0..=size);
                let to = rng.gen_range(from..=size);
                if rng.gen_bool(0.5) {
                    allocator.done(from, to);
                    bitmap[from..to].fill(false);
                } else {
                    allocator.undone(from, to);
                    bitmap[from..to].fill(true);
                }

                let mut expected = Vec::new();
                let mut start = None;
                for (i, &pending) in bitmap.iter().enumerate() {
                    match (pending, start) {
                        (true, None) => start = Some(i),
                        (false, Some(s)) => {
                            expected.push(s..i);
                            start = None;
                        }
                        _ => {}
                    }
                }
                if let Some(s) = start {
                    expected.push(s..size);
                }
                assert_eq!(allocator.pending(), expected);
            }
        }
    }
}
