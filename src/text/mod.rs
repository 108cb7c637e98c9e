//! The text buffer: an immutable sequence of chunks addressed by a
//! metrics tree.
//!
//! A [`Text`] is conceptually a string, stored as a tree of chunks of
//! roughly [`CHUNK_SIZE`] bytes. [`Text::replace`] splits the tree at the
//! edit boundaries and merges the untouched parts into the result, so an
//! edit costs O(log n) and every older version remains valid. Whichever
//! constructor form a text was made from (one string, a chunk list, a tree,
//! or left/middle/right remnants), the tree is only built on first
//! structural access.

pub mod measure;

mod iter;

pub use iter::TextIterator;

use std::cell::RefCell;

use monoid_tree::Tree;

use crate::metrics::{TextKey, TextMetrics};
use crate::text::measure::Measure;
use crate::{Offset, Point, Position, RoundMode, Str};

use measure::TextMeasurer;

pub(crate) type ChunkTree = Tree<Str, TextMetrics>;

// Flat runs this long keep tree depth and copy costs balanced for typical
// documents. Tests shrink it to shake out boundary handling.
pub(crate) const CHUNK_SIZE: usize = 1000;

/// The result of a [`Text::replace`]: the new text and the content the
/// replacement removed (which is what an undo needs to restore).
pub struct Replaced {
    pub result: Text,
    pub removed: Text,
}

/// An immutable text buffer with O(log n) edits and offset/position
/// conversion. Cheap to clone; clones share structure.
#[derive(Clone)]
pub struct Text {
    length: usize,
    repr: RefCell<Repr>,
}

#[derive(Clone)]
enum Repr {
    Tree(ChunkTree),
    Str(Str),
    Chunks(Vec<Str>),
    Lmr {
        left: Str,
        middle: ChunkTree,
        right: Str,
    },
}

impl Text {
    pub fn new() -> Text {
        Text::from("")
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn line_count(&self) -> usize {
        self.tree().value().line_breaks + 1
    }

    /// The content of `[from, to)`, clamped to the text bounds.
    pub fn content(&self, from: Offset, to: Offset) -> String {
        let to = to.min(self.length);
        let from = from.min(to);
        self.iterator_bounded(from, from, to).substr(to - from)
    }

    /// A cursor over the whole text, positioned at `offset`.
    pub fn iterator(&self, offset: Offset) -> TextIterator {
        self.iterator_bounded(offset, 0, self.length)
    }

    /// A cursor confined to `[from, to)`, positioned at `offset` (clamped
    /// into the bounds).
    pub fn iterator_bounded(&self, offset: Offset, from: Offset, to: Offset) -> TextIterator {
        let to = to.min(self.length);
        let from = from.min(to);
        let offset = offset.max(from).min(to);
        let tree = self.tree();
        let mut iter = tree.iter();
        iter.locate(TextKey::Offset(offset));
        TextIterator::new(iter, offset, from, to)
    }

    /// Replaces `[from, to)` with `insertion`, returning the new text and
    /// the removed content. `self` is not modified. Chunks straddling the
    /// boundaries are cut; their surviving edges merge with the insertion
    /// into fresh chunks.
    pub fn replace(&self, from: Offset, to: Offset, insertion: &Text) -> Replaced {
        assert!(
            from <= to && to <= self.length,
            "replace range out of bounds"
        );
        let split = self.tree().split(TextKey::Offset(from), TextKey::Offset(to));
        let left_len = from - split.left.value().length;
        let right_len = self.length - split.right.value().length - to;

        let mut left = Str::new();
        let mut right = Str::new();
        let mut left_removed = Str::new();
        let mut right_removed = Str::new();
        let (first, rest) = split.middle.split_first();
        let removed_middle = match first {
            Some((left_chunk, _)) => {
                assert!(left_len <= left_chunk.len(), "inconsistent chunk split");
                left = Str::from(&left_chunk[..left_len]);
                let (rest, last) = rest.split_last();
                match last {
                    Some((right_chunk, _)) => {
                        assert!(right_len <= right_chunk.len(), "inconsistent chunk split");
                        right = Str::from(&right_chunk[right_chunk.len() - right_len..]);
                        left_removed = Str::from(&left_chunk[left_len..]);
                        right_removed = Str::from(&right_chunk[..right_chunk.len() - right_len]);
                    }
                    None => {
                        assert!(
                            left_len + right_len <= left_chunk.len(),
                            "inconsistent chunk split"
                        );
                        right = Str::from(&left_chunk[left_chunk.len() - right_len..]);
                        left_removed =
                            Str::from(&left_chunk[left_len..left_chunk.len() - right_len]);
                    }
                }
                rest
            }
            None => {
                assert!(left_len + right_len == 0, "inconsistent chunk split");
                rest
            }
        };

        let middle = insertion.build_with_remnants(&left, &right);
        Replaced {
            result: Text::from_tree(Tree::merge(&split.left, &Tree::merge(&middle, &split.right))),
            removed: Text::from_lmr(left_removed, removed_middle, right_removed),
        }
    }

    /// Converts a byte offset (clamped) to a line/column position.
    pub fn offset_to_position(&self, offset: Offset) -> Position {
        let offset = offset.min(self.length);
        let tree = self.tree();
        let mut iter = tree.iter();
        iter.locate(TextKey::Offset(offset));
        match iter.data() {
            None => match iter.before() {
                Some(before) => Position {
                    line: before.line_breaks,
                    column: before.last_width.round() as usize,
                },
                None => Position { line: 0, column: 0 },
            },
            Some(chunk) => {
                let before = iter.before().copied().unwrap_or_default();
                let loc = TextMeasurer::unit().locate_by_offset(chunk, 0.0, &before, offset);
                Position {
                    line: loc.y as usize,
                    column: loc.x.round() as usize,
                }
            }
        }
    }

    /// Converts a position (clamped) back to a byte offset.
    pub fn position_to_offset(&self, position: Position) -> Offset {
        let metrics = self.tree().value();
        let max = Position {
            line: metrics.line_breaks,
            column: metrics.last_width.round() as usize,
        };
        let position = if position.line > max.line {
            max
        } else {
            position
        };
        let point = Point {
            x: position.column as f64,
            y: position.line as f64,
        };
        let tree = self.tree();
        let mut iter = tree.iter();
        iter.locate(TextKey::Point(point));
        match iter.data() {
            None => iter.before().map_or(0, |before| before.length),
            Some(chunk) => {
                let before = iter.before().copied().unwrap_or_default();
                TextMeasurer::unit()
                    .locate_by_point(chunk, 0.0, &before, point, RoundMode::Round)
                    .offset
            }
        }
    }

    /// The smallest `char` boundary at or after `offset`.
    pub(crate) fn ceil_char_boundary(&self, offset: Offset) -> Offset {
        if offset >= self.length {
            return self.length;
        }
        let tree = self.tree();
        let mut iter = tree.iter();
        iter.locate(TextKey::Offset(offset));
        match iter.data() {
            None => self.length,
            Some(chunk) => {
                let start = iter.before().map_or(0, |before| before.length);
                let mut rel = offset - start;
                while rel < chunk.len() && !chunk.is_char_boundary(rel) {
                    rel += 1;
                }
                start + rel
            }
        }
    }

    /// The largest `char` boundary at or before `offset`.
    pub(crate) fn floor_char_boundary(&self, offset: Offset) -> Offset {
        if offset >= self.length {
            return self.length;
        }
        let tree = self.tree();
        let mut iter = tree.iter();
        iter.locate(TextKey::Offset(offset));
        match iter.data() {
            None => self.length,
            Some(chunk) => {
                let start = iter.before().map_or(0, |before| before.length);
                let mut rel = offset - start;
                while rel > 0 && !chunk.is_char_boundary(rel) {
                    rel -= 1;
                }
                start + rel
            }
        }
    }

    /// The built chunk tree, converting from whatever form this text was
    /// constructed in. Cheap once built.
    fn tree(&self) -> ChunkTree {
        let mut repr = self.repr.borrow_mut();
        if let Repr::Tree(tree) = &*repr {
            return tree.clone();
        }
        let built = match std::mem::replace(&mut *repr, Repr::Tree(Tree::new())) {
            Repr::Str(s) => chunked_tree(&[&s]),
            Repr::Chunks(chunks) => {
                let measurer = TextMeasurer::unit();
                let values = chunks
                    .iter()
                    .map(|chunk| measurer.map_value(chunk, 0.0).0)
                    .collect();
                Tree::build(chunks, values)
            }
            Repr::Lmr {
                left,
                middle,
                right,
            } => Tree::merge(
                &chunked_tree(&[&left]),
                &Tree::merge(&middle, &chunked_tree(&[&right])),
            ),
            Repr::Tree(_) => unreachable!(),
        };
        *repr = Repr::Tree(built.clone());
        built
    }

    /// Builds the middle tree for a replace: this text (the insertion) with
    /// the cut-chunk remnants `left`/`right` glued on.
    fn build_with_remnants(&self, left: &str, right: &str) -> ChunkTree {
        // Most follow-up edits land right where this one ended, so `right`
        // is kept as its own chunk unless everything is short enough to
        // collapse into one.
        let combine = left.len() + self.length + right.len() <= CHUNK_SIZE;
        let repr = self.repr.borrow();
        match &*repr {
            Repr::Tree(tree) => {
                if combine {
                    return chunked_tree(&[&flatten(tree, left, right)]);
                }
                if left.len() + self.length <= CHUNK_SIZE {
                    return chunked_tree(&[&flatten(tree, left, ""), right]);
                }
                Tree::merge(
                    &chunked_tree(&[left]),
                    &Tree::merge(tree, &chunked_tree(&[right])),
                )
            }
            Repr::Lmr {
                left: l,
                middle,
                right: r,
            } => {
                if combine {
                    let mut joined = String::from(left);
                    joined.push_str(l);
                    joined.push_str(&flatten(middle, "", ""));
                    joined.push_str(r);
                    joined.push_str(right);
                    return chunked_tree(&[&joined]);
                }
                let glued_left = format!("{left}{l}");
                let glued_right = format!("{r}{right}");
                Tree::merge(
                    &chunked_tree(&[&glued_left]),
                    &Tree::merge(middle, &chunked_tree(&[&glued_right])),
                )
            }
            Repr::Str(s) => {
                if combine {
                    return chunked_tree(&[&format!("{left}{s}{right}")]);
                }
                if left.len() + self.length <= CHUNK_SIZE {
                    return chunked_tree(&[&format!("{left}{s}"), right]);
                }
                // Keep the possibly long string unconcatenated.
                chunked_tree(&[left, s, right])
            }
            Repr::Chunks(chunks) => {
                let measurer = TextMeasurer::unit();
                let mut data = Vec::new();
                let mut values = Vec::new();
                chunk_content(left, &mut data, &mut values, CHUNK_SIZE);
                for chunk in chunks {
                    data.push(chunk.clone());
                    values.push(measurer.map_value(chunk, 0.0).0);
                }
                chunk_content(right, &mut data, &mut values, CHUNK_SIZE);
                Tree::build(data, values)
            }
        }
    }

    fn from_tree(tree: ChunkTree) -> Text {
        let length = tree.value().length;
        Text {
            length,
            repr: RefCell::new(Repr::Tree(tree)),
        }
    }

    fn from_lmr(left: Str, middle: ChunkTree, right: Str) -> Text {
        let length = left.len() + middle.value().length + right.len();
        Text {
            length,
            repr: RefCell::new(Repr::Lmr {
                left,
                middle,
                right,
            }),
        }
    }
}

impl Default for Text {
    fn default() -> Self {
        Text::new()
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Text {
        Text {
            length: s.len(),
            repr: RefCell::new(Repr::Str(Str::from(s))),
        }
    }
}

impl From<String> for Text {
    fn from(s: String) -> Text {
        Text {
            length: s.len(),
            repr: RefCell::new(Repr::Str(Str::from(s))),
        }
    }
}

/// Concatenates `left`, the tree's content, and `right`.
fn flatten(tree: &ChunkTree, left: &str, right: &str) -> String {
    let mut out = String::with_capacity(left.len() + tree.value().length + right.len());
    out.push_str(left);
    for (chunk, _) in tree.collect() {
        out.push_str(&chunk);
    }
    out.push_str(right);
    out
}

/// Builds a tree from several strings, each chunked separately.
fn chunked_tree(content: &[&str]) -> ChunkTree {
    let mut data = Vec::new();
    let mut values = Vec::new();
    for s in content {
        chunk_content(s, &mut data, &mut values, CHUNK_SIZE);
    }
    Tree::build(data, values)
}

/// Cuts `content` into chunks of at most `chunk_size` bytes, extended as
/// needed so no chunk ends inside a character.
fn chunk_content(content: &str, data: &mut Vec<Str>, values: &mut Vec<TextMetrics>, chunk_size: usize) {
    let measurer = TextMeasurer::unit();
    let mut index = 0;
    while index < content.len() {
        let mut end = (index + chunk_size).min(content.len());
        while !content.is_char_boundary(end) {
            end += 1;
        }
        let chunk = &content[index..end];
        data.push(Str::from(chunk));
        values.push(measurer.map_value(chunk, 0.0).0);
        index = end;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub(crate) fn from_str_chunked(s: &str, chunk_size: usize) -> Text {
        let mut data = Vec::new();
        let mut values = Vec::new();
        chunk_content(s, &mut data, &mut values, chunk_size);
        Text::from_tree(Tree::build(data, values))
    }

    pub(crate) fn from_chunks(chunks: Vec<&str>) -> Text {
        let length = chunks.iter().map(|c| c.len()).sum();
        Text {
            length,
            repr: RefCell::new(Repr::Chunks(chunks.into_iter().map(Str::from).collect())),
        }
    }

    pub(crate) fn to_chunks(content: &str, chunk_size: usize) -> Vec<Str> {
        let mut data = Vec::new();
        let mut values = Vec::new();
        chunk_content(content, &mut data, &mut values, chunk_size);
        data
    }
}
