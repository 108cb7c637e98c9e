//! The text-metrics monoid: the shape of a chunk of text, composable so
//! that a tree of chunks knows the shape of any contiguous run.

use monoid_tree::OrderedMonoid;

use crate::{Offset, Point};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Length and line shape of a chunk. Widths are abstract units: one unit
/// per character for plain text, measured layout units inside [`Markup`]
/// (see [`crate::markup`]). `first_width`/`last_width` are the widths of the
/// partial lines at either end, which is what lets two chunks combine
/// without re-scanning their contents.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TextMetrics {
    /// Length in bytes.
    pub length: usize,
    /// Number of line breaks. For wrapped layout this counts visual breaks,
    /// not just `\n`.
    pub line_breaks: usize,
    pub first_width: f64,
    pub last_width: f64,
    pub longest_width: f64,
}

/// Lookup key for trees of [`TextMetrics`]: either a byte offset or a 2d
/// point in virtual units (x in widths, y in lines, possibly fractional).
#[derive(Copy, Clone, Debug)]
pub enum TextKey {
    Offset(Offset),
    Point(Point),
}

impl OrderedMonoid for TextMetrics {
    type Key = TextKey;

    fn identity() -> Self {
        TextMetrics::default()
    }

    fn combine(a: &Self, b: &Self) -> Self {
        TextMetrics {
            length: a.length + b.length,
            line_breaks: a.line_breaks + b.line_breaks,
            longest_width: a
                .longest_width
                .max(a.last_width + b.first_width)
                .max(b.longest_width),
            first_width: a.first_width
                + if a.line_breaks > 0 { 0.0 } else { b.first_width },
            last_width: b.last_width
                + if b.line_breaks > 0 { 0.0 } else { a.last_width },
        }
    }

    fn exceeds(&self, key: TextKey) -> bool {
        match key {
            TextKey::Offset(offset) => self.length > offset,
            TextKey::Point(point) => {
                let line = self.line_breaks as f64;
                line > point.y || (line + 1.0 > point.y && self.last_width > point.x)
            }
        }
    }

    fn reaches(&self, key: TextKey) -> bool {
        match key {
            TextKey::Offset(offset) => self.length >= offset,
            TextKey::Point(point) => {
                let line = self.line_breaks as f64;
                line > point.y || (line + 1.0 > point.y && self.last_width >= point.x)
            }
        }
    }
}
