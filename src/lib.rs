//! Weft is the text-storage and incremental-layout core of an editable-text
//! system. It is built around three structures sharing one offset space:
//!
//! 1. [`Text`] — an immutable, structurally shared text buffer. Every
//!    [`Text::replace`] returns a new buffer plus the removed content; old
//!    versions stay valid forever, which makes snapshots and undo data free.
//! 2. [`RangeTree`] — a mutable collection of disjoint anchor ranges which
//!    are rebased over every edit. This is how decorations, dirty regions
//!    and any other edit-stable positions are tracked.
//! 3. [`Markup`] — an incremental layout engine keeping a measured chunk
//!    tree parallel to the text. After an edit only the invalidated span is
//!    re-measured, in size-bounded increments, the remainder on idle time.
//!
//! Under all three sits [`monoid_tree::Tree`], a persistent treap whose
//! nodes carry [`TextMetrics`] values, so the same tree answers lookups by
//! byte offset, by line/column and by layout point in O(log n).
//!
//! Offsets throughout are byte offsets into UTF-8 text and are expected to
//! lie on `char` boundaries. Out-of-range offsets, positions and points are
//! clamped; malformed arguments (reversed ranges, overlapping decorations,
//! boundary-splitting offsets) are programming errors and panic.
//!
//! The crate talks to its host through three small capabilities: a
//! [`GlyphMeasurer`](text::measure::GlyphMeasurer) supplying character
//! widths, an [`IdleScheduler`](markup::IdleScheduler) granting idle-time
//! slots for background measurement, and change listeners registered on
//! [`Document`]. Rendering, input and persistence live entirely outside.

pub mod anchor;
pub mod document;
pub mod markup;
pub mod metrics;
pub mod range_tree;
pub mod text;
pub mod work;

pub use anchor::{Anchor, Bias};
pub use document::{Document, DocumentChange, Replacement, SelectionRange};
pub use markup::{
    Frame, FrameContent, IdleScheduler, Markup, Rect, ScrollbarParams, Style, VisibleRange,
    WrappingMode,
};
pub use metrics::{TextKey, TextMetrics};
pub use range_tree::{RangeData, RangeHandle, RangeTree};
pub use text::{Text, TextIterator};
pub use work::WorkAllocator;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub(crate) type Str = smartstring::alias::String;

/// A byte offset into UTF-8 text, on a `char` boundary.
pub type Offset = usize;

/// A 2d point. Units depend on context: pixels at the [`Markup`] surface,
/// virtual units (default-width columns, line-height rows) internally.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// A line/column position. Columns count characters from the line start.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

/// How to snap a width which falls between two characters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum RoundMode {
    /// Snap to the earlier character.
    #[default]
    Floor,
    /// Snap to whichever character boundary is closer.
    Round,
    /// Snap to the later character.
    Ceil,
}
