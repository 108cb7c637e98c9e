//! Frame output types: the renderer-agnostic description of one painted
//! viewport, and the visible-content view handed to decoration callbacks.

use std::cell::RefCell;
use std::ops::Range;

use crate::markup::Style;
use crate::range_tree::RangeTree;
use crate::{Offset, Text};

/// A renderer-agnostic frame description. The embedder owns how these are
/// painted; coordinates are pixels.
#[derive(Default)]
pub struct Frame {
    /// X-coordinates of the left-most and right-most visible points of any
    /// line, used to extend background spans which start or end off-screen.
    pub line_left: f64,
    pub line_right: f64,
    pub line_height: f64,
    pub text: Vec<TextRun>,
    pub background: Vec<BackgroundSpan>,
    pub scrollbar: Vec<ScrollbarMarker>,
    pub lines: Vec<FrameLine>,
}

impl Frame {
    pub fn new() -> Frame {
        Frame::default()
    }
}

/// A run of styled text. Runs never span line or direction boundaries.
#[derive(Clone, Debug, PartialEq)]
pub struct TextRun {
    pub x: f64,
    pub y: f64,
    pub content: String,
    pub style: Style,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackgroundSpan {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub style: Style,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScrollbarMarker {
    pub y: f64,
    pub height: f64,
    pub style: Style,
}

/// One visual line of the frame: the document lines it spans and the
/// whole-line styles applied to it.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameLine {
    pub first: usize,
    pub last: usize,
    pub y: f64,
    pub styles: Vec<Style>,
}

/// Whole-line decorations: ranges grouped under one style, as opposed to
/// the per-span text and background trees.
pub struct LineDecorations {
    pub style: Style,
    pub ranges: RangeTree<()>,
}

/// What a decoration callback sees: the visible content of the frame being
/// built, and the decoration collections it may add to.
pub struct FrameContent {
    pub text: Text,
    /// The total range the visible ranges cover.
    pub range: Range<Offset>,
    /// Continuous ranges of visible text, gap-joined.
    pub ranges: Vec<VisibleRange>,
    pub text_decorations: Vec<RangeTree<Style>>,
    pub background_decorations: Vec<RangeTree<Style>>,
    pub line_decorations: Vec<LineDecorations>,
}

impl FrameContent {
    pub(crate) fn new(text: Text, range: Range<Offset>, ranges: Vec<VisibleRange>) -> Self {
        FrameContent {
            text,
            range,
            ranges,
            text_decorations: Vec::new(),
            background_decorations: Vec::new(),
            line_decorations: Vec::new(),
        }
    }
}

/// A continuous range of visible text. Decoration callbacks usually want
/// the content with a little context around it; the padded content is
/// fetched once and cached, and later requests with smaller paddings are
/// served from the cache.
pub struct VisibleRange {
    text: Text,
    pub from: Offset,
    pub to: Offset,
    cache: RefCell<Option<CachedContent>>,
}

struct CachedContent {
    start: Offset,
    end: Offset,
    content: String,
}

impl VisibleRange {
    pub(crate) fn new(text: &Text, from: Offset, to: Offset) -> Self {
        VisibleRange {
            text: text.clone(),
            from,
            to,
            cache: RefCell::new(None),
        }
    }

    /// The range's content padded by up to the requested number of bytes on
    /// each side, clamped to the text and snapped outward to `char`
    /// boundaries.
    pub fn content(&self, padding_left: usize, padding_right: usize) -> String {
        let start = self
            .text
            .floor_char_boundary(self.from.saturating_sub(padding_left));
        let end = self
            .text
            .ceil_char_boundary((self.to + padding_right).min(self.text.len()));

        let mut cache = self.cache.borrow_mut();
        let refresh = match &*cache {
            None => true,
            Some(cached) => start < cached.start || end > cached.end,
        };
        if refresh {
            let (start, end) = match &*cache {
                Some(cached) => (start.min(cached.start), end.max(cached.end)),
                None => (start, end),
            };
            *cache = Some(CachedContent {
                start,
                end,
                content: self.text.content(start, end),
            });
        }
        let cached = cache.as_ref().unwrap();
        cached.content[start - cached.start..cached.content.len() - (cached.end - end)].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::testing::from_str_chunked;

    #[test]
    fn visible_range_content_with_paddings() {
        let text = from_str_chunked("0123456789", 3);
        let range = VisibleRange::new(&text, 4, 7);
        assert_eq!(range.content(0, 0), "456");
        assert_eq!(range.content(2, 2), "2345678");
        // Served from the cached padded fetch.
        assert_eq!(range.content(1, 0), "3456");
        // Paddings clamp at the text bounds.
        assert_eq!(range.content(100, 100), "0123456789");
    }

    #[test]
    fn visible_range_paddings_snap_to_char_boundaries() {
        let text = from_str_chunked("aé\u{1F600}b", 2);
        let range = VisibleRange::new(&text, 3, 7);
        assert_eq!(range.content(0, 0), "\u{1F600}");
        // One byte of padding pulls in the whole neighbouring character.
        assert_eq!(range.content(1, 1), "é\u{1F600}b");
    }
}
