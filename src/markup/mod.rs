//! The incremental layout engine. [`Markup`] keeps a tree of measured
//! chunks parallel to the text: each chunk carries the layout metrics of a
//! bounded run of content, plus the measurer state threading between
//! consecutive chunks (wrapped layout needs the carried line width). After
//! an edit only a placeholder covering the edited span is inserted; actual
//! measurement happens lazily, pulled from a [`WorkAllocator`] in
//! size-bounded increments, the remainder on idle time granted by the
//! embedder through an [`IdleScheduler`].
//!
//! The same tree answers point↔offset conversion in O(log n) and drives
//! [`Markup::build_frame`], which extracts a renderer-agnostic description
//! of one viewport.

mod frame;

pub use frame::{
    BackgroundSpan, Frame, FrameContent, FrameLine, LineDecorations, ScrollbarMarker, TextRun,
    VisibleRange,
};

use std::ops::Range;
use std::rc::Rc;

use monoid_tree::Tree;
use smallvec::SmallVec;

use crate::anchor::Anchor;
use crate::document::{DocumentChange, Replacement};
use crate::metrics::{TextKey, TextMetrics};
use crate::range_tree::RangeTree;
use crate::text::measure::{
    same_measurer, GlyphMeasurer, LineWrapMeasurer, Measure, TextMeasurer, WordWrapMeasurer,
};
use crate::work::WorkAllocator;
use crate::{Offset, Point, RoundMode, Text};

/// Style names attached to decorations; opaque to the core.
pub type Style = smartstring::alias::String;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WrappingMode {
    None,
    Line,
    Word,
}

/// A pixel rectangle, the viewport for [`Markup::build_frame`].
#[derive(Copy, Clone, Debug, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// How document positions map onto the scrollbar: `ratio` scales content
/// pixels to scrollbar pixels, and markers are at least
/// `min_decoration_height` tall.
#[derive(Copy, Clone, Debug)]
pub struct ScrollbarParams {
    pub ratio: f64,
    pub min_decoration_height: f64,
}

pub type IdleToken = u64;

/// The idle-scheduling capability, injected by the embedder. A request asks
/// the host to call [`Markup::on_idle`] at its next idle slot; the token
/// identifies the request for cancellation. Cancelling an already-fired or
/// unknown token must be tolerated.
pub trait IdleScheduler {
    fn request_idle(&self) -> IdleToken;
    fn cancel_idle(&self, token: IdleToken);
}

/// A chunk-tree payload: either a placeholder for a not-yet-measured span
/// (its metrics are sized only by length) or a measured chunk carrying the
/// measurer that produced it and the states at its edges.
#[derive(Clone)]
struct Chunk {
    measured: Option<Measured>,
}

#[derive(Clone)]
struct Measured {
    measurer: Rc<dyn Measure>,
    state_before: f64,
    state_after: f64,
}

impl Chunk {
    fn unmeasured() -> Chunk {
        Chunk { measured: None }
    }

    fn measured(measurer: Rc<dyn Measure>, state_before: f64, state_after: f64) -> Chunk {
        Chunk {
            measured: Some(Measured {
                measurer,
                state_before,
                state_after,
            }),
        }
    }
}

type ChunkTree = Tree<Chunk, TextMetrics>;

// Measured chunks cover at most this many bytes.
const CHUNK_SIZE: usize = 1000;
// Per-pass re-measurement budgets. Wrapped layout pays word scanning per
// unit, hence the smaller budget.
const RECHUNK_BUDGET: usize = 10_000_000;
const WRAP_RECHUNK_BUDGET: usize = 5_000_000;

/// Joined gaps may grow up to this share of the visible content.
const FRAME_GAP_JOIN_RATIO: f64 = 0.5;

pub struct Markup {
    text: Text,
    glyphs: Rc<dyn GlyphMeasurer>,
    scheduler: Rc<dyn IdleScheduler>,
    line_height: f64,
    default_width: f64,
    wrapping_mode: WrappingMode,
    wrapping_limit: Option<f64>,
    measurer: Rc<dyn Measure>,
    tree: ChunkTree,
    allocator: WorkAllocator,
    hidden_ranges: RangeTree<()>,
    job: Option<IdleToken>,
    last_frame_range: Range<Offset>,
    content_width: f64,
    content_height: f64,
    chunk_size: usize,
    budget: usize,
    wrap_budget: usize,
}

impl Markup {
    pub fn new(glyphs: Rc<dyn GlyphMeasurer>, text: Text, scheduler: Rc<dyn IdleScheduler>) -> Markup {
        let line_height = glyphs.line_height();
        let default_width = glyphs.default_width();
        let mut markup = Markup {
            measurer: Rc::new(TextMeasurer::new(glyphs.clone())),
            text,
            glyphs,
            scheduler,
            line_height,
            default_width,
            wrapping_mode: WrappingMode::None,
            wrapping_limit: None,
            tree: Tree::new(),
            allocator: WorkAllocator::new(0),
            hidden_ranges: RangeTree::new(),
            job: None,
            last_frame_range: 0..0,
            content_width: 0.0,
            content_height: 0.0,
            chunk_size: CHUNK_SIZE,
            budget: RECHUNK_BUDGET,
            wrap_budget: WRAP_RECHUNK_BUDGET,
        };
        markup.recreate_measurer();
        markup
    }

    pub fn text(&self) -> &Text {
        &self.text
    }

    pub fn line_height(&self) -> f64 {
        self.line_height
    }

    pub fn content_width(&self) -> f64 {
        self.content_width
    }

    pub fn content_height(&self) -> f64 {
        self.content_height
    }

    /// Whether some of the text still awaits (re)measurement. While this is
    /// true, an idle continuation is pending with the scheduler.
    pub fn has_pending_work(&self) -> bool {
        self.allocator.has_work()
    }

    /// Swaps the glyph source (a font change). Everything is re-measured.
    pub fn set_glyph_measurer(&mut self, glyphs: Rc<dyn GlyphMeasurer>) {
        if Rc::ptr_eq(&self.glyphs, &glyphs) {
            return;
        }
        self.glyphs = glyphs;
        self.line_height = self.glyphs.line_height();
        self.default_width = self.glyphs.default_width();
        self.recreate_measurer();
    }

    /// Sets the wrapping mode; `limit` is the line width in pixels.
    /// Panics when the limit is narrower than about two characters.
    pub fn set_wrapping_mode(&mut self, mode: WrappingMode, limit: Option<f64>) {
        let limit = limit.map(|px| px / self.default_width);
        if self.wrapping_mode == mode && self.wrapping_limit == limit {
            return;
        }
        if let Some(limit) = limit {
            assert!(limit >= 2.0, "wrap limit cannot be this small");
        }
        assert!(
            mode == WrappingMode::None || limit.is_some(),
            "wrapping requires a limit"
        );
        self.wrapping_mode = mode;
        self.wrapping_limit = limit;
        self.recreate_measurer();
    }

    /// Excludes `[from, to)` from layout (folded code and the like). The
    /// span must not intersect an already hidden one.
    pub fn hide_range(&mut self, from: Anchor, to: Anchor) {
        assert!(
            self.hidden_ranges.count_touching(from, to) == 0,
            "hidden ranges cannot intersect"
        );
        self.hidden_ranges.add(from, to, ());
        self.allocator.undone(from.offset, to.offset);
        self.rechunk_last_frame_range();
    }

    /// Applies a document change. Changes must arrive in the order they
    /// happened; replacements within one change are applied in order.
    pub fn apply(&mut self, change: &DocumentChange) {
        if change.replacements.is_empty() {
            return;
        }
        for replacement in &change.replacements {
            self.replace_span(replacement);
        }
        self.rechunk_last_frame_range();
    }

    /// The embedder's idle tick: re-enters measurement with a fresh budget.
    pub fn on_idle(&mut self) {
        self.job = None;
        self.rechunk_everything();
    }

    /// Cancels the pending idle continuation, if any.
    pub fn cancel_idle_work(&mut self) {
        if let Some(token) = self.job.take() {
            self.scheduler.cancel_idle(token);
        }
    }

    /// Converts a pixel point to the nearest offset, clamped to content.
    pub fn point_to_offset(&self, point: Point, round: RoundMode) -> Offset {
        self.virtual_point_to_offset(
            Point {
                x: point.x / self.default_width,
                y: point.y / self.line_height,
            },
            round,
        )
    }

    /// Converts an offset (clamped) to a pixel point.
    pub fn offset_to_point(&self, offset: Offset) -> Point {
        let point = self.offset_to_virtual_point(offset);
        Point {
            x: point.x * self.default_width,
            y: point.y * self.line_height,
        }
    }

    fn recreate_measurer(&mut self) {
        self.measurer = match (self.wrapping_mode, self.wrapping_limit) {
            (WrappingMode::Line, Some(limit)) => {
                Rc::new(LineWrapMeasurer::new(self.glyphs.clone(), limit))
            }
            (WrappingMode::Word, Some(limit)) => {
                Rc::new(WordWrapMeasurer::new(self.glyphs.clone(), limit))
            }
            _ => Rc::new(TextMeasurer::new(self.glyphs.clone())),
        };
        self.allocator = WorkAllocator::new(self.text.len());
        self.rechunk_last_frame_range();
    }

    fn replace_span(&mut self, replacement: &Replacement) {
        let from = replacement.offset;
        let to = from + replacement.removed.len();
        let inserted = replacement.inserted.len();
        self.last_frame_range =
            rebase_frame_range(self.last_frame_range.clone(), from, to, inserted);
        self.text = replacement.after.clone();
        self.allocator.replace(from, to, inserted);
        self.hidden_ranges.replace(from, to, inserted);

        let split = self.tree.split(TextKey::Offset(from), TextKey::Offset(to));
        let new_from = split.left.value().length;
        let new_to = self.text.len() - split.right.value().length;

        // Cover the neighbouring chunks too, so wrapping is recomputed
        // across the word at the edit boundary.
        let mut undone_from = new_from;
        let mut undone_to = new_to;
        if let Some((_, value)) = split.right.first() {
            undone_to = new_to + value.length;
        }
        if let Some((_, value)) = split.left.last() {
            undone_from = new_from - value.length;
        }
        self.allocator.undone(undone_from, undone_to);

        let middle = if new_from != new_to {
            Tree::build(
                vec![Chunk::unmeasured()],
                vec![self.measurer.unmapped_value(new_to - new_from)],
            )
        } else {
            Tree::new()
        };
        self.tree = Tree::merge(&split.left, &Tree::merge(&middle, &split.right));
    }

    fn rechunk_last_frame_range(&mut self) {
        let range = self.last_frame_range.clone();
        self.rechunk(range.start, range.end);
    }

    fn rechunk_everything(&mut self) {
        self.rechunk(0, self.text.len());
    }

    fn rechunk(&mut self, rechunk_from: Offset, rechunk_to: Offset) {
        let mut budget = match self.wrapping_mode {
            WrappingMode::None => self.budget,
            _ => self.wrap_budget,
        };
        while budget > 0 {
            let Some(range) = self.allocator.work_range(rechunk_from, rechunk_to) else {
                break;
            };
            let from = range.start;
            let to = range.end.min(from + budget);
            let done = self.rechunk_range(from, to, budget);
            if done.is_empty() {
                // A degenerate window on a chunk boundary; the idle pass
                // will pick the span up with the full window.
                break;
            }
            budget = budget.saturating_sub(done.end - done.start);
        }

        let metrics = self.tree.value();
        self.content_width = metrics.longest_width * self.default_width;
        self.content_height = (1 + metrics.line_breaks) as f64 * self.line_height;

        if self.job.is_none() && self.allocator.has_work() {
            self.job = Some(self.scheduler.request_idle());
        }
    }

    fn rechunk_range(&mut self, from: Offset, to: Offset, budget: usize) -> Range<Offset> {
        let split = self.tree.split(TextKey::Offset(from), TextKey::Offset(to));
        let new_from = split.left.value().length;
        let mut new_to = self.text.len() - split.right.value().length;

        // Bound the work even when the split pulled in big chunks; the
        // leftover span gets an unmeasured placeholder below.
        let mut correction = None;
        if new_to > new_from + budget + 2 * self.chunk_size {
            correction = Some(new_to);
            new_to = new_from + budget;
        }
        new_to = self.text.ceil_char_boundary(new_to);

        let mut data: Vec<Chunk> = Vec::new();
        let mut values: Vec<TextMetrics> = Vec::new();

        // The carried state is only valid when the preceding chunk was
        // measured by this very measurer.
        let mut state = match split.left.last() {
            Some((chunk, _)) => match &chunk.measured {
                Some(m) if same_measurer(&m.measurer, &self.measurer) => m.state_after,
                _ => self.measurer.empty_state(),
            },
            None => self.measurer.empty_state(),
        };

        let mut cursor = self.text.iterator_bounded(new_from, new_from, new_to);
        let mut boundaries: SmallVec<(Anchor, Anchor), 4> = SmallVec::new();
        boundaries.push((Anchor::left(new_from), Anchor::left(new_from)));
        for hidden in self
            .hidden_ranges
            .list_touching(Anchor::left(new_from), Anchor::left(new_to))
        {
            boundaries.push((hidden.from, hidden.to));
        }
        boundaries.push((Anchor::right(new_to), Anchor::right(new_to)));

        for window in 0..boundaries.len() - 1 {
            // Hidden spans become placeholder chunks: sized, never measured.
            let range_from = boundaries[window].1.offset.min(new_to);
            if (cursor.offset() as usize) < range_from {
                data.push(Chunk::unmeasured());
                values.push(
                    self.measurer
                        .unmapped_value(range_from - cursor.offset() as usize),
                );
                cursor.reset(range_from);
            }
            let range_to = boundaries[window + 1].0.offset.min(new_to);
            while (cursor.offset() as usize) < range_to {
                let size = (range_to - cursor.offset() as usize).min(self.chunk_size);
                // The read extends past `size` rather than splitting a
                // character.
                let chunk = cursor.read(size);
                let (metrics, state_after) = self.measurer.map_value(&chunk, state);
                data.push(Chunk::measured(self.measurer.clone(), state, state_after));
                values.push(metrics);
                state = state_after;
            }
        }

        match correction {
            Some(correction) if correction > new_to => {
                data.push(Chunk::unmeasured());
                values.push(self.measurer.unmapped_value(correction - new_to));
            }
            _ => {
                // The next chunk's recorded entry state may disagree with
                // the state we just produced; if so its metrics are stale
                // even though its text never changed.
                if let Some((chunk, value)) = split.right.first() {
                    let stale = match &chunk.measured {
                        None => true,
                        Some(m) => {
                            !same_measurer(&m.measurer, &self.measurer)
                                || !self.measurer.states_equal(m.state_before, state)
                        }
                    };
                    if stale {
                        self.allocator.undone(new_to, new_to + value.length);
                    }
                }
            }
        }

        self.tree = Tree::merge(
            &split.left,
            &Tree::merge(&Tree::build(data, values), &split.right),
        );
        self.allocator.done(new_from, new_to);
        new_from..new_to
    }

    fn clamp_virtual_point(&self, point: Point) -> Point {
        if point.y < 0.0 {
            return Point { x: 0.0, y: 0.0 };
        }
        let point = if point.x < 0.0 {
            Point { x: 0.0, y: point.y }
        } else {
            point
        };
        let metrics = self.tree.value();
        let max = Point {
            x: metrics.last_width,
            y: metrics.line_breaks as f64,
        };
        if point.y > max.y {
            max
        } else {
            point
        }
    }

    fn virtual_point_to_offset(&self, point: Point, round: RoundMode) -> Offset {
        let point = self.clamp_virtual_point(point);
        let mut iter = self.tree.iter();
        iter.locate(TextKey::Point(point));
        let measured = iter.data().and_then(|chunk| chunk.measured.as_ref());
        let Some(measured) = measured else {
            return iter.before().map_or(0, |before| before.length);
        };
        let before = iter.before().copied().unwrap_or_default();
        let length = iter.value().map_or(0, |value| value.length);
        let chunk_text = self.text.content(before.length, before.length + length);
        measured
            .measurer
            .locate_by_point(&chunk_text, measured.state_before, &before, point, round)
            .offset
    }

    fn offset_to_virtual_point(&self, offset: Offset) -> Point {
        let offset = offset.min(self.text.len());
        let mut iter = self.tree.iter();
        iter.locate(TextKey::Offset(offset));
        let measured = iter.data().and_then(|chunk| chunk.measured.as_ref());
        let Some(measured) = measured else {
            return iter.before().map_or(Point { x: 0.0, y: 0.0 }, |before| Point {
                x: before.last_width,
                y: before.line_breaks as f64,
            });
        };
        let before = iter.before().copied().unwrap_or_default();
        let length = iter.value().map_or(0, |value| value.length);
        let chunk_text = self.text.content(before.length, before.length + length);
        let location =
            measured
                .measurer
                .locate_by_offset(&chunk_text, measured.state_before, &before, offset);
        Point {
            x: location.x,
            y: location.y,
        }
    }

    /// Builds a frame for the pixel rectangle: walks visible lines
    /// top-to-bottom, collects visible ranges (coalescing same-measurer
    /// neighbours and gap-joining across lines), lets the decoration
    /// callbacks mark up the visible content, and renders text runs,
    /// background spans, line styles and scrollbar markers into `frame`.
    pub fn build_frame(
        &mut self,
        frame: &mut Frame,
        rect: Rect,
        scrollbar: ScrollbarParams,
        decoration_callbacks: &mut [&mut dyn FnMut(&mut FrameContent)],
    ) {
        frame.line_height = self.line_height;

        let mut lines: Vec<Line> = Vec::new();
        let mut ranges: Vec<Range<Offset>> = Vec::new();

        let mut y = self
            .offset_to_point(self.point_to_offset(
                Point {
                    x: rect.left,
                    y: rect.top,
                },
                RoundMode::Floor,
            ))
            .y;
        while y <= rect.top + rect.height {
            if self.tree.is_empty() {
                lines.push(Line::empty(&self.measurer));
                break;
            }
            let mut iter = self.tree.iter();
            let point = self.clamp_virtual_point(Point {
                x: rect.left / self.default_width,
                y: y / self.line_height,
            });
            iter.locate(TextKey::Point(point));

            let before = iter.before().copied().unwrap_or_default();
            let mut offset = before.length;
            let mut x = before.last_width;
            let mut chunk_text: Option<String> = None;
            match iter.data().map(|chunk| chunk.measured.clone()) {
                Some(Some(measured)) => {
                    let length = iter.value().map_or(0, |value| value.length);
                    let content = self.text.content(offset, offset + length);
                    let location = measured.measurer.locate_by_point(
                        &content,
                        measured.state_before,
                        &before,
                        point,
                        RoundMode::Floor,
                    );
                    offset = location.offset;
                    x = location.x;
                    chunk_text = Some(content);
                }
                Some(None) => {}
                None => {
                    // Past the last chunk; stop unless this is exactly the
                    // final line.
                    if (before.line_breaks as f64) < y / self.line_height {
                        break;
                    }
                }
            }
            x *= self.default_width;

            let mut line = Line {
                y,
                start: self.point_to_offset(Point { x: 0.0, y }, RoundMode::Floor),
                end: self.point_to_offset(
                    Point {
                        x: self.content_width,
                        y,
                    },
                    RoundMode::Floor,
                ),
                ranges: SmallVec::new(),
            };
            if iter.after().is_none() {
                line.ranges.push(LineRange {
                    from: offset,
                    to: offset,
                    x,
                    measurer: self.measurer.clone(),
                });
                lines.push(line);
                break;
            }

            while x <= rect.left + rect.width {
                let measured = iter.data().and_then(|chunk| chunk.measured.clone());
                let before = iter.before().copied().unwrap_or_default();
                let after = iter.after().copied().unwrap_or_default();
                match measured {
                    None => {
                        assert!(
                            before.last_width == after.last_width,
                            "sized chunk left unmeasured inside a line"
                        );
                    }
                    Some(measured) => {
                        let mut range_end = after.length;
                        let mut overflow = false;
                        let limit = Point {
                            x: (rect.left + rect.width) / self.default_width,
                            y: y / self.line_height,
                        };
                        let after_y = after.line_breaks as f64;
                        if after_y > limit.y || (after_y == limit.y && after.last_width >= limit.x)
                        {
                            let content = chunk_text.take().unwrap_or_else(|| {
                                self.text.content(before.length, after.length)
                            });
                            range_end = measured
                                .measurer
                                .locate_by_point(
                                    &content,
                                    measured.state_before,
                                    &before,
                                    limit,
                                    RoundMode::Ceil,
                                )
                                .offset;
                            overflow = true;
                        }
                        chunk_text = None;

                        ranges.push(offset..range_end);
                        let joined = match line.ranges.last_mut() {
                            Some(prev)
                                if prev.to == offset
                                    && same_measurer(&prev.measurer, &measured.measurer) =>
                            {
                                prev.to = range_end;
                                true
                            }
                            _ => false,
                        };
                        if !joined {
                            line.ranges.push(LineRange {
                                from: offset,
                                to: range_end,
                                x,
                                measurer: measured.measurer.clone(),
                            });
                        }
                        if overflow {
                            break;
                        }
                    }
                }
                iter.next();
                let before = iter.before().copied().unwrap_or_default();
                x = before.last_width * self.default_width;
                offset = before.length;
                if iter.after().is_none() {
                    break;
                }
            }

            lines.push(line);
            y += self.line_height;
        }

        let joined = join_ranges(&ranges, &self.text);
        let total_range = match (joined.first(), joined.last()) {
            (Some(first), Some(last)) => first.from..last.to,
            _ => 0..0,
        };

        let mut content = FrameContent::new(self.text.clone(), total_range.clone(), joined);
        for callback in decoration_callbacks.iter_mut() {
            callback(&mut content);
        }

        self.build_frame_contents(frame, &lines, &mut content);
        self.build_frame_scrollbar(frame, &mut content, scrollbar);

        self.last_frame_range = total_range;
    }

    fn build_frame_contents(&self, frame: &mut Frame, lines: &[Line], content: &mut FrameContent) {
        for line in lines {
            for (range_index, range) in line.ranges.iter().enumerate() {
                let (from, to) = (range.from, range.to);
                let mut xmap = vec![0.0f32; to - from + 1];
                let mut rtl = vec![false; to - from + 1];
                let range_content = self.text.content(from, to);
                range
                    .measurer
                    .fill_x_map(&mut xmap, &mut rtl, &range_content, range.x, self.default_width);

                for decorations in content.text_decorations.iter_mut() {
                    decorations.visit_touching(
                        Anchor::left(from),
                        Anchor::right(to),
                        |d_from, d_to, style| {
                            let mut d_from = from.max(d_from.offset);
                            let d_to = to.min(d_to.offset);
                            // Runs split at direction boundaries so each one
                            // paints left to right.
                            while d_from < d_to {
                                let mut end = d_from + 1;
                                while end < d_to && !rtl[end - from] {
                                    end += 1;
                                }
                                frame.text.push(TextRun {
                                    x: xmap[d_from - from] as f64,
                                    y: line.y,
                                    content: range_content[d_from - from..end - from].to_string(),
                                    style: style.clone(),
                                });
                                d_from = end;
                            }
                        },
                    );
                }

                let range_left = if range_index == 0 {
                    frame.line_left
                } else {
                    xmap[0] as f64
                };
                let range_right = if range_index == line.ranges.len() - 1 {
                    frame.line_right
                } else {
                    xmap[to - from] as f64
                };
                for decorations in content.background_decorations.iter_mut() {
                    // One invisible character of slack on both sides, so
                    // borders extending past the viewport still paint.
                    decorations.visit_touching(
                        Anchor::left(from.saturating_sub(1)),
                        Anchor::left(to + 1),
                        |d_from, d_to, style| {
                            let left = if d_from.offset < line.start {
                                range_left
                            } else {
                                xmap[d_from.offset.clamp(from, to) - from] as f64
                            };
                            let right = if d_to.offset > line.end {
                                range_right
                            } else {
                                xmap[d_to.offset.clamp(from, to) - from] as f64
                            };
                            if left <= right {
                                frame.background.push(BackgroundSpan {
                                    x: left,
                                    y: line.y,
                                    width: right - left,
                                    style: style.clone(),
                                });
                            }
                        },
                    );
                }
            }

            let mut styles: Vec<Style> = Vec::new();
            for decorations in content.line_decorations.iter_mut() {
                // `line.start` itself is excluded so a decoration ending at
                // a line start does not bleed into that line.
                let touching = decorations
                    .ranges
                    .count_touching(Anchor::right(line.start), Anchor::right(line.end));
                if touching > 0 && !styles.contains(&decorations.style) {
                    styles.push(decorations.style.clone());
                }
            }
            frame.lines.push(FrameLine {
                first: self.text.offset_to_position(line.start).line,
                last: self.text.offset_to_position(line.end).line,
                y: line.y,
                styles,
            });
        }
    }

    fn build_frame_scrollbar(
        &self,
        frame: &mut Frame,
        content: &mut FrameContent,
        params: ScrollbarParams,
    ) {
        let ScrollbarParams {
            ratio,
            min_decoration_height,
        } = params;
        for decorations in content.line_decorations.iter_mut() {
            let style = decorations.style.clone();
            let line_height = frame.line_height;
            let mut last_top = -1.0f64;
            let mut last_bottom = -1.0f64;
            decorations.ranges.sparse_visit_all(|d_from, d_to, _| {
                let top = self.offset_to_point(d_from.offset).y * ratio;
                let mut bottom = (self.offset_to_point(d_to.offset).y + line_height) * ratio;
                bottom = bottom.max(top + min_decoration_height);

                if top <= last_bottom {
                    // Overlapping markers merge into one.
                    last_bottom = bottom;
                } else {
                    if last_top >= 0.0 {
                        frame.scrollbar.push(ScrollbarMarker {
                            y: last_top,
                            height: last_bottom - last_top,
                            style: style.clone(),
                        });
                    }
                    last_top = top;
                    last_bottom = bottom;
                }

                // Everything mapping into the merged marker can be skipped.
                let next = self.point_to_offset(
                    Point {
                        x: 0.0,
                        y: bottom / ratio,
                    },
                    RoundMode::Floor,
                );
                Anchor::left(d_to.offset.max(next))
            });
            if last_top >= 0.0 {
                frame.scrollbar.push(ScrollbarMarker {
                    y: last_top,
                    height: last_bottom - last_top,
                    style,
                });
            }
        }
    }

    #[cfg(test)]
    fn set_test_limits(&mut self, chunk_size: usize, budget: usize) {
        self.chunk_size = chunk_size;
        self.budget = budget;
        self.wrap_budget = budget;
    }

    #[cfg(test)]
    fn metrics(&self) -> TextMetrics {
        self.tree.value()
    }
}

/// One visual line being assembled, with the visible ranges found on it.
struct Line {
    y: f64,
    /// First and last offset of the whole visual line, visible or not.
    start: Offset,
    end: Offset,
    ranges: SmallVec<LineRange, 4>,
}

struct LineRange {
    from: Offset,
    to: Offset,
    x: f64,
    measurer: Rc<dyn Measure>,
}

impl Line {
    fn empty(measurer: &Rc<dyn Measure>) -> Line {
        let mut ranges = SmallVec::new();
        ranges.push(LineRange {
            from: 0,
            to: 0,
            x: 0.0,
            measurer: measurer.clone(),
        });
        Line {
            y: 0.0,
            start: 0,
            end: 0,
            ranges,
        }
    }
}

fn rebase_frame_range(
    range: Range<Offset>,
    from: Offset,
    to: Offset,
    inserted: usize,
) -> Range<Offset> {
    if range.start >= to {
        let delta = inserted as isize - (to - from) as isize;
        let start = range.start.checked_add_signed(delta).unwrap_or(0);
        let end = range.end.checked_add_signed(delta).unwrap_or(0);
        start..end
    } else {
        range
    }
}

/// Joins the gaps between visible ranges, smallest first, until the joined
/// total reaches [`FRAME_GAP_JOIN_RATIO`] of the visible content. Fewer,
/// larger ranges mean fewer decoration-callback invocations at the price of
/// scanning some invisible text.
fn join_ranges(ranges: &[Range<Offset>], text: &Text) -> Vec<VisibleRange> {
    let total: usize = ranges.iter().map(|range| range.end - range.start).sum();
    let mut gaps: Vec<(usize, usize)> = ranges
        .windows(2)
        .enumerate()
        .map(|(i, pair)| (i, pair[1].start.saturating_sub(pair[0].end)))
        .collect();
    gaps.sort_by_key(|&(i, length)| (length, i));

    let mut join = vec![false; ranges.len()];
    let mut remaining = total as f64 * FRAME_GAP_JOIN_RATIO;
    for (i, length) in gaps {
        remaining -= length as f64;
        if remaining < 0.0 {
            break;
        }
        join[i] = true;
    }

    let mut result: Vec<VisibleRange> = Vec::new();
    for (i, range) in ranges.iter().enumerate() {
        if i > 0 && join[i - 1] {
            result.last_mut().unwrap().to = range.end;
        } else {
            result.push(VisibleRange::new(text, range.start, range.end));
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Every character is one pixel wide, lines are ten pixels tall.
    struct UnitGlyphs;

    impl GlyphMeasurer for UnitGlyphs {
        fn line_height(&self) -> f64 {
            10.0
        }
        fn default_width(&self) -> f64 {
            1.0
        }
        fn measure(&self, _ch: char) -> f64 {
            1.0
        }
        fn is_default_width(&self, _s: &str) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct TestScheduler {
        requested: Cell<u64>,
        cancelled: Cell<u64>,
    }

    impl IdleScheduler for TestScheduler {
        fn request_idle(&self) -> IdleToken {
            self.requested.set(self.requested.get() + 1);
            self.requested.get()
        }
        fn cancel_idle(&self, _token: IdleToken) {
            self.cancelled.set(self.cancelled.get() + 1);
        }
    }

    fn markup_over(content: &str) -> (Markup, Rc<TestScheduler>) {
        let scheduler = Rc::new(TestScheduler::default());
        let markup = Markup::new(
            Rc::new(UnitGlyphs),
            Text::from(content),
            scheduler.clone(),
        );
        (markup, scheduler)
    }

    fn drain(markup: &mut Markup) {
        while markup.has_pending_work() {
            markup.on_idle();
        }
    }

    #[test]
    fn measures_on_idle_time() {
        let (mut markup, scheduler) = markup_over("one\ntwo two\nthree");
        // Nothing is measured yet, but an idle continuation is pending.
        assert!(markup.has_pending_work());
        assert!(scheduler.requested.get() > 0);

        markup.on_idle();
        assert!(!markup.has_pending_work());
        assert_eq!(markup.content_height(), 30.0);
        assert_eq!(markup.content_width(), 7.0);
    }

    #[test]
    fn cancel_is_a_no_op_without_work() {
        let (mut markup, scheduler) = markup_over("abc");
        markup.cancel_idle_work();
        assert_eq!(scheduler.cancelled.get(), 1);
        // No token pending anymore: nothing to cancel.
        markup.cancel_idle_work();
        assert_eq!(scheduler.cancelled.get(), 1);
    }

    #[test]
    fn offset_point_conversions_roundtrip() {
        let content = "alpha\nbeta gamma\nd";
        let (mut markup, _) = markup_over(content);
        drain(&mut markup);

        for (offset, x, y) in [(0, 0.0, 0.0), (5, 5.0, 0.0), (6, 0.0, 10.0), (18, 1.0, 20.0)] {
            let point = markup.offset_to_point(offset);
            assert_eq!((point.x, point.y), (x, y), "offset {offset}");
            assert_eq!(
                markup.point_to_offset(point, RoundMode::Floor),
                offset,
                "offset {offset}"
            );
        }

        // Out-of-content points clamp.
        assert_eq!(
            markup.point_to_offset(Point { x: 99.0, y: 0.0 }, RoundMode::Floor),
            5
        );
        assert_eq!(
            markup.point_to_offset(Point { x: 50.0, y: 500.0 }, RoundMode::Floor),
            content.len()
        );
        assert_eq!(
            markup.point_to_offset(Point { x: -3.0, y: -2.0 }, RoundMode::Floor),
            0
        );
        assert_eq!(markup.offset_to_point(1000).y, 20.0);
    }

    /// Edits the markup's text directly, the way a document listener would
    /// relay a change.
    fn apply_edit(markup: &mut Markup, from: usize, to: usize, insertion: &str) {
        let insertion = Text::from(insertion);
        let replaced = markup.text().replace(from, to, &insertion);
        let change = DocumentChange {
            replacements: vec![Replacement {
                offset: from,
                removed: replaced.removed,
                inserted: insertion,
                after: replaced.result,
            }],
            selection_changed: false,
            old_selection: None,
        };
        markup.apply(&change);
    }

    #[test]
    fn edits_invalidate_only_the_span() {
        let content = "aaaa\nbbbb\ncccc\ndddd";
        let (mut markup, _) = markup_over(content);
        markup.set_test_limits(4, 1000);
        drain(&mut markup);

        apply_edit(&mut markup, 5, 9, "BBBBBB");
        assert!(markup.has_pending_work());
        drain(&mut markup);

        assert_eq!(markup.content_width(), 6.0);
        assert_eq!(markup.content_height(), 40.0);
        assert_eq!(markup.offset_to_point(11).y, 10.0);

        let (mut fresh, _) = markup_over("aaaa\nBBBBBB\ncccc\ndddd");
        fresh.set_test_limits(4, 1000);
        drain(&mut fresh);
        assert_eq!(markup.metrics(), fresh.metrics());
    }

    #[test]
    fn incremental_rechunk_matches_fresh_measurement() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(21);
        for wrap in [false, true] {
            let mut reference = String::from("the quick brown fox\njumps over the lazy dog\n");
            let (mut markup, _) = markup_over(&reference);
            markup.set_test_limits(7, 13);
            if wrap {
                markup.set_wrapping_mode(WrappingMode::Word, Some(9.0));
            }

            for _ in 0..40 {
                let from = rng.gen_range(0..=reference.len());
                let to = rng.gen_range(from..=reference.len());
                let insertion: String = (0..rng.gen_range(0..6))
                    .map(|_| {
                        if rng.gen_bool(0.15) {
                            '\n'
                        } else {
                            rng.gen_range(b'a'..=b'z') as char
                        }
                    })
                    .collect();

                apply_edit(&mut markup, from, to, &insertion);
                reference.replace_range(from..to, &insertion);

                // Sometimes let the idle work run dry, sometimes leave it.
                if rng.gen_bool(0.4) {
                    drain(&mut markup);
                }
            }
            drain(&mut markup);

            let (mut fresh, _) = markup_over(&reference);
            fresh.set_test_limits(7, 13);
            if wrap {
                fresh.set_wrapping_mode(WrappingMode::Word, Some(9.0));
            }
            drain(&mut fresh);

            assert_eq!(markup.metrics(), fresh.metrics(), "wrap = {wrap}");
        }
    }

    #[test]
    fn wrap_state_change_invalidates_the_next_chunk() {
        let (mut markup, _) = markup_over("aaa bb ccc dd");
        markup.set_test_limits(7, 1000);
        markup.set_wrapping_mode(WrappingMode::Word, Some(6.0));
        drain(&mut markup);
        let height_before = markup.content_height();

        // Deleting "aaa " changes the carried width entering later chunks,
        // which must propagate even though their text is untouched.
        apply_edit(&mut markup, 0, 4, "");
        drain(&mut markup);

        let (mut fresh, _) = markup_over("bb ccc dd");
        fresh.set_test_limits(7, 1000);
        fresh.set_wrapping_mode(WrappingMode::Word, Some(6.0));
        drain(&mut fresh);
        assert_eq!(markup.metrics(), fresh.metrics());
        assert!(markup.content_height() < height_before);
    }

    #[test]
    fn wrapping_increases_content_height() {
        let (mut markup, _) = markup_over("aaaa bbbb cccc");
        drain(&mut markup);
        assert_eq!(markup.content_height(), 10.0);

        markup.set_wrapping_mode(WrappingMode::Word, Some(5.0));
        drain(&mut markup);
        assert_eq!(markup.content_height(), 30.0);
        assert!(markup.content_width() <= 5.0);

        markup.set_wrapping_mode(WrappingMode::None, None);
        drain(&mut markup);
        assert_eq!(markup.content_height(), 10.0);
    }

    #[test]
    #[should_panic(expected = "small")]
    fn tiny_wrap_limit_is_rejected() {
        let (mut markup, _) = markup_over("abc");
        markup.set_wrapping_mode(WrappingMode::Word, Some(1.5));
    }

    #[test]
    fn hidden_ranges_are_excluded_from_layout() {
        let (mut markup, _) = markup_over("visible HIDDEN visible");
        markup.set_test_limits(4, 1000);
        drain(&mut markup);
        assert_eq!(markup.content_width(), 22.0);

        markup.hide_range(Anchor::left(7), Anchor::left(14));
        drain(&mut markup);
        // The hidden span contributes length but no width.
        assert_eq!(markup.content_width(), 15.0);
        assert_eq!(markup.content_height(), 10.0);
        // Offsets inside the hidden span collapse to its start.
        assert_eq!(markup.offset_to_point(10).x, markup.offset_to_point(7).x);
    }

    #[test]
    #[should_panic(expected = "intersect")]
    fn intersecting_hidden_ranges_are_rejected() {
        let (mut markup, _) = markup_over("0123456789");
        markup.hide_range(Anchor::left(2), Anchor::left(6));
        markup.hide_range(Anchor::left(4), Anchor::left(8));
    }

    fn build(markup: &mut Markup, rect: Rect, content_hook: &mut dyn FnMut(&mut FrameContent)) -> Frame {
        let mut frame = Frame::new();
        let scrollbar = ScrollbarParams {
            ratio: 0.1,
            min_decoration_height: 2.0,
        };
        markup.build_frame(&mut frame, rect, scrollbar, &mut [content_hook]);
        frame
    }

    #[test]
    fn frame_covers_visible_lines() {
        let (mut markup, _) = markup_over("one\ntwo\nthree\nfour\nfive");
        drain(&mut markup);

        let seen: Rc<Cell<usize>> = Rc::default();
        let sink = seen.clone();
        let frame = build(
            &mut markup,
            Rect {
                left: 0.0,
                top: 10.0,
                width: 100.0,
                height: 20.0,
            },
            &mut |content| {
                sink.set(content.ranges.len());
                assert_eq!(content.text.content(content.range.start, content.range.end), "two\nthree\nfour");
            },
        );

        // Lines two, three and four are visible; the gaps joined into one
        // visible range.
        assert_eq!(seen.get(), 1);
        assert_eq!(frame.lines.len(), 3);
        assert_eq!(frame.lines[0].first, 1);
        assert_eq!(frame.lines[0].y, 10.0);
        assert_eq!(frame.lines[2].first, 3);
    }

    #[test]
    fn frame_renders_decorated_text_runs() {
        let (mut markup, _) = markup_over("hello world");
        drain(&mut markup);

        let frame = build(
            &mut markup,
            Rect {
                left: 0.0,
                top: 0.0,
                width: 100.0,
                height: 10.0,
            },
            &mut |content| {
                let mut styled = RangeTree::new();
                styled.add(Anchor::left(0), Anchor::left(5), Style::from("keyword"));
                styled.add(Anchor::left(6), Anchor::left(11), Style::from("name"));
                content.text_decorations.push(styled);

                let mut backgrounds = RangeTree::new();
                backgrounds.add(Anchor::left(6), Anchor::left(11), Style::from("selection"));
                content.background_decorations.push(backgrounds);

                let mut lines = RangeTree::new();
                lines.add(Anchor::left(0), Anchor::left(2), ());
                content.line_decorations.push(LineDecorations {
                    style: Style::from("current"),
                    ranges: lines,
                });
            },
        );

        assert_eq!(frame.text.len(), 2);
        assert_eq!(frame.text[0].content, "hello");
        assert_eq!(frame.text[0].x, 0.0);
        assert_eq!(frame.text[1].content, "world");
        assert_eq!(frame.text[1].x, 6.0);

        assert_eq!(frame.background.len(), 1);
        assert_eq!(frame.background[0].x, 6.0);
        assert_eq!(frame.background[0].width, 5.0);

        assert_eq!(frame.lines.len(), 1);
        assert_eq!(frame.lines[0].styles, vec![Style::from("current")]);

        assert_eq!(frame.scrollbar.len(), 1);
        assert_eq!(frame.scrollbar[0].y, 0.0);
        assert_eq!(frame.scrollbar[0].height, 2.0);
    }

    #[test]
    fn frame_gap_joining_is_deterministic() {
        let content = "0123456789\n0123456789\n0123456789";
        let (mut markup, _) = markup_over(content);
        drain(&mut markup);

        let rect = Rect {
            left: 20.0,
            top: 0.0,
            width: 30.0,
            height: 30.0,
        };
        let collect = |markup: &mut Markup| {
            let ranges: Rc<std::cell::RefCell<Vec<(usize, usize)>>> = Rc::default();
            let sink = ranges.clone();
            build(markup, rect, &mut move |content| {
                sink.borrow_mut()
                    .extend(content.ranges.iter().map(|r| (r.from, r.to)));
            });
            Rc::try_unwrap(ranges).unwrap().into_inner()
        };
        let first = collect(&mut markup);
        let second = collect(&mut markup);
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[test]
    fn empty_text_produces_an_empty_frame() {
        let (mut markup, _) = markup_over("");
        drain(&mut markup);
        let frame = build(
            &mut markup,
            Rect {
                left: 0.0,
                top: 0.0,
                width: 50.0,
                height: 20.0,
            },
            &mut |content| {
                assert_eq!(content.range, 0..0);
            },
        );
        assert_eq!(frame.lines.len(), 1);
        assert!(frame.text.is_empty());
    }
}
