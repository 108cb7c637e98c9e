//! Measurers map chunks of text to [`TextMetrics`] and back: given a chunk
//! they produce its metrics, and given a point or offset inside a chunk
//! they produce the exact location. Three implementations exist: plain
//! (lines break only at `\n`), line-wrapping and word-wrapping. The
//! wrapping measurers are stateful: the width of the unfinished visual line
//! at the end of one chunk is carried into the next.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use smallvec::SmallVec;
use str_indices::chars;

use crate::metrics::TextMetrics;
use crate::{Point, RoundMode};

/// Absolute location in a measured text: byte offset plus 2d point in
/// virtual units.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Location {
    pub offset: usize,
    pub x: f64,
    pub y: f64,
}

/// The external width-measurement capability. Implementations typically
/// wrap platform font metrics; the core only ever asks for single
/// characters and caches the answers.
pub trait GlyphMeasurer {
    /// Height of one line, in pixels.
    fn line_height(&self) -> f64;
    /// Width of a typical character, in pixels. Internal widths are
    /// expressed as multiples of this.
    fn default_width(&self) -> f64;
    /// Width of a single character, in pixels.
    fn measure(&self, ch: char) -> f64;
    /// Whether every character of `s` has exactly the default width.
    /// A fast path; returning `false` is always safe.
    fn is_default_width(&self, s: &str) -> bool;
}

/// Per-character widths in default-width units, with caching. With no
/// glyph source every character is one unit wide, which is what the plain
/// text buffer uses for line/column math.
pub(crate) struct CharWidths {
    glyphs: Option<Rc<dyn GlyphMeasurer>>,
    scale: f64,
    cache: RefCell<HashMap<char, f64>>,
}

impl CharWidths {
    fn unit() -> Self {
        CharWidths {
            glyphs: None,
            scale: 1.0,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn scaled(glyphs: Rc<dyn GlyphMeasurer>) -> Self {
        let scale = 1.0 / glyphs.default_width();
        CharWidths {
            glyphs: Some(glyphs),
            scale,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn width_of(&self, ch: char) -> f64 {
        match &self.glyphs {
            None => 1.0,
            Some(glyphs) => *self
                .cache
                .borrow_mut()
                .entry(ch)
                .or_insert_with(|| glyphs.measure(ch) * self.scale),
        }
    }

    /// Whether byte arithmetic is valid on `s`: every character is one byte
    /// long and one unit wide.
    fn uniform(&self, s: &str) -> bool {
        s.is_ascii()
            && self
                .glyphs
                .as_ref()
                .is_none_or(|glyphs| glyphs.is_default_width(s))
    }

    /// Total width of `s[from..to]`, which must not contain line breaks.
    fn measure_str(&self, s: &str, from: usize, to: usize) -> f64 {
        if from == to {
            return 0.0;
        }
        let seg = &s[from..to];
        if self.uniform(seg) {
            return (to - from) as f64;
        }
        match &self.glyphs {
            None => chars::count(seg) as f64,
            Some(_) => {
                let mut width = 0.0;
                for ch in seg.chars() {
                    if ch == '\n' {
                        panic!("cannot measure across a line break");
                    }
                    width += self.width_of(ch);
                }
                width
            }
        }
    }

    /// Finds the offset at `width` within `s[from..to]` (no line breaks).
    /// Returns `(None, total)` when the segment is narrower than `width`.
    fn locate_by_width(
        &self,
        s: &str,
        from: usize,
        to: usize,
        width: f64,
        round: RoundMode,
    ) -> (Option<usize>, f64) {
        if width == 0.0 {
            return (Some(from), 0.0);
        }
        let seg = &s[from..to];
        if self.uniform(seg) {
            let span = (to - from) as f64;
            if width > span {
                return (None, span);
            }
            let snapped = width.floor();
            if snapped == width || round == RoundMode::Floor {
                return (Some(from + snapped as usize), snapped);
            }
            if round == RoundMode::Ceil || width - snapped > snapped + 1.0 - width {
                return (Some(from + snapped as usize + 1), snapped + 1.0);
            }
            return (Some(from + snapped as usize), snapped);
        }

        let mut w = 0.0;
        for (i, ch) in seg.char_indices() {
            if ch == '\n' {
                panic!("cannot measure across a line break");
            }
            let offset = from + i;
            let next_offset = offset + ch.len_utf8();
            let next_w = w + self.width_of(ch);
            if next_w > width {
                if w == width || round == RoundMode::Floor {
                    return (Some(offset), w);
                }
                if round == RoundMode::Ceil || width - w > next_w - width {
                    return (Some(next_offset), next_w);
                }
                return (Some(offset), w);
            }
            w = next_w;
        }
        if w < width {
            (None, w)
        } else {
            (Some(to), w)
        }
    }

    /// Fills `xmap[i]` with the x-coordinate before byte `i` (starting at
    /// `start_x`, widths multiplied by `multiplier`) and flags the first
    /// byte of every right-to-left character. Interior bytes of a multibyte
    /// character share the character's left edge.
    fn fill_x_map(
        &self,
        xmap: &mut [f32],
        is_rtl: &mut [bool],
        s: &str,
        start_x: f64,
        multiplier: f64,
    ) {
        debug_assert_eq!(xmap.len(), s.len() + 1);
        let mut x = start_x;
        xmap[0] = x as f32;
        for (i, ch) in s.char_indices() {
            let len = ch.len_utf8();
            for interior in i + 1..i + len {
                xmap[interior] = x as f32;
                is_rtl[interior] = false;
            }
            is_rtl[i] = is_rtl_char(ch);
            x += self.width_of(ch) * multiplier;
            xmap[i + len] = x as f32;
        }
        is_rtl[s.len()] = false;
    }
}

fn is_rtl_char(ch: char) -> bool {
    let cp = ch as u32;
    (0x0590..=0x089F).contains(&cp)
        || cp == 0x200F
        || (0xFB1D..=0xFDFF).contains(&cp)
        || (0xFE70..=0xFEFF).contains(&cp)
        || (0x10800..=0x10FFF).contains(&cp)
        || (0x1E800..=0x1EFFF).contains(&cp)
}

/// Maps chunks to metrics and locates points/offsets inside them. `state`
/// is the running measurement state threaded between consecutive chunks;
/// stateless measurers ignore it.
pub trait Measure {
    /// Whether state threads between chunks. When false, any state value is
    /// acceptable and [`Measure::states_equal`] is vacuously true.
    fn stateful(&self) -> bool {
        false
    }

    fn empty_state(&self) -> f64 {
        0.0
    }

    fn states_equal(&self, a: f64, b: f64) -> bool {
        let _ = (a, b);
        true
    }

    /// Metrics for a chunk, plus the state to pass into the next chunk.
    fn map_value(&self, s: &str, state: f64) -> (TextMetrics, f64);

    /// Placeholder metrics for a not-yet-measured span, sized only by
    /// length.
    fn unmapped_value(&self, length: usize) -> TextMetrics {
        TextMetrics {
            length,
            ..TextMetrics::default()
        }
    }

    /// Locates `point` inside a chunk. `before` is the combined metrics at
    /// the chunk start; the returned location is absolute. `point` must not
    /// precede the chunk start.
    fn locate_by_point(
        &self,
        s: &str,
        state: f64,
        before: &TextMetrics,
        point: Point,
        round: RoundMode,
    ) -> Location;

    /// Locates an absolute byte `offset` inside a chunk. An offset landing
    /// inside a character snaps back to the character start.
    fn locate_by_offset(&self, s: &str, state: f64, before: &TextMetrics, offset: usize)
        -> Location;

    /// See [`CharWidths::fill_x_map`]. `s` must lie on one visual line.
    fn fill_x_map(
        &self,
        xmap: &mut [f32],
        is_rtl: &mut [bool],
        s: &str,
        start_x: f64,
        multiplier: f64,
    );
}

/// Measurer identity, used to tell whether a cached chunk was produced by
/// the currently installed measurer.
pub(crate) fn same_measurer(a: &Rc<dyn Measure>, b: &Rc<dyn Measure>) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

/// The shared line-walking core behind the concrete measurers: each one
/// only has to say where the visual line containing a point or offset
/// starts and ends.
trait LineLocator {
    fn widths(&self) -> &CharWidths;

    /// `(x, y)` is the position at the chunk start. Returns the line
    /// containing `point` with its start position.
    fn locate_line_by_point(&self, s: &str, state: f64, x: f64, y: f64, point: Point) -> LineSpan;

    /// Returns `(line_start, x, y)` for the line containing `offset`.
    fn locate_line_by_offset(
        &self,
        s: &str,
        state: f64,
        offset: usize,
        x: f64,
        y: f64,
    ) -> (usize, f64, f64);
}

struct LineSpan {
    start: usize,
    end: usize,
    x: f64,
    y: f64,
}

fn locate_by_point_impl<M: LineLocator>(
    m: &M,
    s: &str,
    state: f64,
    before: &TextMetrics,
    point: Point,
    round: RoundMode,
) -> Location {
    let x = before.last_width;
    let y = before.line_breaks as f64;
    if point.y < y || (point.y < y + 1.0 && point.x < x) {
        panic!("point precedes the chunk start");
    }
    let line = m.locate_line_by_point(s, state, x, y, point);
    let (offset, width) =
        m.widths()
            .locate_by_width(s, line.start, line.end, point.x - line.x, round);
    let offset = offset.unwrap_or(line.end);
    Location {
        offset: before.length + offset,
        x: line.x + width,
        y: line.y,
    }
}

fn locate_by_offset_impl<M: LineLocator>(
    m: &M,
    s: &str,
    state: f64,
    before: &TextMetrics,
    offset: usize,
) -> Location {
    assert!(
        offset >= before.length && offset - before.length <= s.len(),
        "offset outside the chunk"
    );
    let mut rel = offset - before.length;
    while !s.is_char_boundary(rel) {
        rel -= 1;
    }
    let x = before.last_width;
    let y = before.line_breaks as f64;
    let (line_start, x, y) = m.locate_line_by_offset(s, state, rel, x, y);
    let width = m.widths().measure_str(s, line_start, rel);
    Location {
        offset: before.length + rel,
        x: x + width,
        y,
    }
}

/// Plain measurer: lines break only at `\n`. Stateless.
pub struct TextMeasurer {
    widths: CharWidths,
}

impl TextMeasurer {
    /// One width unit per character; what [`crate::Text`] uses for
    /// line/column math.
    pub fn unit() -> Self {
        TextMeasurer {
            widths: CharWidths::unit(),
        }
    }

    pub fn new(glyphs: Rc<dyn GlyphMeasurer>) -> Self {
        TextMeasurer {
            widths: CharWidths::scaled(glyphs),
        }
    }
}

impl LineLocator for TextMeasurer {
    fn widths(&self) -> &CharWidths {
        &self.widths
    }

    fn locate_line_by_point(
        &self,
        s: &str,
        _state: f64,
        mut x: f64,
        mut y: f64,
        point: Point,
    ) -> LineSpan {
        let mut line_start = 0;
        while y + 1.0 <= point.y {
            let Some(brk) = s[line_start..].find('\n') else {
                panic!("point beyond the chunk");
            };
            y += 1.0;
            x = 0.0;
            line_start += brk + 1;
        }
        let line_end = s[line_start..]
            .find('\n')
            .map_or(s.len(), |brk| line_start + brk);
        LineSpan {
            start: line_start,
            end: line_end,
            x,
            y,
        }
    }

    fn locate_line_by_offset(
        &self,
        s: &str,
        _state: f64,
        offset: usize,
        mut x: f64,
        mut y: f64,
    ) -> (usize, f64, f64) {
        let mut line_start = 0;
        while let Some(brk) = s[line_start..].find('\n') {
            if line_start + brk >= offset {
                break;
            }
            y += 1.0;
            x = 0.0;
            line_start += brk + 1;
        }
        (line_start, x, y)
    }
}

impl Measure for TextMeasurer {
    fn map_value(&self, s: &str, _state: f64) -> (TextMetrics, f64) {
        let mut metrics = TextMetrics {
            length: s.len(),
            ..TextMetrics::default()
        };
        let uniform = self.widths.uniform(s);
        let mut offset = 0;
        loop {
            let line_break = s[offset..].find('\n').map(|i| offset + i);
            let line_end = line_break.unwrap_or(s.len());
            let width = if uniform {
                (line_end - offset) as f64
            } else {
                self.widths.measure_str(s, offset, line_end)
            };
            if offset == 0 {
                metrics.first_width = width;
            }
            metrics.longest_width = metrics.longest_width.max(width);
            let Some(brk) = line_break else {
                metrics.last_width = width;
                break;
            };
            metrics.line_breaks += 1;
            offset = brk + 1;
        }
        (metrics, 0.0)
    }

    fn locate_by_point(
        &self,
        s: &str,
        state: f64,
        before: &TextMetrics,
        point: Point,
        round: RoundMode,
    ) -> Location {
        locate_by_point_impl(self, s, state, before, point, round)
    }

    fn locate_by_offset(
        &self,
        s: &str,
        state: f64,
        before: &TextMetrics,
        offset: usize,
    ) -> Location {
        locate_by_offset_impl(self, s, state, before, offset)
    }

    fn fill_x_map(
        &self,
        xmap: &mut [f32],
        is_rtl: &mut [bool],
        s: &str,
        start_x: f64,
        multiplier: f64,
    ) {
        self.widths.fill_x_map(xmap, is_rtl, s, start_x, multiplier)
    }
}

/// One visual line produced by wrapping: the byte offset where the next
/// line starts (past any `\n`) and this line's width.
#[derive(Copy, Clone, Debug, PartialEq)]
struct WrapPoint {
    offset: usize,
    width: f64,
}

type WrapPoints = SmallVec<WrapPoint, 8>;

/// The wrapping measurers share everything except the wrap computation
/// itself. The carried state is the width already consumed on the visual
/// line the chunk starts on.
trait Wrapping {
    fn widths(&self) -> &CharWidths;
    fn wrap(&self, s: &str, state: f64) -> WrapPoints;
}

fn wrap_map_value<M: Wrapping>(m: &M, s: &str, state: f64) -> (TextMetrics, f64) {
    let segments = m.wrap(s, state);
    let mut metrics = TextMetrics {
        length: s.len(),
        ..TextMetrics::default()
    };
    for (i, segment) in segments.iter().enumerate() {
        if i == 0 {
            metrics.first_width = segment.width;
        }
        metrics.longest_width = metrics.longest_width.max(segment.width);
        metrics.last_width = segment.width;
    }
    metrics.line_breaks = segments.len() - 1;
    let next_state = if metrics.line_breaks > 0 {
        metrics.last_width
    } else {
        metrics.last_width + state
    };
    (metrics, next_state)
}

fn wrap_locate_line_by_point<M: Wrapping>(
    m: &M,
    s: &str,
    state: f64,
    mut x: f64,
    mut y: f64,
    point: Point,
) -> LineSpan {
    let wrapped = m.wrap(s, state);
    let mut line = 0;
    while y + 1.0 <= point.y {
        if line == wrapped.len() - 1 {
            panic!("point beyond the chunk");
        }
        y += 1.0;
        x = 0.0;
        line += 1;
    }
    let start = if line == 0 { 0 } else { wrapped[line - 1].offset };
    let mut end = wrapped[line].offset;
    if end > 0 && s.as_bytes()[end - 1] == b'\n' {
        end -= 1;
    }
    LineSpan { start, end, x, y }
}

fn wrap_locate_line_by_offset<M: Wrapping>(
    m: &M,
    s: &str,
    state: f64,
    offset: usize,
    x: f64,
    y: f64,
) -> (usize, f64, f64) {
    let wrapped = m.wrap(s, state);
    let mut line = 0;
    while line < wrapped.len() && offset >= wrapped[line].offset {
        line += 1;
    }
    let start = if line == 0 { 0 } else { wrapped[line - 1].offset };
    let x = if line == 0 { x } else { 0.0 };
    (start, x, y + line as f64)
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Wraps at word boundaries, splitting a word only when it alone exceeds
/// the limit.
pub struct WordWrapMeasurer {
    widths: CharWidths,
    limit: f64,
}

impl WordWrapMeasurer {
    pub fn new(glyphs: Rc<dyn GlyphMeasurer>, limit: f64) -> Self {
        WordWrapMeasurer {
            widths: CharWidths::scaled(glyphs),
            limit,
        }
    }

    #[cfg(test)]
    pub(crate) fn unit(limit: f64) -> Self {
        WordWrapMeasurer {
            widths: CharWidths::unit(),
            limit,
        }
    }
}

impl Wrapping for WordWrapMeasurer {
    fn widths(&self) -> &CharWidths {
        &self.widths
    }

    fn wrap(&self, s: &str, state: f64) -> WrapPoints {
        let limit = self.limit;
        let mut result = WrapPoints::new();
        let mut width = state;
        let mut line_start = 0;

        loop {
            let line_end = s[line_start..]
                .find('\n')
                .map_or(s.len(), |brk| line_start + brk);

            // A wrap unit is a word together with the separators after it:
            // lines break only in front of words. Unit boundaries are the
            // positions where a word begins after a non-word character.
            let mut flushes: SmallVec<usize, 8> = SmallVec::new();
            let mut prev_word = false;
            for (i, ch) in s[line_start..line_end].char_indices() {
                let word = is_word_char(ch);
                if word && !prev_word && i > 0 {
                    flushes.push(line_start + i);
                }
                prev_word = word;
            }
            flushes.push(line_end);

            let mut unit_start = line_start;
            for &unit_end in &flushes {
                if unit_end == unit_start {
                    continue;
                }
                let mut w = self.widths.measure_str(s, unit_start, unit_end);
                let mut from = unit_start;
                while width + w > limit {
                    if width > 0.0 {
                        result.push(WrapPoint { offset: from, width });
                        width = 0.0;
                    } else {
                        // The unit alone is too wide; cut it at the limit.
                        let (located, located_width) =
                            self.widths
                                .locate_by_width(s, from, unit_end, limit, RoundMode::Floor);
                        let located = located.unwrap_or(unit_end);
                        result.push(WrapPoint {
                            offset: located,
                            width: located_width,
                        });
                        w -= located_width;
                        from = located;
                    }
                }
                width += w;
                unit_start = unit_end;
            }

            let last = line_end == s.len();
            let offset = if last { line_end } else { line_end + 1 };
            result.push(WrapPoint { offset, width });
            width = 0.0;
            if last {
                break;
            }
            line_start = offset;
        }

        result[0].width -= state;
        result
    }
}

impl Measure for WordWrapMeasurer {
    fn stateful(&self) -> bool {
        true
    }

    fn states_equal(&self, a: f64, b: f64) -> bool {
        a == b
    }

    fn map_value(&self, s: &str, state: f64) -> (TextMetrics, f64) {
        wrap_map_value(self, s, state)
    }

    fn locate_by_point(
        &self,
        s: &str,
        state: f64,
        before: &TextMetrics,
        point: Point,
        round: RoundMode,
    ) -> Location {
        locate_by_point_impl(self, s, state, before, point, round)
    }

    fn locate_by_offset(
        &self,
        s: &str,
        state: f64,
        before: &TextMetrics,
        offset: usize,
    ) -> Location {
        locate_by_offset_impl(self, s, state, before, offset)
    }

    fn fill_x_map(
        &self,
        xmap: &mut [f32],
        is_rtl: &mut [bool],
        s: &str,
        start_x: f64,
        multiplier: f64,
    ) {
        self.widths.fill_x_map(xmap, is_rtl, s, start_x, multiplier)
    }
}

impl LineLocator for WordWrapMeasurer {
    fn widths(&self) -> &CharWidths {
        &self.widths
    }

    fn locate_line_by_point(&self, s: &str, state: f64, x: f64, y: f64, point: Point) -> LineSpan {
        wrap_locate_line_by_point(self, s, state, x, y, point)
    }

    fn locate_line_by_offset(
        &self,
        s: &str,
        state: f64,
        offset: usize,
        x: f64,
        y: f64,
    ) -> (usize, f64, f64) {
        wrap_locate_line_by_offset(self, s, state, offset, x, y)
    }
}

/// Wraps at the width limit regardless of word boundaries.
pub struct LineWrapMeasurer {
    widths: CharWidths,
    limit: f64,
}

impl LineWrapMeasurer {
    pub fn new(glyphs: Rc<dyn GlyphMeasurer>, limit: f64) -> Self {
        LineWrapMeasurer {
            widths: CharWidths::scaled(glyphs),
            limit,
        }
    }

    #[cfg(test)]
    pub(crate) fn unit(limit: f64) -> Self {
        LineWrapMeasurer {
            widths: CharWidths::unit(),
            limit,
        }
    }
}

impl Wrapping for LineWrapMeasurer {
    fn widths(&self) -> &CharWidths {
        &self.widths
    }

    fn wrap(&self, s: &str, state: f64) -> WrapPoints {
        let limit = self.limit;
        let mut result = WrapPoints::new();
        let mut width = state;
        let mut line_start = 0;

        loop {
            let line_end = s[line_start..]
                .find('\n')
                .map_or(s.len(), |brk| line_start + brk);
            let mut offset = line_start;
            while offset < line_end {
                let (located, located_width) =
                    self.widths
                        .locate_by_width(s, offset, line_end, limit - width, RoundMode::Floor);
                let located = located.unwrap_or(line_end);
                result.push(WrapPoint {
                    offset: located,
                    width: located_width,
                });
                offset = located;
                width = 0.0;
            }

            if line_end == s.len() {
                break;
            }
            let empty_line = line_end == line_start;
            let offset = line_end + 1;
            if empty_line {
                result.push(WrapPoint { offset, width });
                width = 0.0;
            } else {
                result.last_mut().unwrap().offset += 1;
            }
            line_start = offset;
        }

        if result.is_empty() {
            result.push(WrapPoint {
                offset: s.len(),
                width,
            });
        }
        result[0].width -= state;
        result
    }
}

impl Measure for LineWrapMeasurer {
    fn stateful(&self) -> bool {
        true
    }

    fn states_equal(&self, a: f64, b: f64) -> bool {
        a == b
    }

    fn map_value(&self, s: &str, state: f64) -> (TextMetrics, f64) {
        wrap_map_value(self, s, state)
    }

    fn locate_by_point(
        &self,
        s: &str,
        state: f64,
        before: &TextMetrics,
        point: Point,
        round: RoundMode,
    ) -> Location {
        locate_by_point_impl(self, s, state, before, point, round)
    }

    fn locate_by_offset(
        &self,
        s: &str,
        state: f64,
        before: &TextMetrics,
        offset: usize,
    ) -> Location {
        locate_by_offset_impl(self, s, state, before, offset)
    }

    fn fill_x_map(
        &self,
        xmap: &mut [f32],
        is_rtl: &mut [bool],
        s: &str,
        start_x: f64,
        multiplier: f64,
    ) {
        self.widths.fill_x_map(xmap, is_rtl, s, start_x, multiplier)
    }
}

impl LineLocator for LineWrapMeasurer {
    fn widths(&self) -> &CharWidths {
        &self.widths
    }

    fn locate_line_by_point(&self, s: &str, state: f64, x: f64, y: f64, point: Point) -> LineSpan {
        wrap_locate_line_by_point(self, s, state, x, y, point)
    }

    fn locate_line_by_offset(
        &self,
        s: &str,
        state: f64,
        offset: usize,
        x: f64,
        y: f64,
    ) -> (usize, f64, f64) {
        wrap_locate_line_by_offset(self, s, state, offset, x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap_offsets(m: &impl Wrapping, s: &str, state: f64) -> Vec<(usize, f64)> {
        m.wrap(s, state)
            .into_iter()
            .map(|p| (p.offset, p.width))
            .collect()
    }

    #[test]
    fn plain_locate_by_offset() {
        let m = TextMeasurer::unit();
        let before = TextMetrics::default();
        let loc = m.locate_by_offset("ab\ncd", 0.0, &before, 4);
        assert_eq!(loc, Location { offset: 4, x: 1.0, y: 1.0 });
    }

    #[test]
    fn plain_locate_by_point_rounding() {
        let m = TextMeasurer::unit();
        let before = TextMetrics::default();
        let at = |x: f64, round: RoundMode| {
            m.locate_by_point("abcd", 0.0, &before, Point { x, y: 0.0 }, round)
                .offset
        };
        assert_eq!(at(1.4, RoundMode::Floor), 1);
        assert_eq!(at(1.4, RoundMode::Round), 1);
        assert_eq!(at(1.6, RoundMode::Round), 2);
        assert_eq!(at(1.4, RoundMode::Ceil), 2);
        assert_eq!(at(2.0, RoundMode::Ceil), 2);
    }

    #[test]
    fn plain_locate_continues_from_before() {
        let m = TextMeasurer::unit();
        // A preceding chunk "xy\nz" ends mid line at width 1.
        let before = TextMetrics {
            length: 4,
            line_breaks: 1,
            first_width: 2.0,
            last_width: 1.0,
            longest_width: 2.0,
        };
        let loc = m.locate_by_offset("ab\ncd", 0.0, &before, 5);
        assert_eq!(loc, Location { offset: 5, x: 2.0, y: 1.0 });
        let loc = m.locate_by_point(
            "ab\ncd",
            0.0,
            &before,
            Point { x: 1.0, y: 2.0 },
            RoundMode::Floor,
        );
        assert_eq!(loc, Location { offset: 8, x: 1.0, y: 2.0 });
    }

    #[test]
    fn multibyte_widths_count_characters() {
        let m = TextMeasurer::unit();
        let (metrics, _) = m.map_value("héllo", 0.0);
        assert_eq!(metrics.length, 6);
        assert_eq!(metrics.longest_width, 5.0);
        let loc = m.locate_by_offset("héllo", 0.0, &TextMetrics::default(), 3);
        assert_eq!(loc.x, 2.0);
    }

    #[test]
    fn word_wrap_breaks_between_words() {
        let m = WordWrapMeasurer::unit(4.0);
        assert_eq!(
            wrap_offsets(&m, "aaa bbb", 0.0),
            vec![(4, 4.0), (7, 3.0)]
        );
    }

    #[test]
    fn word_wrap_splits_long_words() {
        let m = WordWrapMeasurer::unit(3.0);
        assert_eq!(
            wrap_offsets(&m, "abcdefgh", 0.0),
            vec![(3, 3.0), (6, 3.0), (8, 2.0)]
        );
    }

    #[test]
    fn word_wrap_carries_state() {
        let m = WordWrapMeasurer::unit(5.0);
        // Continuing a line already 3 wide: "abc" no longer fits after it,
        // so the chunk breaks immediately, contributing no width there.
        assert_eq!(wrap_offsets(&m, "abc", 3.0), vec![(0, 0.0), (3, 3.0)]);
        let (metrics, state) = m.map_value("ab", 3.0);
        assert_eq!(metrics.line_breaks, 0);
        assert_eq!(state, 5.0);
    }

    #[test]
    fn word_wrap_hard_breaks() {
        let m = WordWrapMeasurer::unit(10.0);
        assert_eq!(
            wrap_offsets(&m, "ab\ncd", 0.0),
            vec![(3, 2.0), (5, 2.0)]
        );
        assert_eq!(wrap_offsets(&m, "", 0.0), vec![(0, 0.0)]);
    }

    #[test]
    fn line_wrap_ignores_words() {
        let m = LineWrapMeasurer::unit(3.0);
        assert_eq!(
            wrap_offsets(&m, "ab cdef", 0.0),
            vec![(3, 3.0), (6, 3.0), (7, 1.0)]
        );
    }

    #[test]
    fn line_wrap_empty_lines() {
        let m = LineWrapMeasurer::unit(10.0);
        assert_eq!(
            wrap_offsets(&m, "a\n\nb", 0.0),
            vec![(2, 1.0), (3, 0.0), (4, 1.0)]
        );
    }

    #[test]
    fn wrap_metrics_match_segments() {
        let m = WordWrapMeasurer::unit(4.0);
        let (metrics, state) = m.map_value("aaa bbb", 0.0);
        assert_eq!(metrics.line_breaks, 1);
        assert_eq!(metrics.first_width, 4.0);
        assert_eq!(metrics.last_width, 3.0);
        assert_eq!(metrics.longest_width, 4.0);
        assert_eq!(state, 3.0);
    }

    #[test]
    fn wrap_locate_by_point_on_wrapped_line() {
        let m = WordWrapMeasurer::unit(4.0);
        let before = TextMetrics::default();
        let loc = m.locate_by_point(
            "aaa bbb",
            0.0,
            &before,
            Point { x: 1.0, y: 1.0 },
            RoundMode::Floor,
        );
        assert_eq!(loc, Location { offset: 5, x: 1.0, y: 1.0 });
    }

    #[test]
    #[should_panic(expected = "line break")]
    fn measuring_across_breaks_is_an_error() {
        let m = TextMeasurer::unit();
        m.widths.measure_str("é\nx", 0, 4);
    }

    #[test]
    fn x_map_marks_rtl_and_interior_bytes() {
        let m = TextMeasurer::unit();
        let s = "aא";
        let mut xmap = vec![0.0f32; s.len() + 1];
        let mut is_rtl = vec![false; s.len() + 1];
        m.fill_x_map(&mut xmap, &mut is_rtl, s, 1.0, 2.0);
        assert_eq!(xmap, vec![1.0, 3.0, 3.0, 5.0]);
        assert_eq!(is_rtl, vec![false, true, false, false]);
    }
}
