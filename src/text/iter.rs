//! A bounded, bidirectional cursor over a [`Text`](crate::Text).
//!
//! The cursor operates on an immutable text, so it is never invalidated.
//! Its offset is a byte offset; movements snap to `char` boundaries in the
//! direction of travel, and reads are extended so they never cut a
//! character in half.

use monoid_tree::TreeIter;
use smallvec::SmallVec;

use crate::metrics::TextMetrics;
use crate::Str;

/// A cursor confined to `[from, to)`. The current offset always satisfies
/// `from - 1 <= offset <= to`; both end states are "out of bounds" but the
/// cursor can still be advanced back in.
#[derive(Clone)]
pub struct TextIterator {
    iter: TreeIter<Str, TextMetrics>,
    from: isize,
    to: isize,
    // Byte position within the current chunk. Transiently out of the chunk
    // during moves; negative only in the before-start state.
    pos: isize,
    offset: isize,
}

impl TextIterator {
    pub(crate) fn new(iter: TreeIter<Str, TextMetrics>, offset: usize, from: usize, to: usize) -> Self {
        let before = iter.before().map_or(0, |b| b.length);
        TextIterator {
            pos: offset as isize - before as isize,
            iter,
            from: from as isize,
            to: to as isize,
            offset: offset as isize,
        }
    }

    fn chunk(&self) -> &str {
        self.iter.data().map_or("", |chunk| chunk.as_str())
    }

    /// The current absolute byte offset. `from - 1` when the cursor has
    /// moved out of bounds at the start.
    pub fn offset(&self) -> isize {
        self.offset
    }

    /// The character at the current offset; `None` out of bounds.
    pub fn current(&self) -> Option<char> {
        if self.out_of_bounds() {
            return None;
        }
        self.chunk()[self.pos as usize..].chars().next()
    }

    /// Whether the cursor sits at either bound. It can still be advanced in
    /// the opposite direction.
    pub fn out_of_bounds(&self) -> bool {
        self.offset < self.from || self.offset >= self.to
    }

    /// The length of the iterable range.
    pub fn len(&self) -> usize {
        (self.to - self.from).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.to == self.from
    }

    /// Returns up to `length` bytes starting at the current position,
    /// without moving.
    pub fn substr(&self, length: usize) -> String {
        let length = (length as isize).min(self.to - self.offset);
        if length <= 0 {
            return String::new();
        }
        let mut length = length as usize;
        let mut result = String::with_capacity(length);
        let mut iter = self.iter.clone();
        let mut pos = self.pos.max(0) as usize;
        loop {
            let chunk = iter.data().map_or("", |c| c.as_str());
            let take = (chunk.len() - pos.min(chunk.len())).min(length);
            result.push_str(&chunk[pos..pos + take]);
            length -= take;
            pos = 0;
            if length == 0 || !iter.next() {
                break;
            }
        }
        result
    }

    /// Returns up to `length` bytes ending at the current position, without
    /// moving.
    pub fn rsubstr(&self, length: usize) -> String {
        let length = (length as isize).min(self.offset - self.from);
        if length <= 0 {
            return String::new();
        }
        let mut remaining = length as usize;
        let mut segments: SmallVec<String, 4> = SmallVec::new();
        let mut iter = self.iter.clone();
        let mut upto = Some(self.pos.max(0) as usize);
        loop {
            let chunk = iter.data().map_or("", |c| c.as_str());
            let end = upto.unwrap_or(chunk.len());
            let start = end.saturating_sub(remaining);
            segments.push(chunk[start..end].to_string());
            remaining -= end - start;
            upto = None;
            if remaining == 0 || !iter.prev() {
                break;
            }
        }
        segments.reverse();
        segments.concat()
    }

    /// Reads up to `length` bytes, advancing past them. The read extends to
    /// a `char` boundary when `length` would cut a character.
    pub fn read(&mut self, length: usize) -> String {
        let length = (length as isize).min(self.to - self.offset);
        if length <= 0 {
            return String::new();
        }
        let mut length = length;
        let mut result = String::with_capacity(length as usize);
        while length > 0 {
            let chunk_len = self.chunk().len() as isize;
            if self.pos >= chunk_len {
                if !self.step_chunk_forward() {
                    break;
                }
                continue;
            }
            let start = self.pos as usize;
            let mut end = ((self.pos + length) as usize).min(chunk_len as usize);
            while end < chunk_len as usize && !self.chunk().is_char_boundary(end) {
                end += 1;
            }
            let took = (end - start) as isize;
            result.push_str(&self.chunk()[start..end]);
            self.pos += took;
            self.offset += took;
            length -= took;
        }
        self.settle_forward();
        result
    }

    /// Reads up to `length` bytes ending at the current position, moving
    /// back before them. The read extends to a `char` boundary when
    /// `length` would cut a character.
    pub fn rread(&mut self, length: usize) -> String {
        let length = (length as isize).min(self.offset - self.from);
        if length <= 0 {
            return String::new();
        }
        let mut length = length;
        let mut segments: SmallVec<String, 4> = SmallVec::new();
        while length > 0 {
            if self.pos <= 0 {
                if !self.step_chunk_backward() {
                    break;
                }
                continue;
            }
            let end = self.pos as usize;
            let mut start = (self.pos - length).max(0) as usize;
            while !self.chunk().is_char_boundary(start) {
                start -= 1;
            }
            let took = (end - start) as isize;
            segments.push(self.chunk()[start..end].to_string());
            self.pos -= took;
            self.offset -= took;
            length -= took;
        }
        segments.reverse();
        segments.concat()
    }

    /// Moves by `x` bytes (negative for backward), clamped at the bounds
    /// and snapped to a `char` boundary in the direction of travel. Returns
    /// the actual signed distance moved.
    pub fn advance(&mut self, x: isize) -> isize {
        if x == 0 {
            return 0;
        }
        let start_offset = self.offset;
        let mut x = x;
        if self.offset + x > self.to {
            x = self.to - self.offset;
        } else if self.offset + x < self.from {
            x = self.from - self.offset - 1;
        }
        self.offset += x;
        self.pos += x;
        if x > 0 {
            self.settle_forward();
        } else {
            self.settle_backward();
        }
        self.offset - start_offset
    }

    /// Moves forward one character. Returns the distance moved in bytes.
    pub fn next(&mut self) -> isize {
        self.advance(1)
    }

    /// Moves backward one character. Returns the distance moved in bytes.
    pub fn prev(&mut self) -> isize {
        self.advance(-1)
    }

    /// Moves to `offset`.
    pub fn reset(&mut self, offset: usize) {
        self.advance(offset as isize - self.offset);
    }

    /// The character at `current offset + rel`, without permanently moving.
    pub fn char_at(&mut self, rel: isize) -> Option<char> {
        if rel == 0 {
            return self.current();
        }
        let near = self.chunk().len() as isize * 2;
        if rel >= -near && rel <= near {
            let moved = self.advance(rel);
            let result = self.current();
            self.advance(-moved);
            return result;
        }
        let mut probe = self.clone();
        probe.advance(rel);
        probe.current()
    }

    /// Searches forward for `query`, moving to the start of its first
    /// occurrence. On failure the cursor ends up at the range end and
    /// `false` is returned. Case-insensitive matching folds ASCII only.
    pub fn find(&mut self, query: &str, case_insensitive: bool) -> bool {
        if self.out_of_bounds() {
            return false;
        }
        let needle = fold(query, case_insensitive);

        // Fast path: search the current chunk.
        let pos = self.pos as usize;
        let hay = fold(&self.chunk()[pos..], case_insensitive);
        if let Some(index) = hay.find(needle.as_ref()) {
            return self.advance_to_match(index, needle.len());
        }

        let mut window = hay.into_owned();
        let mut end_iter = self.iter.clone();
        loop {
            let skip = self.chunk().len() - self.pos as usize;

            while (window.len() as isize - skip as isize) < needle.len() as isize - 1 {
                if !end_iter.next() {
                    break;
                }
                let chunk = end_iter.data().map_or("", |c| c.as_str());
                window.push_str(&fold(chunk, case_insensitive));
            }

            if let Some(index) = window.find(needle.as_ref()) {
                return self.advance_to_match(index, needle.len());
            }

            window.drain(..skip.min(window.len()));
            self.offset += skip as isize;
            if self.offset >= self.to || !self.iter.next() {
                self.offset = self.to;
                self.pos = self.to - self.iter.before().map_or(0, |b| b.length as isize);
                return false;
            }
            self.pos = 0;
        }
    }

    fn advance_to_match(&mut self, index: usize, needle_len: usize) -> bool {
        if self.offset + (index + needle_len) as isize > self.to {
            let remaining = self.to - self.offset;
            self.advance(remaining);
        } else {
            self.advance(index as isize);
        }
        !self.out_of_bounds()
    }

    /// Steps onto the next chunk, or stays put at the very end.
    fn step_chunk_forward(&mut self) -> bool {
        let len = self.chunk().len() as isize;
        if self.iter.next() {
            self.pos -= len;
            true
        } else {
            // Keep pointing at the last chunk's end.
            self.iter.prev();
            false
        }
    }

    /// Steps onto the previous chunk, or stays put at the very start.
    fn step_chunk_backward(&mut self) -> bool {
        if self.iter.prev() {
            self.pos += self.chunk().len() as isize;
            true
        } else {
            self.iter.next();
            false
        }
    }

    /// After a forward move: walk into the chunk containing the offset and
    /// snap forward off any mid-character position.
    fn settle_forward(&mut self) {
        loop {
            let chunk_len = self.chunk().len() as isize;
            if self.pos >= chunk_len && chunk_len > 0 {
                if !self.step_chunk_forward() {
                    break;
                }
                continue;
            }
            if self.out_of_bounds() || self.pos < 0 || self.pos >= chunk_len {
                break;
            }
            let on_boundary = self.chunk().is_char_boundary(self.pos as usize);
            if on_boundary {
                break;
            }
            self.pos += 1;
            self.offset += 1;
        }
    }

    /// After a backward move: walk into the chunk containing the offset and
    /// snap backward off any mid-character position.
    fn settle_backward(&mut self) {
        loop {
            if self.pos < 0 {
                if !self.step_chunk_backward() {
                    break;
                }
                continue;
            }
            if self.out_of_bounds() || self.pos >= self.chunk().len() as isize {
                break;
            }
            let on_boundary = self.chunk().is_char_boundary(self.pos as usize);
            if on_boundary {
                break;
            }
            self.pos -= 1;
            self.offset -= 1;
        }
    }
}

fn fold(s: &str, case_insensitive: bool) -> std::borrow::Cow<'_, str> {
    if case_insensitive {
        std::borrow::Cow::Owned(s.to_ascii_lowercase())
    } else {
        std::borrow::Cow::Borrowed(s)
    }
}
