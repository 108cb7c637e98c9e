//! The edit entry point. A [`Document`] owns the live [`Text`] plus the
//! selection, groups replacements into named logical operations, and
//! notifies listeners with the ordered replacement list when the outermost
//! operation closes. Downstream consumers (layout, decorations, search)
//! subscribe once and process replacements in order.

use crate::{Offset, Position, Str, Text, TextIterator};

/// One replacement applied to the text. `removed` and `inserted` carry the
/// actual content, `after` the whole text as of this replacement, so a
/// consumer can mirror the edit without re-reading the document.
#[derive(Clone)]
pub struct Replacement {
    pub offset: Offset,
    pub removed: Text,
    pub inserted: Text,
    pub after: Text,
}

/// A selection range: `anchor` is where the selection started, `focus`
/// where the caret is. `anchor > focus` for backwards selections;
/// `anchor == focus` is a plain caret.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SelectionRange {
    pub anchor: Offset,
    pub focus: Offset,
}

impl SelectionRange {
    pub fn caret(offset: Offset) -> Self {
        SelectionRange {
            anchor: offset,
            focus: offset,
        }
    }

    pub fn min(&self) -> Offset {
        self.anchor.min(self.focus)
    }

    pub fn max(&self) -> Offset {
        self.anchor.max(self.focus)
    }
}

/// Delivered to listeners on the close of the outermost operation: the
/// replacements applied, in order, plus whether the selection set changed
/// (and what it was before).
pub struct DocumentChange {
    pub replacements: Vec<Replacement>,
    pub selection_changed: bool,
    pub old_selection: Option<Vec<SelectionRange>>,
}

type Listener = Box<dyn FnMut(&DocumentChange)>;

pub struct Document {
    text: Text,
    selection: Vec<SelectionRange>,
    operations: Vec<Str>,
    pending: Vec<Replacement>,
    old_selection: Option<Vec<SelectionRange>>,
    listeners: Vec<Listener>,
    notifying: bool,
}

impl Document {
    pub fn new() -> Document {
        Document {
            text: Text::new(),
            selection: Vec::new(),
            operations: Vec::new(),
            pending: Vec::new(),
            old_selection: None,
            listeners: Vec::new(),
            notifying: false,
        }
    }

    pub fn text(&self) -> &Text {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn content(&self, from: Offset, to: Offset) -> String {
        self.text.content(from, to)
    }

    pub fn iterator(&self, offset: Offset) -> TextIterator {
        self.text.iterator(offset)
    }

    pub fn line_count(&self) -> usize {
        self.text.line_count()
    }

    pub fn offset_to_position(&self, offset: Offset) -> Position {
        self.text.offset_to_position(offset)
    }

    pub fn position_to_offset(&self, position: Position) -> Offset {
        self.text.position_to_offset(position)
    }

    /// Registers a change listener. Listeners run in subscription order.
    pub fn on_change(&mut self, listener: impl FnMut(&DocumentChange) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    pub fn selection(&self) -> &[SelectionRange] {
        &self.selection
    }

    /// Selection ranges sorted by document position rather than insertion
    /// order.
    pub fn sorted_selection(&self) -> Vec<SelectionRange> {
        let mut sorted = self.selection.clone();
        sorted.sort_by_key(|range| (range.min(), range.max()));
        sorted
    }

    /// Replaces the selection set. Ranges are clamped to the text and
    /// overlapping ones joined. Returns whether anything changed; listeners
    /// are notified (outside an operation, immediately).
    pub fn set_selection(&mut self, ranges: Vec<SelectionRange>) -> bool {
        assert!(!self.notifying, "cannot edit during change notification");
        let ranges = normalize_selection(&self.text, ranges);
        if ranges == self.selection {
            return false;
        }
        self.old_selection = Some(std::mem::replace(&mut self.selection, ranges));
        self.maybe_notify();
        true
    }

    /// Opens a named operation. Operations nest; only the close of the
    /// outermost one notifies listeners.
    pub fn begin(&mut self, name: &str) {
        assert!(!self.notifying, "cannot edit during change notification");
        self.operations.push(Str::from(name));
    }

    /// Closes the named operation. Panics when `name` is not the innermost
    /// open operation.
    pub fn end(&mut self, name: &str) {
        assert_eq!(
            self.operations.last().map(Str::as_str),
            Some(name),
            "ending an operation out of order"
        );
        self.operations.pop();
        self.maybe_notify();
    }

    /// Runs `f` inside an operation named `name`.
    pub fn operation(&mut self, name: &str, f: impl FnOnce(&mut Document)) {
        self.begin(name);
        f(self);
        self.end(name);
    }

    /// Replaces `[from, to)` with `insertion` and returns the removed text.
    /// Must be called inside an operation.
    pub fn replace(&mut self, from: Offset, to: Offset, insertion: &str) -> Text {
        self.replace_text(from, to, Text::from(insertion))
    }

    pub fn replace_text(&mut self, from: Offset, to: Offset, insertion: Text) -> Text {
        assert!(
            !self.operations.is_empty(),
            "edits must happen inside an operation"
        );
        assert!(!self.notifying, "cannot edit during change notification");
        let replaced = self.text.replace(from, to, &insertion);
        self.pending.push(Replacement {
            offset: from,
            removed: replaced.removed.clone(),
            inserted: insertion,
            after: replaced.result.clone(),
        });
        self.text = replaced.result;
        replaced.removed
    }

    /// Replaces the whole content, as one operation.
    pub fn reset(&mut self, content: &str) {
        self.operation("reset", |doc| {
            doc.replace(0, doc.len(), content);
            doc.set_selection(Vec::new());
        });
    }

    fn maybe_notify(&mut self) {
        if !self.operations.is_empty() {
            return;
        }
        if self.pending.is_empty() && self.old_selection.is_none() {
            return;
        }

        // Edits may have left the selection pointing outside the text.
        if !self.pending.is_empty() {
            let normalized = normalize_selection(&self.text, self.selection.clone());
            if normalized != self.selection {
                if self.old_selection.is_none() {
                    self.old_selection = Some(self.selection.clone());
                }
                self.selection = normalized;
            }
        }

        let change = DocumentChange {
            replacements: std::mem::take(&mut self.pending),
            selection_changed: self.old_selection.is_some(),
            old_selection: self.old_selection.take(),
        };

        self.notifying = true;
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in listeners.iter_mut() {
            listener(&change);
        }
        // Listeners may have subscribed more listeners meanwhile.
        let mut added = std::mem::replace(&mut self.listeners, listeners);
        self.listeners.append(&mut added);
        self.notifying = false;
    }
}

impl Default for Document {
    fn default() -> Self {
        Document::new()
    }
}

/// Clamps ranges to the text and joins overlapping ones, keeping the
/// caller's range order and each range's direction.
fn normalize_selection(text: &Text, ranges: Vec<SelectionRange>) -> Vec<SelectionRange> {
    let length = text.len();
    let mut ranges: Vec<SelectionRange> = ranges
        .into_iter()
        .map(|range| SelectionRange {
            anchor: range.anchor.min(length),
            focus: range.focus.min(length),
        })
        .collect();
    if ranges.len() <= 1 {
        return ranges;
    }

    let mut ordered: Vec<(usize, SelectionRange)> = ranges.drain(..).enumerate().collect();
    ordered.sort_by_key(|(_, range)| (range.min(), range.max()));

    let mut joined: Vec<(usize, SelectionRange)> = Vec::with_capacity(ordered.len());
    for (index, next) in ordered {
        match joined.last_mut() {
            Some((_, last)) if next.min() < last.max() || last.max() == next.max() => {
                // Extend the earlier range, keeping its direction.
                if last.anchor > last.focus {
                    last.anchor = next.max();
                } else {
                    last.focus = next.max();
                }
            }
            _ => joined.push((index, next)),
        }
    }

    joined.sort_by_key(|&(index, _)| index);
    joined.into_iter().map(|(_, range)| range).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn edits_group_into_operations() {
        let mut doc = Document::new();
        let log: Rc<RefCell<Vec<(usize, String, String)>>> = Rc::default();
        let sink = log.clone();
        doc.on_change(move |change| {
            for r in &change.replacements {
                sink.borrow_mut().push((
                    r.offset,
                    r.removed.content(0, r.removed.len()),
                    r.inserted.content(0, r.inserted.len()),
                ));
            }
        });

        doc.begin("type");
        doc.replace(0, 0, "hello world");
        doc.replace(5, 6, "-");
        assert!(log.borrow().is_empty());
        doc.end("type");

        assert_eq!(doc.content(0, doc.len()), "hello-world");
        assert_eq!(
            *log.borrow(),
            vec![
                (0, String::new(), "hello world".to_string()),
                (5, " ".to_string(), "-".to_string()),
            ]
        );
    }

    #[test]
    fn replacement_carries_text_snapshots() {
        let mut doc = Document::new();
        let after: Rc<RefCell<Vec<String>>> = Rc::default();
        let sink = after.clone();
        doc.on_change(move |change| {
            for r in &change.replacements {
                sink.borrow_mut().push(r.after.content(0, r.after.len()));
            }
        });
        doc.operation("edit", |doc| {
            doc.replace(0, 0, "ab");
            doc.replace(1, 1, "x");
        });
        assert_eq!(*after.borrow(), vec!["ab".to_string(), "axb".to_string()]);
    }

    #[test]
    fn returns_removed_text() {
        let mut doc = Document::new();
        doc.begin("edit");
        doc.replace(0, 0, "hello");
        let removed = doc.replace(1, 4, "i");
        assert_eq!(removed.content(0, removed.len()), "ell");
        doc.end("edit");
        assert_eq!(doc.content(0, doc.len()), "hio");
    }

    #[test]
    #[should_panic(expected = "inside an operation")]
    fn edit_outside_operation_panics() {
        let mut doc = Document::new();
        doc.replace(0, 0, "x");
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn mismatched_end_panics() {
        let mut doc = Document::new();
        doc.begin("a");
        doc.end("b");
    }

    #[test]
    fn nested_operations_notify_once() {
        let mut doc = Document::new();
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        doc.on_change(move |change| {
            *sink.borrow_mut() += 1;
            assert_eq!(change.replacements.len(), 2);
        });
        doc.begin("outer");
        doc.replace(0, 0, "a");
        doc.begin("inner");
        doc.replace(1, 1, "b");
        doc.end("inner");
        assert_eq!(*count.borrow(), 0);
        doc.end("outer");
        assert_eq!(*count.borrow(), 1);
    }

    #[test]
    fn selection_changes_are_reported() {
        let mut doc = Document::new();
        doc.reset("hello world");
        let flags: Rc<RefCell<Vec<bool>>> = Rc::default();
        let sink = flags.clone();
        doc.on_change(move |change| sink.borrow_mut().push(change.selection_changed));

        assert!(doc.set_selection(vec![SelectionRange::caret(3)]));
        assert!(!doc.set_selection(vec![SelectionRange::caret(3)]));
        doc.operation("edit", |doc| {
            doc.replace(0, 5, "hi");
        });
        assert_eq!(*flags.borrow(), vec![true, false]);
        assert_eq!(doc.selection(), &[SelectionRange::caret(3)]);
    }

    #[test]
    fn selection_clamps_after_shrinking_edit() {
        let mut doc = Document::new();
        doc.reset("hello world");
        doc.set_selection(vec![SelectionRange {
            anchor: 11,
            focus: 11,
        }]);
        let flags: Rc<RefCell<Vec<bool>>> = Rc::default();
        let sink = flags.clone();
        doc.on_change(move |change| sink.borrow_mut().push(change.selection_changed));
        doc.operation("cut", |doc| {
            doc.replace(5, 11, "");
        });
        assert_eq!(doc.selection(), &[SelectionRange::caret(5)]);
        assert_eq!(*flags.borrow(), vec![true]);
    }

    #[test]
    fn selection_normalization_joins_overlaps() {
        let text = Text::from("0123456789");
        let joined = normalize_selection(
            &text,
            vec![
                SelectionRange { anchor: 8, focus: 4 },
                SelectionRange { anchor: 0, focus: 5 },
            ],
        );
        // The overlapping pair joins into one range, keeping the first
        // range's position in the list and the earlier range's direction.
        assert_eq!(joined, vec![SelectionRange { anchor: 0, focus: 8 }]);

        let kept = normalize_selection(
            &text,
            vec![
                SelectionRange { anchor: 2, focus: 0 },
                SelectionRange { anchor: 5, focus: 9 },
            ],
        );
        assert_eq!(kept.len(), 2);

        let clamped = normalize_selection(&text, vec![SelectionRange { anchor: 50, focus: 2 }]);
        assert_eq!(clamped, vec![SelectionRange { anchor: 10, focus: 2 }]);
    }

    #[test]
    fn late_subscribers_survive_notification() {
        let mut doc = Document::new();
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        doc.on_change(move |_| *sink.borrow_mut() += 1);
        doc.reset("abc");
        let sink = count.clone();
        doc.on_change(move |_| *sink.borrow_mut() += 10);
        doc.operation("edit", |doc| {
            doc.replace(0, 1, "x");
        });
        assert_eq!(*count.borrow(), 12);
    }
}
