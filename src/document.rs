//! In-memory mirror of the currently edited document.
//!
//! The browser applies splice edits to its buffer and sends the same
//! splices here; the mirror stays in lock-step so whole-document
//! `textDocument/didChange` payloads can be regenerated server-side.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeltaError {
    #[error("invalid edit range {from}..{to} for document of length {len}")]
    InvalidRange { from: usize, to: usize, len: usize },
}

/// A mirrored document with a monotonic version counter.
///
/// Positions are byte offsets into the UTF-8 encoding; the editor front end
/// is responsible for sending byte-aligned offsets.
#[derive(Debug, Clone, Default)]
pub struct DocumentMirror {
    text: String,
    version: i64,
}

impl DocumentMirror {
    /// A freshly opened document starts at version 1.
    pub fn open(text: String) -> Self {
        Self { text, version: 1 }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Applies `text[..from] + insert + text[to..]` and bumps the version.
    ///
    /// Requires `0 <= from <= to <= len` with both offsets on UTF-8
    /// character boundaries; otherwise the mirror is left untouched.
    pub fn apply(&mut self, from: usize, to: usize, insert: &str) -> Result<(), DeltaError> {
        let len = self.text.len();
        if from > to
            || to > len
            || !self.text.is_char_boundary(from)
            || !self.text.is_char_boundary(to)
        {
            return Err(DeltaError::InvalidRange { from, to, len });
        }
        self.text.replace_range(from..to, insert);
        self.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_replaces_the_addressed_range() {
        let mut doc = DocumentMirror::open("abcdef".into());
        doc.apply(2, 4, "XY").unwrap();
        assert_eq!(doc.text(), "abXYef");
    }

    #[test]
    fn splices_compose_left_to_right() {
        let mut doc = DocumentMirror::open("hello".into());
        doc.apply(0, 0, ">> ").unwrap(); // ">> hello"
        doc.apply(3, 8, "world").unwrap(); // ">> world"
        doc.apply(8, 8, "!").unwrap(); // ">> world!"
        assert_eq!(doc.text(), ">> world!");
        assert_eq!(doc.version(), 4);
    }

    #[test]
    fn pure_insert_and_pure_delete() {
        let mut doc = DocumentMirror::open("abc".into());
        doc.apply(1, 1, "Z").unwrap();
        assert_eq!(doc.text(), "aZbc");
        doc.apply(0, 2, "").unwrap();
        assert_eq!(doc.text(), "bc");
    }

    #[test]
    fn length_tracks_insertions_minus_deletions() {
        let mut doc = DocumentMirror::open("0123456789".into());
        doc.apply(2, 5, "ab").unwrap(); // -3 +2
        doc.apply(0, 0, "xyz").unwrap(); // +3
        assert_eq!(doc.text().len(), 10 - 3 + 2 + 3);
    }

    #[test]
    fn inverted_range_is_rejected_and_mirror_unchanged() {
        let mut doc = DocumentMirror::open("abcdef".into());
        let err = doc.apply(5, 3, "").unwrap_err();
        assert_eq!(
            err,
            DeltaError::InvalidRange {
                from: 5,
                to: 3,
                len: 6
            }
        );
        assert_eq!(doc.text(), "abcdef");
        assert_eq!(doc.version(), 1);
    }

    #[test]
    fn out_of_bounds_range_is_rejected() {
        let mut doc = DocumentMirror::open("abc".into());
        assert!(doc.apply(0, 4, "x").is_err());
        assert_eq!(doc.text(), "abc");
    }

    #[test]
    fn offsets_inside_a_multibyte_char_are_rejected() {
        let mut doc = DocumentMirror::open("héllo".into()); // 'é' spans bytes 1..3
        assert!(doc.apply(2, 3, "x").is_err());
        assert_eq!(doc.text(), "héllo");
        // Boundary-aligned edits on the same content work.
        doc.apply(1, 3, "e").unwrap();
        assert_eq!(doc.text(), "hello");
    }

    #[test]
    fn version_increments_per_applied_delta_only() {
        let mut doc = DocumentMirror::open("abc".into());
        assert_eq!(doc.version(), 1);
        doc.apply(0, 0, "x").unwrap();
        assert_eq!(doc.version(), 2);
        let _ = doc.apply(9, 9, "x");
        assert_eq!(doc.version(), 2);
    }
}
