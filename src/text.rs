//! Forward text source for the new document
//!
//! The reconciler consumes new-document content through this restartable,
//! skippable stream: preserved stretches are skipped, rebuilt stretches are
//! read in bounded chunks that stop at line breaks.

use memchr::memchr;

/// Upper bound on a single text run handed to the builder. Keeps host text
/// nodes at a size hosts handle well and bounds rescan cost on later edits.
pub const MAX_TEXT_CHUNK: usize = 512;

/// One step of the text stream.
#[derive(Debug, PartialEq, Eq)]
pub enum TextToken<'a> {
    /// A run of break-free text, at most the requested length.
    Chunk(&'a str),
    /// One line break unit.
    Break,
    /// The document is exhausted.
    End,
}

/// Skippable forward stream over the new document's content.
pub trait TextSource {
    /// Skip `len` units without producing them. Returns the number of line
    /// breaks inside the skipped range (the restricted-layer check needs it).
    fn skip(&mut self, len: usize) -> usize;

    /// Produce the next run, at most `max_len` units. Never returns an empty
    /// chunk; breaks are always reported as their own token.
    fn next(&mut self, max_len: usize) -> TextToken<'_>;
}

/// Text source over a complete in-memory document.
pub struct DocText<'a> {
    doc: &'a str,
    pos: usize,
}

impl<'a> DocText<'a> {
    pub fn new(doc: &'a str) -> Self {
        Self { doc, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }
}

impl TextSource for DocText<'_> {
    fn skip(&mut self, len: usize) -> usize {
        let end = (self.pos + len).min(self.doc.len());
        let breaks = bytecount::count(&self.doc.as_bytes()[self.pos..end], b'\n');
        self.pos = end;
        breaks
    }

    fn next(&mut self, max_len: usize) -> TextToken<'_> {
        let rest = &self.doc.as_bytes()[self.pos..];
        if rest.is_empty() || max_len == 0 {
            return TextToken::End;
        }
        if rest[0] == b'\n' {
            self.pos += 1;
            return TextToken::Break;
        }
        let mut end = match memchr(b'\n', rest) {
            Some(i) => i.min(max_len),
            None => rest.len().min(max_len),
        };
        // Stay on a char boundary when the cap splits a multi-byte sequence.
        while end > 0 && !self.doc.is_char_boundary(self.pos + end) {
            end -= 1;
        }
        if end == 0 {
            return TextToken::End;
        }
        let chunk = &self.doc[self.pos..self.pos + end];
        self.pos += end;
        TextToken::Chunk(chunk)
    }
}
