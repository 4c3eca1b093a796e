//! Splitter for buffers holding several JSON objects back to back.
//!
//! The backend sometimes answers a buffered request with two objects and no
//! separator between them, e.g. `{"choices":[...]}{"usage":{...}}`. This
//! module cuts such a buffer into candidate object spans by counting brace
//! depth.
//!
//! The scan is structural only: it does not know about JSON strings, so a
//! `{` or `}` inside a string literal shifts the depth and can cut a span in
//! the wrong place. Callers must treat every span as a *candidate* and be
//! ready for it to fail to parse.

/// One piece of a scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// A balanced `{ ... }` span, not yet validated as JSON.
    Object(&'a str),
    /// Text from a `{` to the end of the buffer whose braces never balance.
    Unbalanced(&'a str),
    /// Trailing text containing no `{` at all.
    Trailing(&'a str),
}

/// Iterator over the [`Segment`]s of a buffer.
///
/// Text between two objects that is not a `{` is skipped. `Unbalanced` and
/// `Trailing` are always the last segment produced.
#[derive(Debug, Clone)]
pub struct ConcatenatedJson<'a> {
    rest: &'a str,
}

impl<'a> ConcatenatedJson<'a> {
    pub const fn new(input: &'a str) -> Self {
        Self { rest: input }
    }
}

impl<'a> Iterator for ConcatenatedJson<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.rest.trim();
        if rest.is_empty() {
            self.rest = "";
            return None;
        }

        let Some(start) = rest.find('{') else {
            self.rest = "";
            return Some(Segment::Trailing(rest));
        };

        let candidate = &rest[start..];
        match balanced_end(candidate) {
            Some(end) => {
                self.rest = &candidate[end..];
                Some(Segment::Object(&candidate[..end]))
            }
            None => {
                self.rest = "";
                Some(Segment::Unbalanced(candidate))
            }
        }
    }
}

/// Byte offset just past the brace that closes the one at offset 0.
fn balanced_end(candidate: &str) -> Option<usize> {
    let mut depth: usize = 0;
    for (i, b) in candidate.bytes().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
        if depth == 0 {
            return Some(i + 1);
        }
    }
    None
}
