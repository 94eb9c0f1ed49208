/// Accumulates token fragments and releases complete sentences.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace. A terminator
/// at the very end of the buffer is held until the next fragment shows what
/// follows it ("3." may be "3.14").
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    pending: String,
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `fragment` and return every sentence it completed, trimmed.
    pub fn push(&mut self, fragment: &str) -> Vec<String> {
        self.pending.push_str(fragment);

        let mut sentences = Vec::new();
        while let Some(end) = self.sentence_end() {
            let rest = self.pending.split_off(end);
            let sentence = std::mem::replace(&mut self.pending, rest);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        // Leading whitespace of the next sentence is noise.
        if self.pending.trim().is_empty() {
            self.pending.clear();
        }
        sentences
    }

    /// Take whatever is left, if it holds any non-whitespace text.
    pub fn take_remainder(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.pending);
        let trimmed = remainder.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.pending.trim().is_empty()
    }

    /// Byte offset just past the first terminator that is followed by whitespace.
    fn sentence_end(&self) -> Option<usize> {
        let mut chars = self.pending.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if matches!(c, '.' | '!' | '?')
                && let Some((_, next)) = chars.peek()
                && next.is_whitespace()
            {
                return Some(i + c.len_utf8());
            }
        }
        None
    }
}
