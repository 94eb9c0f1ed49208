use super::sentence_buffer::SentenceBuffer;
use uuid::Uuid;

/// Mutable state of one incremental narration.
///
/// Owned by the orchestrator loop alone. The accumulated text only grows and
/// the message id is fixed at creation.
#[derive(Debug)]
pub struct GenerationSession {
    message_id: Uuid,
    accumulated: String,
    sentences: SentenceBuffer,
    chunks: usize,
}

impl Default for GenerationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationSession {
    pub fn new() -> Self {
        Self {
            message_id: Uuid::new_v4(),
            accumulated: String::new(),
            sentences: SentenceBuffer::new(),
            chunks: 0,
        }
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }

    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Append a token fragment; returns the sentences it completed.
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<String> {
        self.accumulated.push_str(chunk);
        self.chunks += 1;
        self.sentences.push(chunk)
    }

    /// Unflushed tail of the last sentence, if any.
    pub fn take_remainder(&mut self) -> Option<String> {
        self.sentences.take_remainder()
    }

    /// Consume the session, returning the final text.
    pub fn into_text(self) -> String {
        self.accumulated
    }
}
