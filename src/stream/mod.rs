//! Incremental narration plumbing: wire frames, the single-writer
//! multiplexer, sentence splitting, speech, and speculative media jobs.

pub mod frame;
pub mod multiplexer;
pub mod sentence_buffer;
pub mod session;
pub mod speech;
pub mod watermark;

pub use frame::{FrameDecoder, FrameKind, MultiplexFrame};
pub use multiplexer::{FrameCounts, FrameSender, StreamMultiplexer};
pub use sentence_buffer::SentenceBuffer;
pub use session::GenerationSession;
pub use speech::{AudioCallback, MockSpeechProvider, SpeechChannel, SpeechConnection, SpeechProvider};
pub use watermark::{FiredJobs, WatermarkScheduler};
