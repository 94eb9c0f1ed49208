//! Default configuration constants for pulsecast.
//!
//! Shared by the configuration sections and the components that fall back to
//! them when constructed without a config file.

/// Maximum model calls per narration beat on the collect-then-emit path.
///
/// Also bounds how often opening the token stream is attempted on the
/// incremental path before any byte reaches the client.
pub const MAX_ATTEMPTS: u32 = 3;

/// Minimum trimmed length (in characters) of an acceptable narration beat.
pub const MIN_NARRATION_CHARS: usize = 50;

/// Number of identical lines that marks a hallucination loop.
pub const REPEAT_THRESHOLD: usize = 4;

/// Lines at or below this length (in characters) are ignored by repeat detection.
///
/// Short lines ("...", "Silence.") legitimately repeat in prose.
pub const MIN_REPEATED_LINE_CHARS: usize = 20;

/// Accumulated characters that trigger the speculative image-prompt job.
pub const IMAGE_PROMPT_WATERMARK_CHARS: usize = 150;

/// Accumulated characters that trigger the speculative scene-ambience job.
///
/// Tuned separately from the image watermark: ambience needs a little more
/// scene context before it is worth generating.
pub const AMBIENCE_WATERMARK_CHARS: usize = 200;

/// Default narrator voice passed to the speech provider.
pub const DEFAULT_VOICE: &str = "narrator";

/// Upper bound on waiting for trailing audio after the last sentence is flushed.
pub const SPEECH_GRACE_PERIOD_MS: u64 = 2500;

/// Upper bound on the speech connect; sentences queue until it resolves.
pub const SPEECH_CONNECT_TIMEOUT_MS: u64 = 3000;

/// Upper bound on waiting for the ambience job before the terminal frame.
pub const AMBIENCE_WAIT_MS: u64 = 1500;

/// Recently heard sound-effect URLs remembered by the playback coordinator.
pub const SOUND_EFFECT_CACHE_ENTRIES: usize = 32;

/// Characters per token when replaying a script as a token stream.
pub const SCRIPT_TOKEN_CHARS: usize = 4;
