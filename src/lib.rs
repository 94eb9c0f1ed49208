//! pulsecast - narration delivery engine
//!
//! Streams a language model's narration to a client as one multiplexed,
//! line-framed stream of text, speech audio and ambience, with output
//! validation, retry and best-effort media side channels.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod generation;
pub mod media;
pub mod orchestrator;
pub mod playback;
pub mod request;
pub mod stream;
pub mod task;
pub mod validator;

// Collaborator contracts
pub use generation::TextGenerator;
pub use media::{MediaGenerator, NarrationStore};
pub use stream::SpeechProvider;

// Orchestration
pub use orchestrator::{NarrationOrchestrator, NarrationReply, StreamReport};
pub use request::{ChatMessage, NarrationRequest, Role};

// Validation
pub use validator::{GarbageReason, OutputValidator, StoryContext, Verdict};

// Error handling
pub use error::{PulseError, Result};

// Config
pub use config::Config;

// Client side
pub use playback::{AudioPlaybackCoordinator, TurnOutcome, read_turn};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_has_hash_suffix_only_when_known() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(ver.contains('+'), "expected +hash suffix, got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
