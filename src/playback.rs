//! Client-side consumer of the multiplexed narration stream.
//!
//! [`AudioPlaybackCoordinator`] is constructed explicitly by the client and
//! owns its audio queue and sound-effect cache; there is no shared global
//! player. It is fed one frame at a time, either directly via
//! [`ingest`](AudioPlaybackCoordinator::ingest) or from a reader with
//! [`read_turn`].

use crate::config::PlaybackConfig;
use crate::error::{PulseError, Result};
use crate::stream::frame::{FrameDecoder, MultiplexFrame};
use bytes::Bytes;
use std::collections::VecDeque;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

/// What the coordinator did with one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Text,
    AudioQueued,
    /// A sound effect not heard recently; the client should play it.
    PlaySoundEffect(String),
    /// A sound effect already in the recent cache.
    SoundEffectSkipped(String),
    TurnDone,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// `D:` was received.
    Completed { text: String, audio_chunks: usize },
    /// The stream ended without `D:`.
    Aborted { text: String, audio_chunks: usize },
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        match self {
            TurnOutcome::Completed { text, .. } | TurnOutcome::Aborted { text, .. } => text,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TurnOutcome::Completed { .. })
    }
}

#[derive(Debug, Default)]
struct Turn {
    text: String,
    audio_chunks: usize,
    done: bool,
}

#[derive(Debug)]
pub struct AudioPlaybackCoordinator {
    queue: VecDeque<Bytes>,
    recent_effects: VecDeque<String>,
    cache_size: usize,
    turn: Option<Turn>,
    shut_down: bool,
}

impl AudioPlaybackCoordinator {
    /// `cache_size` bounds how many recent sound-effect URLs are remembered.
    pub fn new(cache_size: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            recent_effects: VecDeque::with_capacity(cache_size),
            cache_size,
            turn: None,
            shut_down: false,
        }
    }

    pub fn from_config(config: &PlaybackConfig) -> Self {
        Self::new(config.sound_effect_cache)
    }

    fn check_live(&self) -> Result<()> {
        if self.shut_down {
            return Err(PulseError::Other(
                "playback coordinator has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// Start collecting a new turn. An unfinished previous turn is discarded.
    pub fn begin_turn(&mut self) -> Result<()> {
        self.check_live()?;
        if let Some(previous) = self.turn.take()
            && !previous.done
        {
            warn!(chars = previous.text.len(), "previous turn never finished, discarding");
        }
        self.turn = Some(Turn::default());
        Ok(())
    }

    pub fn ingest(&mut self, frame: MultiplexFrame) -> Result<PlaybackEvent> {
        self.check_live()?;
        let turn = self.turn.get_or_insert_with(Turn::default);
        if turn.done {
            return Err(PulseError::Transport {
                message: format!("{} frame after done", frame.kind()),
            });
        }

        let event = match frame {
            MultiplexFrame::Text(text) => {
                turn.text.push_str(&text);
                PlaybackEvent::Text
            }
            MultiplexFrame::Audio(chunk) => {
                turn.audio_chunks += 1;
                self.queue.push_back(chunk);
                PlaybackEvent::AudioQueued
            }
            MultiplexFrame::SoundEffect(url) => {
                if self.recent_effects.contains(&url) {
                    debug!(url = %url, "sound effect heard recently, skipping");
                    PlaybackEvent::SoundEffectSkipped(url)
                } else {
                    self.remember_effect(url.clone());
                    PlaybackEvent::PlaySoundEffect(url)
                }
            }
            MultiplexFrame::Done => {
                turn.done = true;
                PlaybackEvent::TurnDone
            }
        };
        Ok(event)
    }

    fn remember_effect(&mut self, url: String) {
        if self.cache_size == 0 {
            return;
        }
        while self.recent_effects.len() >= self.cache_size {
            self.recent_effects.pop_front();
        }
        self.recent_effects.push_back(url);
    }

    /// Next audio chunk to play, in arrival order.
    pub fn next_chunk(&mut self) -> Option<Bytes> {
        self.queue.pop_front()
    }

    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    /// Close the current turn.
    pub fn end_turn(&mut self) -> TurnOutcome {
        let turn = self.turn.take().unwrap_or_default();
        if turn.done {
            TurnOutcome::Completed {
                text: turn.text,
                audio_chunks: turn.audio_chunks,
            }
        } else {
            warn!(chars = turn.text.len(), "turn ended without done frame");
            TurnOutcome::Aborted {
                text: turn.text,
                audio_chunks: turn.audio_chunks,
            }
        }
    }

    /// Drop queued audio and refuse further turns.
    pub fn shutdown(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.recent_effects.clear();
        self.turn = None;
        self.shut_down = true;
        debug!(dropped, "playback coordinator shut down");
    }
}

/// Read one turn from `reader` into `coordinator`.
///
/// Stops after `D:` or at end of input; the outcome says which.
pub async fn read_turn<R>(reader: R, coordinator: &mut AudioPlaybackCoordinator) -> Result<TurnOutcome>
where
    R: AsyncBufRead + Unpin,
{
    coordinator.begin_turn()?;
    let mut decoder = FrameDecoder::new();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await.map_err(|e| PulseError::Transport {
        message: format!("failed to read stream: {e}"),
    })? {
        let Some(frame) = decoder.decode_line(&line)? else {
            continue;
        };
        if coordinator.ingest(frame)? == PlaybackEvent::TurnDone {
            break;
        }
    }

    Ok(coordinator.end_turn())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_completed_turn() {
        let wire: &[u8] = b"T:Hello.\nA:SGVsbG8u\nT: World.\nS:https://sfx/rain\nD:\nT:ignored\n";
        let mut coordinator = AudioPlaybackCoordinator::new(4);

        let outcome = read_turn(BufReader::new(wire), &mut coordinator).await.unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Completed {
                text: "Hello. World.".to_string(),
                audio_chunks: 1
            }
        );
        assert_eq!(coordinator.next_chunk(), Some(Bytes::from_static(b"Hello.")));
        assert_eq!(coordinator.next_chunk(), None);
    }

    #[tokio::test]
    async fn test_missing_done_is_aborted() {
        let wire: &[u8] = b"T:Half a sent";
        let mut coordinator = AudioPlaybackCoordinator::new(4);
        let outcome = read_turn(BufReader::new(wire), &mut coordinator).await.unwrap();
        assert!(!outcome.is_completed());
        assert_eq!(outcome.text(), "Half a sent");
    }

    #[tokio::test]
    async fn test_unknown_marker_fails_the_read() {
        let wire: &[u8] = b"T:ok\nQ:what\nD:\n";
        let mut coordinator = AudioPlaybackCoordinator::new(4);
        assert!(matches!(
            read_turn(BufReader::new(wire), &mut coordinator).await,
            Err(PulseError::Transport { .. })
        ));
    }

    #[test]
    fn test_sound_effects_deduplicated_within_cache() {
        let mut coordinator = AudioPlaybackCoordinator::new(2);
        let sfx = |url: &str| MultiplexFrame::SoundEffect(url.to_string());

        assert_eq!(
            coordinator.ingest(sfx("a")).unwrap(),
            PlaybackEvent::PlaySoundEffect("a".into())
        );
        assert_eq!(
            coordinator.ingest(sfx("a")).unwrap(),
            PlaybackEvent::SoundEffectSkipped("a".into())
        );
        coordinator.ingest(sfx("b")).unwrap();
        coordinator.ingest(sfx("c")).unwrap();
        // "a" was evicted by "b" and "c".
        assert_eq!(
            coordinator.ingest(sfx("a")).unwrap(),
            PlaybackEvent::PlaySoundEffect("a".into())
        );
    }

    #[test]
    fn test_audio_queue_survives_turns_in_order() {
        let mut coordinator = AudioPlaybackCoordinator::new(2);
        coordinator.begin_turn().unwrap();
        coordinator.ingest(MultiplexFrame::Audio(Bytes::from_static(b"1"))).unwrap();
        coordinator.ingest(MultiplexFrame::Done).unwrap();
        assert!(coordinator.end_turn().is_completed());

        coordinator.begin_turn().unwrap();
        coordinator.ingest(MultiplexFrame::Audio(Bytes::from_static(b"2"))).unwrap();
        assert_eq!(coordinator.queued_chunks(), 2);
        assert_eq!(coordinator.next_chunk(), Some(Bytes::from_static(b"1")));
        assert_eq!(coordinator.next_chunk(), Some(Bytes::from_static(b"2")));
    }

    #[test]
    fn test_zero_cache_never_skips() {
        let config = PlaybackConfig {
            sound_effect_cache: 0,
        };
        let mut coordinator = AudioPlaybackCoordinator::from_config(&config);
        let rain = MultiplexFrame::SoundEffect("rain".into());
        for _ in 0..2 {
            assert_eq!(
                coordinator.ingest(rain.clone()).unwrap(),
                PlaybackEvent::PlaySoundEffect("rain".into())
            );
        }
    }

    #[test]
    fn test_frame_after_done_is_rejected() {
        let mut coordinator = AudioPlaybackCoordinator::new(2);
        coordinator.ingest(MultiplexFrame::Done).unwrap();
        assert!(coordinator.ingest(MultiplexFrame::Text("late".into())).is_err());
    }

    #[test]
    fn test_shutdown_clears_and_refuses() {
        let mut coordinator = AudioPlaybackCoordinator::new(2);
        coordinator.ingest(MultiplexFrame::Audio(Bytes::from_static(b"x"))).unwrap();
        coordinator.shutdown();
        assert_eq!(coordinator.queued_chunks(), 0);
        assert!(coordinator.begin_turn().is_err());
        assert!(coordinator.ingest(MultiplexFrame::Done).is_err());
    }
}
