//! Line-framed wire protocol for the multiplexed narration stream.
//!
//! Every frame is one line:
//!
//! | Marker | Payload |
//! |--------|---------|
//! | `T:`   | narration text, escaped |
//! | `A:`   | audio chunk, standard base64 |
//! | `S:`   | sound-effect URL |
//! | `D:`   | empty, terminal |
//!
//! Text escaping keeps frames single-line: `\` becomes `\\`, newline becomes
//! `\n` and carriage return becomes `\r`.

use crate::error::{PulseError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use std::fmt;

const TEXT_MARKER: &str = "T:";
const AUDIO_MARKER: &str = "A:";
const SOUND_EFFECT_MARKER: &str = "S:";
const DONE_MARKER: &str = "D:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiplexFrame {
    Text(String),
    Audio(Bytes),
    SoundEffect(String),
    Done,
}

/// Frame discriminant, for counting and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Text,
    Audio,
    SoundEffect,
    Done,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::Text => "text",
            FrameKind::Audio => "audio",
            FrameKind::SoundEffect => "sound-effect",
            FrameKind::Done => "done",
        };
        f.write_str(name)
    }
}

impl MultiplexFrame {
    pub fn kind(&self) -> FrameKind {
        match self {
            MultiplexFrame::Text(_) => FrameKind::Text,
            MultiplexFrame::Audio(_) => FrameKind::Audio,
            MultiplexFrame::SoundEffect(_) => FrameKind::SoundEffect,
            MultiplexFrame::Done => FrameKind::Done,
        }
    }

    /// Encode as a complete line, including the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            MultiplexFrame::Text(text) => format!("{TEXT_MARKER}{}\n", escape_text(text)),
            MultiplexFrame::Audio(chunk) => format!("{AUDIO_MARKER}{}\n", STANDARD.encode(chunk)),
            MultiplexFrame::SoundEffect(url) => {
                format!("{SOUND_EFFECT_MARKER}{}\n", single_line(url))
            }
            MultiplexFrame::Done => format!("{DONE_MARKER}\n"),
        }
    }
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

pub fn unescape_text(escaped: &str) -> Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => {
                return Err(PulseError::Transport {
                    message: format!("invalid escape sequence '\\{other}' in text frame"),
                });
            }
            None => {
                return Err(PulseError::Transport {
                    message: "dangling escape at end of text frame".to_string(),
                });
            }
        }
    }
    Ok(out)
}

/// URLs never contain raw line breaks; strip any that sneak in.
fn single_line(value: &str) -> String {
    value.replace(['\n', '\r'], "")
}

/// Parses wire lines back into frames.
///
/// Lines may arrive with or without their trailing newline. Empty lines are
/// skipped. Once `D:` has been decoded, [`is_done`](Self::is_done) reports true.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    done: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Decode one line. `Ok(None)` for a blank line.
    pub fn decode_line(&mut self, line: &str) -> Result<Option<MultiplexFrame>> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Ok(None);
        }

        let frame = if let Some(payload) = line.strip_prefix(TEXT_MARKER) {
            MultiplexFrame::Text(unescape_text(payload)?)
        } else if let Some(payload) = line.strip_prefix(AUDIO_MARKER) {
            let chunk = STANDARD
                .decode(payload)
                .map_err(|e| PulseError::Transport {
                    message: format!("invalid base64 in audio frame: {e}"),
                })?;
            MultiplexFrame::Audio(Bytes::from(chunk))
        } else if let Some(payload) = line.strip_prefix(SOUND_EFFECT_MARKER) {
            MultiplexFrame::SoundEffect(payload.to_string())
        } else if line == DONE_MARKER {
            self.done = true;
            MultiplexFrame::Done
        } else {
            let marker: String = line.chars().take(2).collect();
            return Err(PulseError::Transport {
                message: format!("unknown frame marker {marker:?}"),
            });
        };

        Ok(Some(frame))
    }

    /// Decode a whole buffer of lines.
    pub fn decode_all(&mut self, wire: &str) -> Result<Vec<MultiplexFrame>> {
        let mut frames = Vec::new();
        for line in wire.lines() {
            if let Some(frame) = self.decode_line(line)? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }
}
