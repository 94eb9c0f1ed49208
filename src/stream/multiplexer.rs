//! Single-writer multiplexer for the client stream.
//!
//! Producers (the orchestrator loop, the speech audio callback) push frames
//! into an unbounded channel through cloned [`FrameSender`]s. One writer task
//! owns the `AsyncWrite` and turns each frame into one line, so interleaving
//! across producers is always at whole-frame granularity.

use super::frame::{FrameKind, MultiplexFrame};
use crate::error::{PulseError, Result};
use crate::task::TaskHandle;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Frames written by one multiplexer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounts {
    pub text: usize,
    pub audio: usize,
    pub sound_effects: usize,
    /// True when the terminal `D:` line was written.
    pub done: bool,
}

impl FrameCounts {
    fn record(&mut self, kind: FrameKind) {
        match kind {
            FrameKind::Text => self.text += 1,
            FrameKind::Audio => self.audio += 1,
            FrameKind::SoundEffect => self.sound_effects += 1,
            FrameKind::Done => self.done = true,
        }
    }
}

/// Producer side of the multiplexer. Cheap to clone.
///
/// Once [`finish`](Self::finish) has been called, further frames are silently
/// discarded. A send that fails because the writer is gone reports
/// [`PulseError::Transport`].
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<MultiplexFrame>,
    finished: Arc<AtomicBool>,
}

impl FrameSender {
    pub fn send(&self, frame: MultiplexFrame) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            trace!(kind = %frame.kind(), "discarding frame after done");
            return Ok(());
        }
        let kind = frame.kind();
        self.tx.send(frame).map_err(|_| PulseError::Transport {
            message: format!("client stream closed before {kind} frame"),
        })
    }

    pub fn text(&self, text: impl Into<String>) -> Result<()> {
        self.send(MultiplexFrame::Text(text.into()))
    }

    pub fn audio(&self, chunk: Bytes) -> Result<()> {
        self.send(MultiplexFrame::Audio(chunk))
    }

    pub fn sound_effect(&self, url: impl Into<String>) -> Result<()> {
        self.send(MultiplexFrame::SoundEffect(url.into()))
    }

    /// Queue the terminal frame. Only the first call has any effect.
    pub fn finish(&self) -> Result<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.tx
            .send(MultiplexFrame::Done)
            .map_err(|_| PulseError::Transport {
                message: "client stream closed before done frame".to_string(),
            })
    }

    /// True once the writer has stopped (done, failed or dropped).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct StreamMultiplexer;

impl StreamMultiplexer {
    /// Spawn the writer task for `writer`.
    ///
    /// The task ends after writing `D:`, when every sender is dropped, or on
    /// the first write error. It hands the writer back on success.
    pub fn start<W>(writer: W) -> (FrameSender, TaskHandle<Result<(W, FrameCounts)>>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = FrameSender {
            tx,
            finished: Arc::new(AtomicBool::new(false)),
        };
        let handle = TaskHandle::spawn("multiplexer", pump(writer, rx));
        (sender, handle)
    }
}

async fn pump<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<MultiplexFrame>,
) -> Result<(W, FrameCounts)>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut counts = FrameCounts::default();

    while let Some(frame) = rx.recv().await {
        let kind = frame.kind();
        let line = frame.encode();

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| transport_error(kind, "write", e))?;
        writer
            .flush()
            .await
            .map_err(|e| transport_error(kind, "flush", e))?;

        counts.record(kind);
        if kind == FrameKind::Done {
            debug!(?counts, "multiplexed stream complete");
            return Ok((writer, counts));
        }
    }

    warn!(?counts, "all producers gone before done frame, stream aborted");
    Ok((writer, counts))
}

fn transport_error(kind: FrameKind, op: &str, e: std::io::Error) -> PulseError {
    PulseError::Transport {
        message: format!("failed to {op} {kind} frame: {e}"),
    }
}
