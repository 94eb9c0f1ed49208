//! Speech side channel: sentence-level synthesis forwarded as audio frames.
//!
//! Speech is strictly best-effort. A failed connect leaves the narration
//! text-only and failed sends are logged and dropped; nothing here ever
//! fails a narration.

use super::multiplexer::FrameSender;
use crate::error::{PulseError, Result};
use crate::task::TaskHandle;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Receives synthesized audio chunks as they arrive.
pub type AudioCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// An open session with a speech synthesizer.
#[async_trait]
pub trait SpeechConnection: Send {
    /// Queue one sentence for synthesis.
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Ask the synthesizer to render anything still buffered.
    async fn flush(&mut self) -> Result<()>;

    /// Resolves once all audio for flushed text has been delivered.
    async fn drained(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

/// Trait for speech synthesizers.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Open a session speaking with `voice`. Audio goes to `on_audio`.
    async fn connect(
        &self,
        voice: &str,
        on_audio: AudioCallback,
    ) -> Result<Box<dyn SpeechConnection>>;
}

enum ChannelState {
    Connecting(TaskHandle<Result<Box<dyn SpeechConnection>>>),
    Open(Box<dyn SpeechConnection>),
    Unavailable,
}

/// Orchestrator-side handle on the speech session for one narration.
///
/// Nothing here waits on the connect except [`finish`](Self::finish), and
/// that wait counts against the grace period. Sentences produced while the
/// connect is pending are queued and sent once it resolves.
pub struct SpeechChannel {
    state: ChannelState,
    pending: Vec<String>,
    sentences: usize,
}

impl SpeechChannel {
    /// Start connecting in the background; audio is forwarded to `frames`.
    ///
    /// Returns immediately so the connect overlaps with opening the model
    /// stream. A connect still pending after `connect_timeout` fails.
    pub fn open(
        provider: Arc<dyn SpeechProvider>,
        voice: &str,
        connect_timeout: Duration,
        frames: FrameSender,
    ) -> Self {
        let on_audio: AudioCallback = Arc::new(move |chunk: Bytes| {
            if let Err(e) = frames.audio(chunk) {
                debug!(error = %e, "dropping audio chunk");
            }
        });
        let voice = voice.to_string();
        let handle = TaskHandle::spawn("speech-connect", async move {
            match tokio::time::timeout(connect_timeout, provider.connect(&voice, on_audio)).await {
                Ok(connected) => connected,
                Err(_) => Err(PulseError::Speech {
                    message: format!(
                        "{} did not connect within {}ms",
                        provider.name(),
                        connect_timeout.as_millis()
                    ),
                }),
            }
        });
        Self {
            state: ChannelState::Connecting(handle),
            pending: Vec::new(),
            sentences: 0,
        }
    }

    /// A channel that never speaks (audio disabled or no provider).
    pub fn disabled() -> Self {
        Self {
            state: ChannelState::Unavailable,
            pending: Vec::new(),
            sentences: 0,
        }
    }

    /// True while the channel may still produce audio.
    pub fn is_open(&self) -> bool {
        match &self.state {
            ChannelState::Connecting(_) => true,
            ChannelState::Open(connection) => connection.is_open(),
            ChannelState::Unavailable => false,
        }
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self.state, ChannelState::Connecting(_))
    }

    /// Sentences handed to the synthesizer so far.
    pub fn sentences_sent(&self) -> usize {
        self.sentences
    }

    /// Sentences waiting for the connect to resolve.
    pub fn queued(&self) -> usize {
        self.pending.len()
    }

    /// Resolves with the connect result; never resolves when no connect is
    /// pending. Cancel-safe, so it can sit in a `tokio::select!` branch.
    /// Hand the result to [`install`](Self::install).
    pub async fn connect_result(&mut self) -> Result<Box<dyn SpeechConnection>> {
        match &mut self.state {
            ChannelState::Connecting(handle) => handle.await.and_then(|connected| connected),
            _ => std::future::pending().await,
        }
    }

    /// Adopt a finished connect and send the sentences queued behind it.
    pub async fn install(&mut self, connected: Result<Box<dyn SpeechConnection>>) {
        if !self.is_connecting() {
            return;
        }
        match connected {
            Ok(connection) => {
                info!(queued = self.pending.len(), "speech connected");
                self.state = ChannelState::Open(connection);
                for sentence in std::mem::take(&mut self.pending) {
                    self.deliver(&sentence).await;
                }
            }
            Err(e) => {
                warn!(error = %e, dropped = self.pending.len(), "speech unavailable, continuing text-only");
                self.state = ChannelState::Unavailable;
                self.pending.clear();
            }
        }
    }

    async fn deliver(&mut self, sentence: &str) {
        let ChannelState::Open(connection) = &mut self.state else {
            return;
        };
        if !connection.is_open() {
            return;
        }
        match connection.send_text(sentence).await {
            Ok(()) => self.sentences += 1,
            Err(e) => warn!(error = %e, "speech send failed, sentence skipped"),
        }
    }

    /// Send one sentence, or queue it while the connect is pending.
    /// Failures are logged and swallowed.
    pub async fn send_text(&mut self, sentence: &str) {
        let connect_done = match &self.state {
            ChannelState::Connecting(handle) => handle.is_finished(),
            ChannelState::Open(_) => return self.deliver(sentence).await,
            ChannelState::Unavailable => return,
        };
        self.pending.push(sentence.to_string());
        if connect_done {
            let connected = self.connect_result().await;
            self.install(connected).await;
        }
    }

    pub async fn flush(&mut self) {
        if let ChannelState::Open(connection) = &mut self.state
            && let Err(e) = connection.flush().await
        {
            warn!(error = %e, "speech flush failed");
        }
    }

    /// Wait for the connect, send what queued behind it, flush and drain.
    async fn drain(&mut self) -> Result<()> {
        if self.is_connecting() {
            let connected = self.connect_result().await;
            self.install(connected).await;
        }
        let ChannelState::Open(connection) = &mut self.state else {
            return Ok(());
        };
        connection.flush().await?;
        connection.drained().await
    }

    /// Flush, wait up to `grace` for trailing audio, then close.
    ///
    /// A connect still pending counts against `grace`.
    pub async fn finish(&mut self, grace: Duration) {
        if matches!(self.state, ChannelState::Unavailable) {
            return;
        }
        match tokio::time::timeout(grace, self.drain()).await {
            Ok(Ok(())) => debug!(sentences = self.sentences, "speech drained"),
            Ok(Err(e)) => warn!(error = %e, "speech drain failed"),
            Err(_) => warn!(grace_ms = grace.as_millis() as u64, "speech grace period elapsed"),
        }
        self.close().await;
    }

    /// Close without waiting for trailing audio.
    ///
    /// A pending connect is cancelled; one that completed anyway is closed.
    pub async fn close(&mut self) {
        self.pending.clear();
        let mut connection = match std::mem::replace(&mut self.state, ChannelState::Unavailable) {
            ChannelState::Connecting(handle) => {
                handle.abort();
                match handle.join().await {
                    Ok(Ok(connection)) => connection,
                    _ => return,
                }
            }
            ChannelState::Open(connection) => connection,
            ChannelState::Unavailable => return,
        };
        if let Err(e) = connection.close().await {
            debug!(error = %e, "speech close failed");
        }
    }
}

/// In-process speech provider that "synthesizes" each sentence into one
/// audio chunk containing the sentence bytes.
#[derive(Debug, Clone, Default)]
pub struct MockSpeechProvider {
    fail_connect: bool,
    fail_sends: bool,
    connect_delay: Duration,
    trailing_audio: Option<Bytes>,
    sent: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
}

impl MockSpeechProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_failure(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    pub fn with_send_failures(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Extra chunk delivered while draining, after the last sentence.
    pub fn with_trailing_audio(mut self, chunk: &'static [u8]) -> Self {
        self.trailing_audio = Some(Bytes::from_static(chunk));
        self
    }

    /// Sentences received across all connections.
    pub fn sent(&self) -> Vec<String> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Connections closed so far.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechProvider for MockSpeechProvider {
    fn name(&self) -> &str {
        "mock-speech"
    }

    async fn connect(
        &self,
        voice: &str,
        on_audio: AudioCallback,
    ) -> Result<Box<dyn SpeechConnection>> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.fail_connect {
            return Err(PulseError::Speech {
                message: format!("mock provider refused voice {voice:?}"),
            });
        }
        Ok(Box::new(MockSpeechConnection {
            provider: self.clone(),
            on_audio,
            open: AtomicBool::new(true),
        }))
    }
}

struct MockSpeechConnection {
    provider: MockSpeechProvider,
    on_audio: AudioCallback,
    open: AtomicBool,
}

#[async_trait]
impl SpeechConnection for MockSpeechConnection {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        if self.provider.fail_sends {
            return Err(PulseError::Speech {
                message: "mock send failure".to_string(),
            });
        }
        if let Ok(mut sent) = self.provider.sent.lock() {
            sent.push(text.to_string());
        }
        (self.on_audio)(Bytes::copy_from_slice(text.as_bytes()));
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn drained(&mut self) -> Result<()> {
        if let Some(chunk) = &self.provider.trailing_audio {
            (self.on_audio)(chunk.clone());
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.open.swap(false, Ordering::SeqCst) {
            self.provider.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}
