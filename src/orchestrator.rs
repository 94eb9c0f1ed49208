//! Top-level narration flow.
//!
//! Two entry points share the same collaborators:
//! - [`NarrationOrchestrator::stream_narration`] streams tokens to the client
//!   as they arrive, multiplexed with speech audio and ambience.
//! - [`NarrationOrchestrator::narrate`] collects, validates and retries, then
//!   returns the accepted text.
//!
//! Only [`PulseError::GenerationExhausted`] and [`PulseError::Transport`]
//! escape; speech, media and persistence failures degrade the turn.

use crate::config::Config;
use crate::error::{PulseError, Result};
use crate::generation::{RetryOrchestrator, TextGenerator, TokenStream};
use crate::media::{FinishedMessage, MediaSuite, NarrationStore, spawn_image_finalizer};
use crate::request::{GenerationPrompt, NarrationRequest};
use crate::stream::watermark::spawn_job;
use crate::stream::{
    FrameCounts, FrameSender, GenerationSession, SpeechChannel, SpeechProvider,
    StreamMultiplexer, WatermarkScheduler,
};
use crate::task::{TaskHandle, best_effort};
use crate::validator::{OutputValidator, StoryContext, Verdict};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of a streamed narration.
#[derive(Debug)]
pub struct StreamReport<W> {
    /// The client writer, handed back after `D:`.
    pub writer: W,
    pub message_id: Uuid,
    pub text: String,
    /// Post-hoc verdict. Logged only; the text was already delivered.
    pub verdict: Verdict,
    pub ambience_url: Option<String>,
    pub counts: FrameCounts,
    /// True when the model stream failed part way and the turn was cut short.
    pub truncated: bool,
    pub persisted: bool,
    /// Detached image finalizer, if one was started.
    pub finalizer: Option<TaskHandle<Option<String>>>,
}

/// Result of a collect-then-emit narration.
#[derive(Debug)]
pub struct NarrationReply {
    pub message_id: Uuid,
    pub text: String,
    pub attempts: u32,
    pub degraded: bool,
    pub verdict: Verdict,
    pub persisted: bool,
    pub finalizer: Option<TaskHandle<Option<String>>>,
}

/// Speculative jobs in flight for one streamed narration.
#[derive(Default)]
struct SpeculativeJobs {
    image_prompt: Option<TaskHandle<Option<String>>>,
    ambience: Option<TaskHandle<Option<String>>>,
    /// Set once the ambience job has resolved, with its URL if it produced one.
    ambience_resolved: Option<Option<String>>,
}

impl SpeculativeJobs {
    fn abort_all(&mut self) {
        for job in [self.image_prompt.take(), self.ambience.take()]
            .into_iter()
            .flatten()
        {
            debug!(task = job.label(), "aborting speculative job");
            job.abort();
        }
    }
}

/// Waits on the ambience job; never resolves when there is none.
async fn next_ambience(job: &mut Option<TaskHandle<Option<String>>>) -> Result<Option<String>> {
    match job.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Coordinates generation, validation, speech, media and persistence.
pub struct NarrationOrchestrator {
    config: Config,
    generator: Arc<dyn TextGenerator>,
    speech: Option<Arc<dyn SpeechProvider>>,
    media: MediaSuite,
    store: Arc<dyn NarrationStore>,
    validator: OutputValidator,
}

impl NarrationOrchestrator {
    pub fn new(
        config: Config,
        generator: Arc<dyn TextGenerator>,
        media: MediaSuite,
        store: Arc<dyn NarrationStore>,
    ) -> Self {
        let validator = OutputValidator::new(&config.validator);
        Self {
            config,
            generator,
            speech: None,
            media,
            store,
            validator,
        }
    }

    pub fn with_speech(mut self, provider: Arc<dyn SpeechProvider>) -> Self {
        self.speech = Some(provider);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn story_context(&self) -> Option<StoryContext> {
        let names = &self.config.validator.player_names;
        (!names.is_empty()).then(|| StoryContext::with_players(names.iter().cloned()))
    }

    fn classify(&self, text: &str) -> Verdict {
        match self.story_context() {
            Some(context) => self.validator.classify_with_context(text, &context),
            None => self.validator.classify(text),
        }
    }

    fn open_speech(&self, request: &NarrationRequest, frames: &FrameSender) -> SpeechChannel {
        match &self.speech {
            Some(provider) if request.audio_enabled && self.config.speech.enabled => {
                SpeechChannel::open(
                    provider.clone(),
                    &self.config.speech.voice,
                    self.config.speech.connect_timeout(),
                    frames.clone(),
                )
            }
            _ => {
                debug!(
                    audio_enabled = request.audio_enabled,
                    "speech disabled for this narration"
                );
                SpeechChannel::disabled()
            }
        }
    }

    /// Open the model stream, retrying open failures.
    async fn open_stream(&self, prompt: &GenerationPrompt) -> Result<TokenStream> {
        let max_attempts = self.config.generation.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            match self.generator.stream(prompt).await {
                Ok(tokens) => {
                    debug!(attempt, model = self.generator.model_name(), "model stream open");
                    return Ok(tokens);
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "failed to open model stream");
                    last_error = Some(e);
                }
            }
        }
        Err(PulseError::GenerationExhausted {
            attempts: max_attempts,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no stream".to_string()),
        })
    }

    /// Stream one narration beat to `writer`.
    ///
    /// Frames go out as `T:` lines while tokens arrive, `A:` lines as speech
    /// audio arrives, an optional `S:` line for ambience, and exactly one
    /// `D:` line at the end. Persistence and the image finalizer run after
    /// `D:` has been written.
    pub async fn stream_narration<W>(
        &self,
        request: &NarrationRequest,
        writer: W,
    ) -> Result<StreamReport<W>>
    where
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (frames, writer_task) = StreamMultiplexer::start(writer);
        let mut speech = self.open_speech(request, &frames);

        let mut tokens = match self.open_stream(&request.prompt()).await {
            Ok(tokens) => tokens,
            Err(e) => {
                speech.close().await;
                writer_task.abort();
                return Err(e);
            }
        };

        let mut session = GenerationSession::new();
        let message_id = session.message_id();
        info!(
            %message_id,
            conversation_id = %request.conversation_id,
            model = self.generator.model_name(),
            "narration stream started"
        );

        let mut scheduler = WatermarkScheduler::new(
            &self.config.watermarks,
            self.media.image_prompt.clone(),
            self.media.ambience.clone(),
        );
        let mut jobs = SpeculativeJobs::default();
        let mut truncated = false;

        loop {
            tokio::select! {
                next = tokens.next() => match next {
                    Some(Ok(chunk)) => {
                        if chunk.is_empty() {
                            continue;
                        }
                        let sentences = session.push_chunk(&chunk);
                        if let Err(e) = frames.text(chunk) {
                            return Err(abort_turn(e, &mut speech, &mut jobs, writer_task).await);
                        }
                        for sentence in sentences {
                            speech.send_text(&sentence).await;
                        }
                        let fired = scheduler.on_text_growth(session.text());
                        if let Some(job) = fired.image_prompt {
                            jobs.image_prompt = Some(job);
                        }
                        if let Some(job) = fired.ambience {
                            jobs.ambience = Some(job);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(%message_id, error = %e, chars = session.text().len(), "model stream failed mid-turn, finishing with partial text");
                        truncated = true;
                        break;
                    }
                    None => break,
                },
                resolved = next_ambience(&mut jobs.ambience), if jobs.ambience.is_some() => {
                    jobs.ambience = None;
                    let url = resolved.unwrap_or_else(|e| {
                        warn!(error = %e, "ambience job did not complete");
                        None
                    });
                    if let Some(url) = &url {
                        debug!(%message_id, url = %url, "ambience ready mid-stream");
                        if let Err(e) = frames.sound_effect(url.clone()) {
                            return Err(abort_turn(e, &mut speech, &mut jobs, writer_task).await);
                        }
                    }
                    jobs.ambience_resolved = Some(url);
                }
                connected = speech.connect_result(), if speech.is_connecting() => {
                    speech.install(connected).await;
                }
            }
        }

        if let Some(rest) = session.take_remainder() {
            speech.send_text(&rest).await;
        }
        speech.finish(self.config.speech.grace_period()).await;

        let ambience_url = match self.finish_ambience(&mut jobs, session.text()).await {
            AmbienceOutcome::AlreadySent(url) => Some(url),
            AmbienceOutcome::Ready(url) => {
                if let Err(e) = frames.sound_effect(url.clone()) {
                    return Err(abort_turn(e, &mut speech, &mut jobs, writer_task).await);
                }
                Some(url)
            }
            AmbienceOutcome::Missing => None,
        };

        if let Err(e) = frames.finish() {
            return Err(abort_turn(e, &mut speech, &mut jobs, writer_task).await);
        }
        drop(frames);

        let (writer, counts) = match writer_task.join().await.and_then(|written| written) {
            Ok(written) => written,
            Err(e) => {
                jobs.abort_all();
                warn!(%message_id, error = %e, "client stream failed, nothing persisted");
                return Err(into_transport(e));
            }
        };

        let text = session.into_text();
        let verdict = self.classify(&text);
        if verdict.is_garbage {
            warn!(%message_id, reason = %verdict.describe(), "streamed narration looks like garbage");
        }

        let persisted = self
            .persist(FinishedMessage {
                message_id,
                conversation_id: request.conversation_id.clone(),
                model: request.model.clone(),
                text: text.clone(),
                ambience_url: ambience_url.clone(),
                degraded: verdict.is_garbage,
            })
            .await;

        let finalizer = persisted.then(|| {
            spawn_image_finalizer(
                self.media.clone(),
                self.store.clone(),
                message_id,
                jobs.image_prompt.take(),
                text.clone(),
            )
        });
        jobs.abort_all();

        info!(
            %message_id,
            chars = text.len(),
            text_frames = counts.text,
            audio_frames = counts.audio,
            truncated,
            "narration stream complete"
        );

        Ok(StreamReport {
            writer,
            message_id,
            text,
            verdict,
            ambience_url,
            counts,
            truncated,
            persisted,
            finalizer,
        })
    }

    /// Resolve the ambience for the end of the turn.
    ///
    /// A pending speculative job gets up to `stream.ambience_wait_ms`. If the
    /// job never fired, failed, or came back empty, one fresh job runs on the
    /// final text under the same bound.
    async fn finish_ambience(&self, jobs: &mut SpeculativeJobs, text: &str) -> AmbienceOutcome {
        let wait = self.config.stream.ambience_wait();

        if let Some(Some(url)) = &jobs.ambience_resolved {
            return AmbienceOutcome::AlreadySent(url.clone());
        }

        if let Some(job) = jobs.ambience.take() {
            match wait_bounded(job, wait).await {
                Bounded::Done(Some(url)) => return AmbienceOutcome::Ready(url),
                Bounded::Done(None) => {}
                Bounded::TimedOut => return AmbienceOutcome::Missing,
            }
        }

        if text.trim().is_empty() {
            return AmbienceOutcome::Missing;
        }
        debug!("running fallback ambience job on final text");
        let job = spawn_job("ambience-fallback", self.media.ambience.clone(), text);
        match wait_bounded(job, wait).await {
            Bounded::Done(Some(url)) => AmbienceOutcome::Ready(url),
            _ => AmbienceOutcome::Missing,
        }
    }

    async fn persist(&self, message: FinishedMessage) -> bool {
        if message.text.trim().is_empty() {
            debug!(message_id = %message.message_id, "empty narration, not persisted");
            return false;
        }
        best_effort("persist", self.store.save_message(&message))
            .await
            .is_some()
    }

    /// Generate, validate and retry, then persist and return the accepted text.
    pub async fn narrate(&self, request: &NarrationRequest) -> Result<NarrationReply> {
        let mut retry = RetryOrchestrator::new(self.generator.clone(), self.validator.clone());
        if let Some(context) = self.story_context() {
            retry = retry.with_context(context);
        }
        let outcome = retry
            .generate(request, self.config.generation.max_attempts)
            .await?;

        let message_id = Uuid::new_v4();
        let persisted = self
            .persist(FinishedMessage {
                message_id,
                conversation_id: request.conversation_id.clone(),
                model: request.model.clone(),
                text: outcome.text.clone(),
                ambience_url: None,
                degraded: outcome.degraded,
            })
            .await;

        let finalizer = persisted.then(|| {
            spawn_image_finalizer(
                self.media.clone(),
                self.store.clone(),
                message_id,
                None,
                outcome.text.clone(),
            )
        });

        info!(
            %message_id,
            attempts = outcome.attempts,
            degraded = outcome.degraded,
            "narration complete"
        );

        Ok(NarrationReply {
            message_id,
            text: outcome.text,
            attempts: outcome.attempts,
            degraded: outcome.degraded,
            verdict: outcome.verdict,
            persisted,
            finalizer,
        })
    }
}

enum AmbienceOutcome {
    /// Emitted mid-stream.
    AlreadySent(String),
    /// Resolved at the end; still needs its `S:` frame.
    Ready(String),
    Missing,
}

enum Bounded {
    Done(Option<String>),
    TimedOut,
}

async fn wait_bounded(mut job: TaskHandle<Option<String>>, wait: Duration) -> Bounded {
    match tokio::time::timeout(wait, &mut job).await {
        Ok(Ok(value)) => Bounded::Done(value),
        Ok(Err(e)) => {
            warn!(task = job.label(), error = %e, "ambience job did not complete");
            Bounded::Done(None)
        }
        Err(_) => {
            warn!(task = job.label(), wait_ms = wait.as_millis() as u64, "ambience wait elapsed");
            job.abort();
            Bounded::TimedOut
        }
    }
}

/// Tear down after a transport failure. Returns the error to surface.
async fn abort_turn(
    error: PulseError,
    speech: &mut SpeechChannel,
    jobs: &mut SpeculativeJobs,
    writer_task: TaskHandle<Result<(impl Sized, FrameCounts)>>,
) -> PulseError {
    warn!(error = %error, "client stream failed, aborting narration");
    jobs.abort_all();
    speech.close().await;
    writer_task.abort();
    into_transport(error)
}

/// Writer-side task failures are transport failures from the caller's view.
fn into_transport(error: PulseError) -> PulseError {
    match error {
        PulseError::Transport { .. } => error,
        other => PulseError::Transport {
            message: other.to_string(),
        },
    }
}
