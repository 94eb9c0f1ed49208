//! Collect-then-emit generation with validation and retry.

use super::generator::TextGenerator;
use crate::error::{PulseError, Result};
use crate::request::NarrationRequest;
use crate::validator::{OutputValidator, StoryContext, Verdict};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a retry run.
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    /// Accepted text (or the final rejected text when `degraded`).
    pub text: String,
    /// Model calls made.
    pub attempts: u32,
    /// Verdict on `text`.
    pub verdict: Verdict,
    /// Diagnostic for every rejected or failed attempt, in order.
    pub rejections: Vec<String>,
    /// True when every attempt was garbage and the last one was returned anyway.
    pub degraded: bool,
}

/// Runs the generator to completion, classifies, and retries garbage.
pub struct RetryOrchestrator {
    generator: Arc<dyn TextGenerator>,
    validator: OutputValidator,
    context: Option<StoryContext>,
}

impl RetryOrchestrator {
    pub fn new(generator: Arc<dyn TextGenerator>, validator: OutputValidator) -> Self {
        Self {
            generator,
            validator,
            context: None,
        }
    }

    /// Also require story content (dialogue, player names, narrative vocabulary).
    pub fn with_context(mut self, context: StoryContext) -> Self {
        self.context = Some(context);
        self
    }

    fn classify(&self, text: &str) -> Verdict {
        match &self.context {
            Some(context) => self.validator.classify_with_context(text, context),
            None => self.validator.classify(text),
        }
    }

    /// Generate one narration beat, making at most `max_attempts` model calls.
    ///
    /// Returns [`PulseError::GenerationExhausted`] only when no attempt
    /// produced any text.
    pub async fn generate(
        &self,
        request: &NarrationRequest,
        max_attempts: u32,
    ) -> Result<RetryOutcome> {
        let max_attempts = max_attempts.max(1);
        let prompt = request.prompt();
        let mut rejections = Vec::new();
        let mut last_text: Option<(String, Verdict)> = None;
        let mut last_error: Option<PulseError> = None;

        for attempt in 1..=max_attempts {
            debug!(
                attempt,
                max_attempts,
                model = self.generator.model_name(),
                "requesting narration"
            );

            match self.generator.complete(&prompt).await {
                Ok(text) => {
                    let verdict = self.classify(&text);
                    if !verdict.is_garbage {
                        info!(attempt, chars = text.len(), "narration accepted");
                        return Ok(RetryOutcome {
                            text,
                            attempts: attempt,
                            verdict,
                            rejections,
                            degraded: false,
                        });
                    }
                    let reason = verdict.describe();
                    warn!(attempt, max_attempts, reason = %reason, "rejected garbage narration");
                    rejections.push(reason);
                    last_text = Some((text, verdict));
                }
                Err(e) => {
                    warn!(attempt, max_attempts, error = %e, "model call failed");
                    rejections.push(e.to_string());
                    last_error = Some(e);
                }
            }
        }

        match last_text {
            Some((text, verdict)) => {
                warn!(
                    attempts = max_attempts,
                    reason = %verdict.describe(),
                    "retries exhausted, returning last output"
                );
                Ok(RetryOutcome {
                    text,
                    attempts: max_attempts,
                    verdict,
                    rejections,
                    degraded: true,
                })
            }
            None => Err(PulseError::GenerationExhausted {
                attempts: max_attempts,
                message: last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no output".to_string()),
            }),
        }
    }
}
