//! Media side channels and persistence contracts.
//!
//! Image prompts, rendered images and scene ambience all come from
//! [`MediaGenerator`]s; finished narration goes to a [`NarrationStore`].
//! Every call through these traits is best-effort from the orchestrator's
//! point of view.

use crate::error::{PulseError, Result};
use crate::task::{TaskHandle, best_effort, best_effort_text, join_optional};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Trait for anything that turns narration context into a media artifact
/// (an image prompt, an image URL, a sound-effect URL).
#[async_trait]
pub trait MediaGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, context: &str) -> Result<String>;
}

/// The three media generators a narration uses.
#[derive(Clone)]
pub struct MediaSuite {
    pub image_prompt: Arc<dyn MediaGenerator>,
    pub image: Arc<dyn MediaGenerator>,
    pub ambience: Arc<dyn MediaGenerator>,
}

impl MediaSuite {
    /// Deterministic in-process generators.
    pub fn template() -> Self {
        Self {
            image_prompt: Arc::new(TemplateMedia::image_prompt()),
            image: Arc::new(TemplateMedia::image()),
            ambience: Arc::new(TemplateMedia::ambience()),
        }
    }
}

/// A narration beat as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishedMessage {
    pub message_id: Uuid,
    pub conversation_id: String,
    pub model: String,
    pub text: String,
    pub ambience_url: Option<String>,
    /// True when the text was returned after exhausting retries.
    pub degraded: bool,
}

/// Trait for conversation persistence.
#[async_trait]
pub trait NarrationStore: Send + Sync {
    async fn save_message(&self, message: &FinishedMessage) -> Result<()>;

    async fn attach_image(&self, message_id: Uuid, image_url: &str) -> Result<()>;
}

/// In-memory store for tests and the CLI.
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<FinishedMessage>>,
    images: Mutex<HashMap<Uuid, String>>,
    fail: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every write fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<FinishedMessage> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn image_for(&self, message_id: Uuid) -> Option<String> {
        match self.images.lock() {
            Ok(images) => images.get(&message_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&message_id).cloned(),
        }
    }

    fn check(&self, op: &str) -> Result<()> {
        if self.fail {
            return Err(PulseError::Persistence {
                message: format!("memory store refused {op}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NarrationStore for MemoryStore {
    async fn save_message(&self, message: &FinishedMessage) -> Result<()> {
        self.check("save_message")?;
        self.messages
            .lock()
            .map_err(|_| PulseError::Persistence {
                message: "message table poisoned".to_string(),
            })?
            .push(message.clone());
        Ok(())
    }

    async fn attach_image(&self, message_id: Uuid, image_url: &str) -> Result<()> {
        self.check("attach_image")?;
        self.images
            .lock()
            .map_err(|_| PulseError::Persistence {
                message: "image table poisoned".to_string(),
            })?
            .insert(message_id, image_url.to_string());
        Ok(())
    }
}

/// Number of context words kept in a template slug.
const SLUG_WORDS: usize = 6;

/// Generator that fills a template with a slug of its context.
///
/// `{slug}` in the template is replaced by the first few words of the
/// context, lowercased and joined with `-`.
#[derive(Debug, Clone)]
pub struct TemplateMedia {
    name: String,
    template: String,
    fail: bool,
    empty: bool,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl TemplateMedia {
    pub fn new(name: &str, template: &str) -> Self {
        Self {
            name: name.to_string(),
            template: template.to_string(),
            fail: false,
            empty: false,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn image_prompt() -> Self {
        Self::new("image-prompt", "painterly scene: {slug}")
    }

    pub fn image() -> Self {
        Self::new("image", "https://images.pulsecast.invalid/{slug}.png")
    }

    pub fn ambience() -> Self {
        Self::new("ambience", "https://sfx.pulsecast.invalid/{slug}.ogg")
    }

    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Succeed with an empty string.
    pub fn with_empty_output(mut self) -> Self {
        self.empty = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn slug(context: &str) -> String {
    let words: Vec<String> = context
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(SLUG_WORDS)
        .map(str::to_lowercase)
        .collect();
    if words.is_empty() {
        "untitled".to_string()
    } else {
        words.join("-")
    }
}

#[async_trait]
impl MediaGenerator for TemplateMedia {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, context: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(PulseError::Media {
                message: format!("{} generator unavailable", self.name),
            });
        }
        if self.empty {
            return Ok(String::new());
        }
        Ok(self.template.replace("{slug}", &slug(context)))
    }
}

/// Spawn the detached image finalizer for a persisted message.
///
/// Waits for the speculative prompt job if there is one; when it yields
/// nothing, asks for a fresh prompt from `text`. Then renders the image and
/// attaches it. Every failure ends the task quietly. The handle yields the
/// attached URL, if any.
pub fn spawn_image_finalizer(
    media: MediaSuite,
    store: Arc<dyn NarrationStore>,
    message_id: Uuid,
    speculative_prompt: Option<TaskHandle<Option<String>>>,
    text: String,
) -> TaskHandle<Option<String>> {
    TaskHandle::spawn("image-finalizer", async move {
        let prompt = match join_optional(speculative_prompt).await {
            Some(prompt) => prompt,
            None => {
                debug!(%message_id, "no speculative image prompt, generating one");
                best_effort_text("image-prompt", media.image_prompt.generate(&text)).await?
            }
        };
        let url = best_effort_text("image", media.image.generate(&prompt)).await?;
        best_effort("attach-image", store.attach_image(message_id, &url)).await?;
        info!(%message_id, url = %url, "image attached");
        Some(url)
    })
}
