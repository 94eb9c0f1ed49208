use crate::defaults;
use crate::error::{PulseError, Result};
use crate::request::GenerationPrompt;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Incremental model output. Each item is one token fragment.
pub type TokenStream = BoxStream<'static, Result<String>>;

/// Trait for the language model behind narration.
///
/// Opening the stream may fail (`Err` from [`stream`](TextGenerator::stream));
/// an already open stream may also yield an `Err` item mid-way.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Name of the model, for logs.
    fn model_name(&self) -> &str;

    /// Open a token stream for `prompt`.
    async fn stream(&self, prompt: &GenerationPrompt) -> Result<TokenStream>;

    /// Run the model to completion and return the full text.
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String> {
        let mut tokens = self.stream(prompt).await?;
        let mut text = String::new();
        while let Some(token) = tokens.next().await {
            text.push_str(&token?);
        }
        Ok(text)
    }
}

#[async_trait]
impl<T: TextGenerator + ?Sized> TextGenerator for Arc<T> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn stream(&self, prompt: &GenerationPrompt) -> Result<TokenStream> {
        (**self).stream(prompt).await
    }

    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String> {
        (**self).complete(prompt).await
    }
}

/// Generator that replays scripted responses as token streams.
///
/// Call `n` (0-based) fails to open while `n < failures`; after that, the
/// responses are served in order and the last one repeats.
#[derive(Debug, Clone)]
pub struct ScriptedGenerator {
    model_name: String,
    responses: Vec<String>,
    failures: usize,
    stream_error_after: Option<usize>,
    token_chars: usize,
    token_delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            responses: vec!["The scripted narrator clears their throat and begins.".to_string()],
            failures: 0,
            stream_error_after: None,
            token_chars: defaults::SCRIPT_TOKEN_CHARS,
            token_delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Serve `response` on every call.
    pub fn with_response(self, response: &str) -> Self {
        self.with_responses([response])
    }

    /// Serve `responses` in order, repeating the last one.
    pub fn with_responses<I, S>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let responses: Vec<String> = responses.into_iter().map(Into::into).collect();
        if !responses.is_empty() {
            self.responses = responses;
        }
        self
    }

    /// Fail to open the stream on the first `count` calls.
    pub fn with_failures(mut self, count: usize) -> Self {
        self.failures = count;
        self
    }

    /// Yield a model error after `tokens` tokens instead of finishing.
    pub fn with_stream_error_after(mut self, tokens: usize) -> Self {
        self.stream_error_after = Some(tokens);
        self
    }

    /// Characters per token (minimum 1).
    pub fn with_token_chars(mut self, chars: usize) -> Self {
        self.token_chars = chars.max(1);
        self
    }

    /// Pause before each token.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Number of times the model has been called (stream opens, including failures).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn response_for(&self, call: usize) -> &str {
        let index = call.saturating_sub(self.failures);
        let last = self.responses.len().saturating_sub(1);
        self.responses
            .get(index.min(last))
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Split `text` into tokens of `chars` characters, respecting char boundaries.
pub fn tokenize(text: &str, chars: usize) -> Vec<String> {
    let chars = chars.max(1);
    let mut tokens = Vec::new();
    let mut current = String::new();
    for (i, c) in text.chars().enumerate() {
        current.push(c);
        if (i + 1) % chars == 0 {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    async fn stream(&self, _prompt: &GenerationPrompt) -> Result<TokenStream> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(PulseError::Model {
                message: format!("scripted failure on call {}", call + 1),
            });
        }

        let mut items: Vec<Result<String>> = tokenize(self.response_for(call), self.token_chars)
            .into_iter()
            .map(Ok)
            .collect();
        if let Some(after) = self.stream_error_after {
            items.truncate(after);
            items.push(Err(PulseError::Model {
                message: format!("scripted stream error after {after} token(s)"),
            }));
        }

        let delay = self.token_delay;
        if delay.is_zero() {
            Ok(stream::iter(items).boxed())
        } else {
            Ok(stream::iter(items)
                .then(move |item| async move {
                    tokio::time::sleep(delay).await;
                    item
                })
                .boxed())
        }
    }
}
