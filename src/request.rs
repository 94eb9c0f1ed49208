//! Inputs to a narration call.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// One narration call. Built once and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationRequest {
    pub conversation_id: String,
    pub prior_messages: Vec<ChatMessage>,
    pub system_prompt: String,
    pub model: String,
    pub audio_enabled: bool,
}

impl NarrationRequest {
    pub fn new(conversation_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            prior_messages: Vec::new(),
            system_prompt: String::new(),
            model: model.into(),
            audio_enabled: true,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.prior_messages.push(message);
        self
    }

    pub fn with_audio(mut self, enabled: bool) -> Self {
        self.audio_enabled = enabled;
        self
    }

    /// Prompt handed to the text generator.
    ///
    /// The system prompt (if any) leads, followed by the conversation in order.
    pub fn prompt(&self) -> GenerationPrompt {
        let mut messages = Vec::with_capacity(self.prior_messages.len() + 1);
        if !self.system_prompt.trim().is_empty() {
            messages.push(ChatMessage {
                role: Role::System,
                text: self.system_prompt.clone(),
            });
        }
        messages.extend(self.prior_messages.iter().cloned());
        GenerationPrompt {
            model: self.model.clone(),
            messages,
        }
    }
}

/// What a [`TextGenerator`](crate::generation::TextGenerator) is asked to continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationPrompt {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}
