//! AI backend boundary: one utterance in, one reply out.

use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

use crate::config::ApiCredential;
use crate::personality::Personality;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Sends recognized utterances to the AI backend. The controller
/// guarantees at most one outstanding call at a time.
#[async_trait::async_trait]
pub trait ResponseDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        utterance_text: &str,
        personality: &Personality,
    ) -> Result<String, DispatchError>;
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// How many past exchanges are replayed as context.
    pub history_limit: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 512,
            temperature: 0.21,
            history_limit: 15,
        }
    }
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    role: &'static str,
    content: String,
}

/// Chat-completions dispatcher with a bounded conversation memory.
/// The credential is optional so the companion can start without a key;
/// every dispatch then fails with `Auth` until one is configured.
pub struct ChatDispatcher {
    client: reqwest::Client,
    credential: Option<ApiCredential>,
    config: ChatConfig,
    history: Mutex<VecDeque<HistoryEntry>>,
}

impl ChatDispatcher {
    pub fn new(
        credential: Option<ApiCredential>,
        config: ChatConfig,
    ) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DispatchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            credential,
            config,
            history: Mutex::new(VecDeque::new()),
        })
    }

    pub fn clear_history(&self) {
        self.history.lock().unwrap().clear();
    }

    fn build_messages(&self, utterance_text: &str, personality: &Personality) -> Vec<Value> {
        let mut messages = vec![json!({
            "role": "system",
            "content": personality.full_prompt(),
        })];

        let history = self.history.lock().unwrap();
        for entry in history.iter() {
            messages.push(json!({"role": entry.role, "content": entry.content}));
        }
        messages.push(json!({"role": "user", "content": utterance_text}));
        messages
    }

    fn remember(&self, role: &'static str, content: &str) {
        let mut history = self.history.lock().unwrap();
        history.push_back(HistoryEntry {
            role,
            content: content.to_string(),
        });
        // Two messages per exchange
        while history.len() > self.config.history_limit * 2 {
            history.pop_front();
        }
    }
}

#[async_trait::async_trait]
impl ResponseDispatcher for ChatDispatcher {
    async fn dispatch(
        &self,
        utterance_text: &str,
        personality: &Personality,
    ) -> Result<String, DispatchError> {
        let credential = self
            .credential
            .as_ref()
            .ok_or_else(|| DispatchError::Auth("no API key configured".to_string()))?;

        let url = format!("{}/chat/completions", self.config.base_url);
        let payload = json!({
            "model": self.config.model,
            "messages": self.build_messages(utterance_text, personality),
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", credential.key()))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Auth(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Backend(format!("{}: {}", status, body)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DispatchError::Backend(format!("invalid JSON: {}", e)))?;
        let reply = parse_reply(&body)?;

        self.remember("user", utterance_text);
        self.remember("assistant", &reply);

        log::info!("Dispatch complete: {} chars", reply.len());
        Ok(reply)
    }
}

fn classify_transport_error(e: reqwest::Error) -> DispatchError {
    if e.is_connect() || e.is_timeout() {
        DispatchError::Network(e.to_string())
    } else {
        DispatchError::Backend(e.to_string())
    }
}

/// Extract the reply text from a chat-completions response body.
fn parse_reply(body: &Value) -> Result<String, DispatchError> {
    let reply = body["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| DispatchError::Backend("missing message content".to_string()))?
        .trim()
        .to_string();

    if reply.is_empty() {
        return Err(DispatchError::Backend("empty reply".to_string()));
    }
    Ok(reply)
}
