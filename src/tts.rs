use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

use crate::personality::VoiceParams;

#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Playback error: {0}")]
    Playback(String),
}

/// Turns reply text into 16kHz mono 16-bit PCM.
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &VoiceParams)
        -> Result<Vec<u8>, SynthesisError>;
}

#[derive(Debug, Clone)]
pub struct RemoteTtsConfig {
    pub base_url: String,
    pub model: String,
}

impl Default for RemoteTtsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            model: "eleven_multilingual_v2".to_string(),
        }
    }
}

/// HTTP speech synthesis. Requests raw PCM at the pipeline rate so the
/// bytes can be fed straight into the playback sink.
pub struct RemoteTts {
    client: Client,
    api_key: String,
    config: RemoteTtsConfig,
}

impl RemoteTts {
    pub fn new(api_key: String, config: RemoteTtsConfig) -> Result<Self, SynthesisError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for RemoteTts {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceParams,
    ) -> Result<Vec<u8>, SynthesisError> {
        let url = format!(
            "{}/text-to-speech/{}?output_format=pcm_16000",
            self.config.base_url, voice.voice_id
        );

        let payload = json!({
            "text": text,
            "model_id": self.config.model,
            "voice_settings": {
                "stability": voice.stability,
                "similarity_boost": voice.similarity_boost,
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let pcm = response.bytes().await?.to_vec();
        log::debug!("Synthesized {} PCM bytes for {} chars", pcm.len(), text.len());
        Ok(pcm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = RemoteTtsConfig::default();
        assert!(config.base_url.starts_with("https://"));
        assert_eq!(config.model, "eleven_multilingual_v2");
    }

    #[test]
    fn client_construction() {
        assert!(RemoteTts::new("test_key".to_string(), RemoteTtsConfig::default()).is_ok());
    }
}
