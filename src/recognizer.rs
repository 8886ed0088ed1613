//! Speech recognition boundary: audio frames in, utterances out.
//!
//! The production implementation streams PCM over a websocket to a
//! transcription server and forwards its partial/final results into the
//! bounded utterance queue the controller drains.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::audio::AudioFrame;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("WebSocket connection failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Response parsing error: {0}")]
    Parse(String),
    #[error("Streaming error: {0}")]
    Streaming(String),
}

/// One recognized span of speech. Created per recognition cycle and
/// consumed exactly once by the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub is_final: bool,
    pub confidence: f32,
    pub timestamp: Instant,
}

impl Utterance {
    pub fn new(text: impl Into<String>, is_final: bool, confidence: f32) -> Self {
        Self {
            text: text.into(),
            is_final,
            confidence,
            timestamp: Instant::now(),
        }
    }

    /// A finalized utterance with full confidence, mostly for tests.
    pub fn final_text(text: impl Into<String>) -> Self {
        Self::new(text, true, 1.0)
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Produces utterances from a stream of captured audio frames until the
/// frame channel closes or the token is cancelled. The receiver is
/// borrowed so a supervisor can reconnect after a failure without
/// losing the capture stream.
#[async_trait::async_trait]
pub trait Recognizer: Send {
    async fn run(
        &mut self,
        frames: &mut mpsc::Receiver<AudioFrame>,
        utterances: mpsc::Sender<Utterance>,
        cancel: CancellationToken,
    ) -> Result<(), RecognizerError>;
}

#[derive(Debug, Clone)]
pub struct StreamingRecognizerConfig {
    /// Websocket endpoint of the transcription server.
    pub endpoint: String,
    pub language: Option<String>,
}

impl Default for StreamingRecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:2700".to_string(),
            language: None,
        }
    }
}

/// Transcript message sent by the server per processed chunk.
#[derive(Debug, Deserialize)]
struct TranscriptMessage {
    /// Finalized text for a completed utterance.
    text: Option<String>,
    /// In-progress text for the current utterance.
    partial: Option<String>,
    #[serde(default = "default_confidence")]
    confidence: f32,
}

fn default_confidence() -> f32 {
    1.0
}

/// Websocket streaming recognizer.
pub struct StreamingRecognizer {
    config: StreamingRecognizerConfig,
}

impl StreamingRecognizer {
    pub fn new(config: StreamingRecognizerConfig) -> Self {
        Self { config }
    }

    fn endpoint_url(&self) -> Result<Url, RecognizerError> {
        let mut url = Url::parse(&self.config.endpoint)?;
        if let Some(language) = &self.config.language {
            url.query_pairs_mut().append_pair("language", language);
        }
        Ok(url)
    }
}

#[async_trait::async_trait]
impl Recognizer for StreamingRecognizer {
    async fn run(
        &mut self,
        frames: &mut mpsc::Receiver<AudioFrame>,
        utterances: mpsc::Sender<Utterance>,
        cancel: CancellationToken,
    ) -> Result<(), RecognizerError> {
        let url = self.endpoint_url()?;
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        log::info!("Recognizer connected to {}", self.config.endpoint);

        let mut frame_count: u64 = 0;

        // Single loop: forward PCM frames upstream, parse transcripts
        // downstream into the utterance queue.
        let result = loop {
            enum Step {
                Frame(Option<AudioFrame>),
                Server(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
                Cancelled,
            }

            let step = tokio::select! {
                frame = frames.recv() => Step::Frame(frame),
                msg = read.next() => Step::Server(msg),
                _ = cancel.cancelled() => Step::Cancelled,
            };

            let msg = match step {
                Step::Cancelled => break Ok(()),
                Step::Frame(Some(frame)) => {
                    frame_count += 1;
                    let pcm = samples_to_pcm(&frame.samples);
                    if let Err(e) = write.send(Message::Binary(pcm.into())).await {
                        log::warn!("Recognizer: failed to send frame {}: {}", frame_count, e);
                        break Err(RecognizerError::WebSocket(e));
                    }
                    continue;
                }
                Step::Frame(None) => {
                    log::info!(
                        "Recognizer: frame channel closed after {} frames",
                        frame_count
                    );
                    break Ok(());
                }
                Step::Server(msg) => msg,
            };

            match msg {
                Some(Ok(Message::Text(text))) => {
                    let text_str = text.to_string();
                    let parsed: TranscriptMessage = match serde_json::from_str(&text_str) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            log::warn!("Recognizer: unparseable message: {}", e);
                            continue;
                        }
                    };

                    let utterance = if let Some(final_text) = parsed.text {
                        Utterance::new(final_text, true, parsed.confidence)
                    } else if let Some(partial) = parsed.partial {
                        Utterance::new(partial, false, parsed.confidence)
                    } else {
                        continue;
                    };

                    log::debug!(
                        "Recognizer: {} '{}' ({:.2})",
                        if utterance.is_final { "final" } else { "partial" },
                        utterance.text,
                        utterance.confidence
                    );

                    if utterances.send(utterance).await.is_err() {
                        log::info!("Recognizer: utterance consumer gone, shutting down");
                        break Ok(());
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    log::info!("Recognizer: server closed connection: {:?}", frame);
                    break Err(RecognizerError::Streaming(
                        "server closed connection".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(RecognizerError::WebSocket(e)),
                None => {
                    break Err(RecognizerError::Streaming("stream ended".to_string()));
                }
            }
        };

        let _ = write.close().await;
        result
    }
}

/// Convert i16 samples to PCM 16-bit little-endian bytes.
fn samples_to_pcm(samples: &[i16]) -> Vec<u8> {
    let mut pcm = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    pcm
}
