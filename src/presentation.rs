//! Presentation boundary: the controller emits discrete events and this
//! module maps them to face animation state and speech playback.
//!
//! Face state travels over a `watch` channel, so any rendering backend
//! (terminal, GUI, headless test harness) can subscribe, and a rapid
//! burst of events always settles on the last one.

use std::sync::Arc;
use tokio::sync::watch;

use crate::audio::{MuteGate, PlaybackSink};
use crate::dispatch::DispatchError;
use crate::personality::VoiceParams;
use crate::tts::{SpeechSynthesizer, SynthesisError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorKind {
    Auth,
    Network,
    Backend,
    Recognizer,
}

impl From<&DispatchError> for ErrorKind {
    fn from(e: &DispatchError) -> Self {
        match e {
            DispatchError::Auth(_) => ErrorKind::Auth,
            DispatchError::Network(_) => ErrorKind::Network,
            DispatchError::Backend(_) => ErrorKind::Backend,
        }
    }
}

/// Discrete events emitted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationEvent {
    Wake,
    Listening,
    Speaking(String),
    Idle,
    Error(ErrorKind),
}

/// Face animation state derived from events. One state at a time; the
/// latest event wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum FaceState {
    Idle,
    Waking,
    Listening,
    Speaking,
    Error,
}

impl From<&PresentationEvent> for FaceState {
    fn from(event: &PresentationEvent) -> Self {
        match event {
            PresentationEvent::Wake => FaceState::Waking,
            PresentationEvent::Listening => FaceState::Listening,
            PresentationEvent::Speaking(_) => FaceState::Speaking,
            PresentationEvent::Idle => FaceState::Idle,
            PresentationEvent::Error(_) => FaceState::Error,
        }
    }
}

/// Consumes presentation events. `emit` resolves once the event's side
/// effect is complete; for `Speaking` that means synthesis and playback
/// have finished.
#[async_trait::async_trait]
pub trait PresentationSink: Send + Sync {
    async fn emit(&self, event: PresentationEvent);
}

/// Production sink: publishes face state and voices replies. Speech is
/// optional so the companion still runs face-only without a TTS key.
pub struct FacePresenter {
    face_tx: watch::Sender<FaceState>,
    speech: Option<SpeechOutput>,
}

struct SpeechOutput {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    playback: Arc<dyn PlaybackSink>,
    voice: VoiceParams,
    mute: MuteGate,
}

impl FacePresenter {
    /// Face-only presenter; replies are logged, not voiced.
    pub fn face_only() -> (Self, watch::Receiver<FaceState>) {
        let (face_tx, face_rx) = watch::channel(FaceState::Idle);
        (
            Self {
                face_tx,
                speech: None,
            },
            face_rx,
        )
    }

    /// Presenter with spoken output. The mute gate is held closed for
    /// the duration of playback (half-duplex discipline).
    pub fn with_speech(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        playback: Arc<dyn PlaybackSink>,
        voice: VoiceParams,
        mute: MuteGate,
    ) -> (Self, watch::Receiver<FaceState>) {
        let (face_tx, face_rx) = watch::channel(FaceState::Idle);
        (
            Self {
                face_tx,
                speech: Some(SpeechOutput {
                    synthesizer,
                    playback,
                    voice,
                    mute,
                }),
            },
            face_rx,
        )
    }

    async fn speak(&self, text: &str) {
        let Some(speech) = &self.speech else {
            log::info!("Reply (no voice configured): {}", text);
            return;
        };

        speech.mute.mute();
        let result = self.synthesize_and_play(speech, text).await;
        speech.mute.unmute();

        if let Err(e) = result {
            log::error!("Speech synthesis failed: {}", e);
        }
    }

    async fn synthesize_and_play(
        &self,
        speech: &SpeechOutput,
        text: &str,
    ) -> Result<(), SynthesisError> {
        let pcm = speech.synthesizer.synthesize(text, &speech.voice).await?;
        speech
            .playback
            .write(&pcm)
            .await
            .map_err(|e| SynthesisError::Playback(e.to_string()))?;
        speech.playback.drain().await;
        Ok(())
    }
}

#[async_trait::async_trait]
impl PresentationSink for FacePresenter {
    async fn emit(&self, event: PresentationEvent) {
        let state = FaceState::from(&event);
        // send_replace never fails even with no subscribers
        self.face_tx.send_replace(state);

        match event {
            PresentationEvent::Speaking(text) => self.speak(&text).await,
            PresentationEvent::Error(kind) => {
                log::warn!("Surfacing error face: {}", kind);
            }
            _ => {}
        }
    }
}

/// Terminal face renderer: logs every face transition until the channel
/// closes. Stands in for the animation window.
pub fn spawn_face_renderer(mut face_rx: watch::Receiver<FaceState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let state = *face_rx.borrow_and_update();
            println!("[face] {}", face_glyph(state));
            if face_rx.changed().await.is_err() {
                break;
            }
        }
    })
}

fn face_glyph(state: FaceState) -> &'static str {
    match state {
        FaceState::Idle => "( - _ - )  idle",
        FaceState::Waking => "( o _ o )  waking",
        FaceState::Listening => "( ^ o ^ )  listening",
        FaceState::Speaking => "( ^ o ^ )~ speaking",
        FaceState::Error => "( x _ x )  error",
    }
}
