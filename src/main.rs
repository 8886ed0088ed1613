use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voice_companion_rs::audio::{self, wav_dump, AudioFrame, CaptureConfig, MicCapture, MuteGate};
use voice_companion_rs::config::Config;
use voice_companion_rs::controller::{ControllerConfig, ConversationController};
use voice_companion_rs::dispatch::{ChatConfig, ChatDispatcher};
use voice_companion_rs::personality::Personality;
use voice_companion_rs::presentation::{
    spawn_face_renderer, ErrorKind, FacePresenter, PresentationEvent, PresentationSink,
};
use voice_companion_rs::recognizer::{
    Recognizer, StreamingRecognizer, StreamingRecognizerConfig, Utterance,
};
use voice_companion_rs::tts::{RemoteTts, RemoteTtsConfig};
use voice_companion_rs::wake::WakeWordDetector;
use voice_companion_rs::Result;

/// Optional TTS credential; without it the companion runs face-only.
const TTS_KEY_ENV: &str = "COMPANION_TTS_KEY";

#[derive(Parser, Debug)]
#[command(name = "voice-companion", about = "Wake-word gated desktop voice companion")]
struct Args {
    /// Path to the JSON config file
    #[arg(long, default_value = "companion.json")]
    config: PathBuf,

    /// Override the configured wake word
    #[arg(long)]
    wake_word: Option<String>,

    /// Override the mic gain multiplier (1x-4x)
    #[arg(long)]
    gain: Option<f32>,

    /// Override the personality id
    #[arg(long)]
    personality: Option<String>,

    /// Override the listening timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Websocket endpoint of the transcription server
    #[arg(long)]
    stt_endpoint: Option<String>,

    /// Persist the effective settings back to the config file
    #[arg(long)]
    save: bool,

    /// List capture devices and exit
    #[arg(long)]
    list_devices: bool,

    /// List built-in personalities and exit
    #[arg(long)]
    list_personalities: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_devices {
        for device in MicCapture::list_devices()? {
            println!(
                "{}{} ({} channels)",
                if device.is_default { "* " } else { "  " },
                device.name,
                device.channel_count
            );
        }
        return Ok(());
    }

    if args.list_personalities {
        for personality in Personality::all() {
            println!("{:10} {}", personality.id, personality.name);
        }
        return Ok(());
    }

    let mut config = Config::load_or_default(&args.config);
    if let Some(wake_word) = args.wake_word {
        config.wake_word = wake_word;
    }
    if let Some(gain) = args.gain {
        config.mic_gain_multiplier = gain.clamp(1.0, 4.0);
    }
    if let Some(personality) = args.personality {
        config.personality_id = personality;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        config.listen_timeout_secs = timeout_secs;
    }
    if args.save {
        config.save(&args.config)?;
    }

    // A missing key is not fatal: the companion still runs and every
    // dispatch surfaces an auth error face instead.
    let credential = match config.api_credential() {
        Ok(credential) => Some(credential),
        Err(e) => {
            log::warn!("{}; queries will fail until a key is configured", e);
            None
        }
    };
    let personality = Personality::by_id_or_default(&config.personality_id);
    log::info!(
        "Starting: wake word '{}', personality '{}'",
        config.wake_word,
        personality.id
    );

    // Microphone with half-duplex mute gate
    let gate = MuteGate::new();
    let (capture, frames_rx) = MicCapture::start(
        CaptureConfig {
            device_id: None,
            channel: 0,
            gain: config.mic_gain_multiplier,
        },
        gate.clone(),
    )?;

    let frames_rx = match &config.capture_dump_dir {
        Some(dir) => spawn_capture_dump(frames_rx, PathBuf::from(dir)),
        None => frames_rx,
    };

    // Presentation: terminal face plus spoken replies when a TTS key
    // is available
    let (presenter, face_rx) = match std::env::var(TTS_KEY_ENV) {
        Ok(tts_key) if !tts_key.trim().is_empty() => {
            let synthesizer = Arc::new(RemoteTts::new(tts_key, RemoteTtsConfig::default())?);
            let playback = Arc::new(audio::CpalSink::new()?);
            FacePresenter::with_speech(
                synthesizer,
                playback,
                personality.voice.clone(),
                gate.clone(),
            )
        }
        _ => {
            log::info!("{} not set, replies will not be voiced", TTS_KEY_ENV);
            FacePresenter::face_only()
        }
    };
    let presenter: Arc<dyn PresentationSink> = Arc::new(presenter);
    let face_task = spawn_face_renderer(face_rx);

    let dispatcher = Arc::new(ChatDispatcher::new(credential, ChatConfig::default())?);

    let cancel = CancellationToken::new();
    let (utterance_tx, utterance_rx) = mpsc::channel::<Utterance>(32);

    // Recognizer supervisor: reconnect after failures, surfacing each
    // one as an error face
    let recognizer_config = StreamingRecognizerConfig {
        endpoint: args
            .stt_endpoint
            .unwrap_or_else(|| StreamingRecognizerConfig::default().endpoint),
        language: None,
    };
    let recognizer_task = tokio::spawn(supervise_recognizer(
        recognizer_config,
        frames_rx,
        utterance_tx,
        Arc::clone(&presenter),
        cancel.clone(),
    ));

    // Ctrl+C cancels everything
    let ctrl_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Received Ctrl+C, shutting down");
            ctrl_cancel.cancel();
        }
    });

    println!("Listening for the wake word '{}'...", config.wake_word);
    println!("Say 'sleep' to end a session, press Ctrl+C to exit");

    let mut controller = ConversationController::new(
        WakeWordDetector::new(&config.wake_word),
        dispatcher,
        Arc::clone(&presenter),
        personality,
        ControllerConfig::from(&config),
    );
    controller.run(utterance_rx, cancel.clone()).await;

    cancel.cancel();
    drop(capture);
    let _ = recognizer_task.await;
    face_task.abort();

    println!("Goodbye!");
    Ok(())
}

/// Run the streaming recognizer, reconnecting after failures with a
/// short backoff. Every failure surfaces as an error face.
async fn supervise_recognizer(
    config: StreamingRecognizerConfig,
    mut frames: mpsc::Receiver<AudioFrame>,
    utterances: mpsc::Sender<Utterance>,
    presenter: Arc<dyn PresentationSink>,
    cancel: CancellationToken,
) {
    let mut recognizer = StreamingRecognizer::new(config);

    while !cancel.is_cancelled() {
        match recognizer
            .run(&mut frames, utterances.clone(), cancel.clone())
            .await
        {
            Ok(()) => break,
            Err(e) => {
                log::error!("Recognizer unavailable: {}", e);
                presenter
                    .emit(PresentationEvent::Error(ErrorKind::Recognizer))
                    .await;
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                    _ = cancel.cancelled() => break,
                }
            }
        }
    }
}

/// Relay capture frames while accumulating debug WAV dumps, one file
/// per ~30s of audio.
fn spawn_capture_dump(
    mut frames: mpsc::Receiver<AudioFrame>,
    dir: PathBuf,
) -> mpsc::Receiver<AudioFrame> {
    const DUMP_CHUNK_SAMPLES: usize = audio::SAMPLE_RATE as usize * 30;

    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut pending: Vec<i16> = Vec::with_capacity(DUMP_CHUNK_SAMPLES);
        while let Some(frame) = frames.recv().await {
            pending.extend_from_slice(&frame.samples);
            if pending.len() >= DUMP_CHUNK_SAMPLES {
                if let Err(e) = wav_dump::dump_session(&dir, &pending) {
                    log::warn!("Capture dump failed: {}", e);
                }
                pending.clear();
            }
            if tx.send(frame).await.is_err() {
                break;
            }
        }
        if !pending.is_empty() {
            let _ = wav_dump::dump_session(&dir, &pending);
        }
    });
    rx
}
