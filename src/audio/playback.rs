use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use thiserror::Error;

use super::SAMPLE_RATE;

#[derive(Error, Debug, Clone)]
pub enum PlaybackError {
    #[error("Failed to write audio data: {0}")]
    Write(String),

    #[error("Audio device error: {0}")]
    Device(String),
}

/// Core trait for audio output handling
#[async_trait::async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Queue audio data for playback. The data is expected to be
    /// 16-bit PCM at 16kHz mono, little-endian.
    async fn write(&self, audio_data: &[u8]) -> Result<(), PlaybackError>;

    /// Wait until everything queued so far has been played out.
    async fn drain(&self);

    /// Stop playback and discard any buffered data.
    async fn stop(&self) -> Result<(), PlaybackError>;
}

enum AudioCommand {
    Play(Vec<u8>),
    Clear,
    Shutdown,
}

/// Sample queue shared between the writer, the audio thread, and the
/// stream callback. `pending_writes` counts writes accepted but not yet
/// enqueued by the audio thread, so idleness covers the window between
/// `write` returning and the samples landing in the queue.
struct SampleQueue {
    samples: Mutex<Vec<f32>>,
    queued: AtomicUsize,
    pending_writes: AtomicUsize,
}

impl SampleQueue {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(Vec::new()),
            queued: AtomicUsize::new(0),
            pending_writes: AtomicUsize::new(0),
        })
    }

    /// Mark a write as accepted before it is handed to the audio thread.
    fn begin_write(&self) {
        self.pending_writes.fetch_add(1, Ordering::Release);
    }

    /// Undo `begin_write` for a write that never reached the thread.
    fn abort_write(&self) {
        self.pending_writes.fetch_sub(1, Ordering::Release);
    }

    /// Decode 16-bit LE PCM into the queue and settle the pending write.
    fn enqueue(&self, audio_data: &[u8]) {
        let mut samples = self.samples.lock().unwrap();
        for chunk in audio_data.chunks_exact(2) {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            samples.push(f32::from(sample) / f32::from(i16::MAX));
        }
        // Publish the new length before releasing the pending count so
        // idleness never flickers between the two updates.
        self.queued.store(samples.len(), Ordering::Release);
        self.pending_writes.fetch_sub(1, Ordering::Release);
        log::debug!("Playback: queued {} samples", samples.len());
    }

    /// Fill one output buffer, resampling the 16kHz mono queue to the
    /// device rate with linear interpolation.
    fn fill(&self, data: &mut [f32], output_channels: usize, step: f32) {
        let mut samples = self.samples.lock().unwrap();

        let output_frames = data.len() / output_channels;
        let needed = (output_frames as f32 * step).ceil() as usize;

        let mut idx: f32 = 0.0;
        for frame in data.chunks_mut(output_channels) {
            let sample = if samples.is_empty() {
                0.0
            } else {
                let lo = idx.floor() as usize;
                let hi = lo + 1;
                let fract = idx.fract();
                let a = samples.get(lo).copied().unwrap_or(0.0);
                let b = samples.get(hi).copied().unwrap_or(0.0);
                a * (1.0 - fract) + b * fract
            };
            for channel in frame.iter_mut() {
                *channel = sample;
            }
            idx += step;
        }

        if needed <= samples.len() {
            samples.drain(0..needed);
        } else {
            samples.clear();
        }
        self.queued.store(samples.len(), Ordering::Release);
    }

    fn clear(&self) {
        self.samples.lock().unwrap().clear();
        self.queued.store(0, Ordering::Release);
    }

    /// True only when nothing is queued and no accepted write is still
    /// waiting to be enqueued.
    fn is_idle(&self) -> bool {
        self.pending_writes.load(Ordering::Acquire) == 0
            && self.queued.load(Ordering::Acquire) == 0
    }
}

/// CPAL-backed playback sink. A dedicated audio thread owns the output
/// stream and the shared sample queue; `drain` resolves only once every
/// accepted write has been enqueued and played out.
pub struct CpalSink {
    command_tx: Sender<AudioCommand>,
    queue: Arc<SampleQueue>,
    is_stopped: Arc<AtomicBool>,
    audio_thread: Option<thread::JoinHandle<()>>,
}

impl CpalSink {
    pub fn new() -> Result<Self, PlaybackError> {
        let (command_tx, command_rx) = channel();
        let queue = SampleQueue::new();
        let is_stopped = Arc::new(AtomicBool::new(false));

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlaybackError::Device("No output device found".to_string()))?;

        let supported_config = device
            .default_output_config()
            .map_err(|e| PlaybackError::Device(e.to_string()))?;

        log::debug!("Playback: output config {:?}", supported_config);

        let output_sample_rate = supported_config.sample_rate().0;
        let output_channels = supported_config.channels() as usize;
        let step = SAMPLE_RATE as f32 / output_sample_rate as f32;

        let queue_for_thread = Arc::clone(&queue);
        let queue_for_stream = Arc::clone(&queue);

        let audio_thread = thread::spawn(move || {
            let stream = match device.build_output_stream(
                &supported_config.config(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    queue_for_stream.fill(data, output_channels, step);
                },
                move |err| {
                    log::error!("Playback: stream error: {}", err);
                },
                None,
            ) {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("Playback: failed to create audio stream: {}", e);
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("Playback: failed to start audio stream: {}", e);
                return;
            }

            while let Ok(command) = command_rx.recv() {
                match command {
                    AudioCommand::Play(audio_data) => queue_for_thread.enqueue(&audio_data),
                    AudioCommand::Clear => queue_for_thread.clear(),
                    AudioCommand::Shutdown => break,
                }
            }
            // Stream drops with the thread
        });

        Ok(Self {
            command_tx,
            queue,
            is_stopped,
            audio_thread: Some(audio_thread),
        })
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        let _ = self.command_tx.send(AudioCommand::Shutdown);
        if let Some(thread) = self.audio_thread.take() {
            if let Err(e) = thread.join() {
                log::error!("Playback: failed to join audio thread: {:?}", e);
            }
        }
    }
}

#[async_trait::async_trait]
impl PlaybackSink for CpalSink {
    async fn write(&self, audio_data: &[u8]) -> Result<(), PlaybackError> {
        if self.is_stopped.load(Ordering::Acquire) {
            return Err(PlaybackError::Write("Sink is stopped".to_string()));
        }

        self.queue.begin_write();
        self.command_tx
            .send(AudioCommand::Play(audio_data.to_vec()))
            .map_err(|e| {
                self.queue.abort_write();
                PlaybackError::Write(e.to_string())
            })
    }

    async fn drain(&self) {
        while !self.queue.is_idle() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn stop(&self) -> Result<(), PlaybackError> {
        self.is_stopped.store(true, Ordering::Release);
        self.command_tx
            .send(AudioCommand::Clear)
            .map_err(|e| PlaybackError::Write(e.to_string()))
    }
}
