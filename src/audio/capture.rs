use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, Host, Sample, SampleFormat, SizedSample, Stream as CpalStream,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

use super::{FRAME_SIZE, SAMPLE_RATE};

#[derive(Error, Debug)]
pub enum AudioCaptureError {
    #[error("Audio device error: {0}")]
    Device(String),
    #[error("Audio stream error: {0}")]
    Stream(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Half-duplex gate: while muted, captured frames are dropped so the
/// device does not hear its own speech output.
#[derive(Clone, Debug, Default)]
pub struct MuteGate {
    muted: Arc<AtomicBool>,
}

impl MuteGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mute(&self) {
        self.muted.store(true, Ordering::Release);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::Release);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }
}

/// Microphone capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Device name to capture from (None = default device)
    pub device_id: Option<String>,
    /// Channel to capture (0-based index)
    pub channel: u32,
    /// Software gain multiplier applied per sample
    pub gain: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            channel: 0,
            gain: 2.0,
        }
    }
}

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub channel_count: u32,
}

/// A fixed-size frame of microphone samples.
#[derive(Clone, Debug)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub timestamp: Instant,
}

/// Continuous microphone capture via CPAL, feeding a bounded channel of
/// fixed-size frames. The struct must stay alive for the stream to run.
pub struct MicCapture {
    _stream: CpalStream,
    _host: Host,
    gate: MuteGate,
}

impl MicCapture {
    /// Open the device and start capturing. Returns the capture handle
    /// and the frame receiver; dropping the handle stops the stream.
    pub fn start(
        config: CaptureConfig,
        gate: MuteGate,
    ) -> Result<(Self, mpsc::Receiver<AudioFrame>), AudioCaptureError> {
        let host = cpal::default_host();

        let device = if let Some(id) = &config.device_id {
            host.devices()
                .map_err(|e| AudioCaptureError::Device(e.to_string()))?
                .find(|d| d.name().map(|n| n == *id).unwrap_or(false))
                .ok_or_else(|| AudioCaptureError::Device(format!("Device not found: {}", id)))?
        } else {
            host.default_input_device()
                .ok_or_else(|| AudioCaptureError::Device("No default input device found".into()))?
        };

        let (tx, rx) = mpsc::channel(32);
        let tx = Arc::new(Mutex::new(tx));

        let supported_configs: Vec<_> = device
            .supported_input_configs()
            .map_err(|e| AudioCaptureError::Config(e.to_string()))?
            .collect();

        // Prefer a config with native 16kHz support
        let mut supported_config = None;
        for cfg in &supported_configs {
            if cfg.min_sample_rate().0 <= SAMPLE_RATE && cfg.max_sample_rate().0 >= SAMPLE_RATE {
                supported_config = Some(cfg.with_sample_rate(cpal::SampleRate(SAMPLE_RATE)));
                break;
            }
        }
        let supported_config = match supported_config {
            Some(cfg) => cfg,
            None => device
                .default_input_config()
                .map_err(|e| AudioCaptureError::Config(e.to_string()))?,
        };

        if config.channel >= u32::from(supported_config.channels()) {
            return Err(AudioCaptureError::Config(format!(
                "Selected channel {} is not available (device has {} channels)",
                config.channel,
                supported_config.channels()
            )));
        }

        let stream_config = cpal::StreamConfig {
            channels: supported_config.channels(),
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_fn = move |err| {
            log::error!("Audio stream error: {}", err);
        };

        log::info!(
            "Microphone configured: {} channels @ {}Hz (format: {:?}, gain {:.1}x)",
            stream_config.channels,
            SAMPLE_RATE,
            supported_config.sample_format(),
            config.gain,
        );

        let gain = config.gain.clamp(1.0, 4.0);
        let gate_for_stream = gate.clone();
        let stream = match supported_config.sample_format() {
            SampleFormat::I16 => Self::build_stream::<i16>(
                &device,
                &stream_config,
                tx,
                config.channel,
                gain,
                gate_for_stream,
                err_fn,
            )?,
            SampleFormat::U16 => Self::build_stream::<u16>(
                &device,
                &stream_config,
                tx,
                config.channel,
                gain,
                gate_for_stream,
                err_fn,
            )?,
            SampleFormat::F32 => Self::build_stream::<f32>(
                &device,
                &stream_config,
                tx,
                config.channel,
                gain,
                gate_for_stream,
                err_fn,
            )?,
            _ => {
                return Err(AudioCaptureError::Config(
                    "Unsupported sample format".into(),
                ))
            }
        };

        stream
            .play()
            .map_err(|e| AudioCaptureError::Stream(e.to_string()))?;

        Ok((
            Self {
                _stream: stream,
                _host: host,
                gate,
            },
            rx,
        ))
    }

    pub fn gate(&self) -> MuteGate {
        self.gate.clone()
    }

    fn build_stream<T>(
        device: &Device,
        config: &cpal::StreamConfig,
        tx: Arc<Mutex<mpsc::Sender<AudioFrame>>>,
        channel: u32,
        gain: f32,
        gate: MuteGate,
        err_fn: impl FnMut(cpal::StreamError) + Send + 'static + Copy,
    ) -> Result<CpalStream, AudioCaptureError>
    where
        T: Sample + SizedSample + Send + Sync + 'static,
        i16: FromSample<T>,
    {
        let mut buffer = Vec::with_capacity(FRAME_SIZE);
        let channels = config.channels as usize;

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    if gate.is_muted() {
                        buffer.clear();
                        return;
                    }

                    for frame in data.chunks(channels) {
                        if let Some(sample) = frame.get(channel as usize) {
                            let value = i16::from_sample(*sample);
                            buffer.push(apply_gain(value, gain));

                            if buffer.len() >= FRAME_SIZE {
                                if let Ok(tx) = tx.lock() {
                                    let _ = tx.try_send(AudioFrame {
                                        samples: buffer.clone(),
                                        timestamp: Instant::now(),
                                    });
                                }
                                buffer.clear();
                            }
                        }
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| AudioCaptureError::Stream(e.to_string()))
    }

    pub fn list_devices() -> Result<Vec<AudioDeviceInfo>, AudioCaptureError> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| AudioCaptureError::Device(e.to_string()))?;

        let default_device = host.default_input_device();

        let mut result = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                let config = device
                    .default_input_config()
                    .map_err(|e| AudioCaptureError::Config(e.to_string()))?;

                result.push(AudioDeviceInfo {
                    name: name.clone(),
                    is_default: default_device
                        .as_ref()
                        .map(|d| d.name().unwrap_or_default())
                        == Some(name),
                    channel_count: u32::from(config.channels()),
                });
            }
        }

        Ok(result)
    }
}

/// Amplify one sample, saturating at the i16 range.
fn apply_gain(sample: i16, gain: f32) -> i16 {
    (f32::from(sample) * gain).clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_amplifies_and_saturates() {
        assert_eq!(apply_gain(100, 2.0), 200);
        assert_eq!(apply_gain(-100, 2.0), -200);
        assert_eq!(apply_gain(20_000, 4.0), i16::MAX);
        assert_eq!(apply_gain(-20_000, 4.0), i16::MIN);
    }

    #[test]
    fn unity_gain_is_identity() {
        for s in [-32768i16, -1, 0, 1, 32767] {
            assert_eq!(apply_gain(s, 1.0), s);
        }
    }

    #[test]
    fn mute_gate_round_trip() {
        let gate = MuteGate::new();
        assert!(!gate.is_muted());
        gate.mute();
        assert!(gate.is_muted());
        gate.unmute();
        assert!(!gate.is_muted());
    }

    #[test]
    fn gate_clones_share_state() {
        let gate = MuteGate::new();
        let clone = gate.clone();
        gate.mute();
        assert!(clone.is_muted());
    }

    #[test]
    #[cfg_attr(
        not(feature = "test-audio"),
        ignore = "requires audio device - run with --features test-audio"
    )]
    fn list_devices_reports_a_default() {
        let devices = MicCapture::list_devices().unwrap();
        assert!(!devices.is_empty());
        assert!(devices.iter().any(|d| d.is_default));
    }

    #[tokio::test]
    #[cfg_attr(
        not(feature = "test-audio"),
        ignore = "requires audio device - run with --features test-audio"
    )]
    async fn capture_produces_frames() {
        let (capture, mut frames) =
            MicCapture::start(CaptureConfig::default(), MuteGate::new()).unwrap();

        let frame = tokio::time::timeout(std::time::Duration::from_secs(2), frames.recv())
            .await
            .expect("no frame within 2s")
            .expect("frame channel closed");
        assert_eq!(frame.samples.len(), FRAME_SIZE);
        drop(capture);
    }
}
