pub mod capture;
pub mod playback;
pub mod wav_dump;

pub use capture::{AudioFrame, CaptureConfig, MicCapture, MuteGate};
pub use playback::{CpalSink, PlaybackSink};

/// All audio in the pipeline is 16 kHz mono.
pub const SAMPLE_RATE: u32 = 16_000;
/// Samples per capture frame (32ms at 16 kHz).
pub const FRAME_SIZE: usize = 512;
