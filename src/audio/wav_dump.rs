//! Debug recordings of captured audio, for tuning gain and the wake word.

use chrono::Local;
use std::path::{Path, PathBuf};

use super::SAMPLE_RATE;

/// Write one recognition session's samples as a timestamped mono WAV.
/// Returns the path written to.
pub fn dump_session(dir: &Path, samples: &[i16]) -> Result<PathBuf, hound::Error> {
    std::fs::create_dir_all(dir)?;

    let filename = format!("capture_{}.wav", Local::now().format("%Y%m%d_%H%M%S"));
    let path = dir.join(filename);

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec)?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;

    log::debug!("Dumped {} samples to {}", samples.len(), path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_readable_wav() {
        let dir = tempdir().unwrap();
        let samples: Vec<i16> = (0..1600).map(|i| (i % 100) as i16).collect();

        let path = dump_session(dir.path(), &samples).unwrap();
        assert!(path.exists());

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.len(), 1600);
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("stt").join("dumps");
        let path = dump_session(&nested, &[0i16; 16]).unwrap();
        assert!(path.starts_with(&nested));
    }
}
