use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::audio::encode_pcm16;

/// Timestamped transcript filename; colons and dots are replaced so the name
/// is valid on every filesystem.
pub fn transcript_filename(now: DateTime<Utc>) -> String {
    let stamp = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("transcription-{stamp}.txt")
}

pub fn audio_filename(now: DateTime<Utc>) -> String {
    let stamp = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("transcription-{stamp}.wav")
}

pub fn export_transcript(dir: &Path, text: &str, now: DateTime<Utc>) -> Result<PathBuf, String> {
    fs::create_dir_all(dir).map_err(io_to_string)?;
    let path = dir.join(transcript_filename(now));
    fs::write(&path, text).map_err(io_to_string)?;
    Ok(path)
}

/// Writes the cached raw capture as a mono 16-bit WAV at its source rate.
pub fn export_audio(
    dir: &Path,
    samples: &[f32],
    sample_rate_hz: u32,
    now: DateTime<Utc>,
) -> Result<PathBuf, String> {
    fs::create_dir_all(dir).map_err(io_to_string)?;
    let path = dir.join(audio_filename(now));

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).map_err(|error| error.to_string())?;
    for sample in encode_pcm16(samples) {
        writer
            .write_sample(sample)
            .map_err(|error| error.to_string())?;
    }
    writer.finalize().map_err(|error| error.to_string())?;
    Ok(path)
}

fn io_to_string(error: io::Error) -> String {
    error.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be set")
            .as_nanos();
        std::env::temp_dir().join(format!("tabscribe-export-{name}-{nanos}"))
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 45)
            .single()
            .expect("timestamp should be valid")
    }

    #[test]
    fn filename_replaces_colons_and_dots() {
        let name = transcript_filename(fixed_time());
        assert_eq!(name, "transcription-2024-03-05T14-30-45-000Z.txt");
        assert!(!name.contains(':'));
        assert_eq!(name.matches('.').count(), 1);
    }

    #[test]
    fn exports_transcript_text() {
        let dir = temp_dir("text");
        let path = export_transcript(&dir, "hello world", fixed_time())
            .expect("transcript should export");
        let contents = fs::read_to_string(&path).expect("exported file should read");
        assert_eq!(contents, "hello world");

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn exports_cached_audio_as_wav() {
        let dir = temp_dir("wav");
        let samples = vec![0.0_f32; 4410];
        let path = export_audio(&dir, &samples, 44_100, fixed_time())
            .expect("audio should export");
        assert!(path.to_string_lossy().ends_with(".wav"));

        let reader = hound::WavReader::open(&path).expect("wav should open");
        assert_eq!(reader.spec().sample_rate, 44_100);
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.len(), 4410);

        let _ = fs::remove_dir_all(dir);
    }
}
