use serde::{Deserialize, Serialize};

use crate::audio::{validate_stream_format, CHANNELS, DEFAULT_BLOCK_LEN, TARGET_SAMPLE_RATE_HZ};
use crate::capture::DEFAULT_CACHE_CAPACITY;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSettings {
    pub service_url: String,
    /// Injected at session start (flag or environment); never persisted.
    #[serde(skip_serializing, default)]
    pub access_token: String,
    #[serde(default = "default_block_len")]
    pub block_len: usize,
    #[serde(default = "default_target_rate_hz")]
    pub target_rate_hz: u32,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_target_pattern")]
    pub target_pattern: String,
    /// Where `stop_capture` writes the transcript; the WAV export into the
    /// same directory is opt-in via `export_audio`.
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
    #[serde(default)]
    pub export_audio: bool,
    #[serde(default)]
    pub input_device_id: Option<String>,
}

fn default_block_len() -> usize {
    DEFAULT_BLOCK_LEN
}

fn default_target_rate_hz() -> u32 {
    TARGET_SAMPLE_RATE_HZ
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_target_pattern() -> String {
    "chatgpt.com".to_string()
}

fn default_export_dir() -> String {
    ".".to_string()
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            service_url: "wss://api.example-stt.com/v1/stream".to_string(),
            access_token: String::new(),
            block_len: default_block_len(),
            target_rate_hz: default_target_rate_hz(),
            cache_capacity: default_cache_capacity(),
            target_pattern: default_target_pattern(),
            export_dir: default_export_dir(),
            export_audio: false,
            input_device_id: None,
        }
    }
}

pub fn validate_access_token(token: &str) -> Result<(), String> {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return Err("access token is required; pass --access-token or set it in the environment"
            .to_string());
    }
    if trimmed.contains(char::is_whitespace) {
        return Err("access token must not contain whitespace".to_string());
    }
    Ok(())
}

pub fn validate_settings(settings: &SessionSettings) -> Result<(), String> {
    validate_access_token(&settings.access_token)?;
    if !settings.service_url.starts_with("ws://") && !settings.service_url.starts_with("wss://") {
        return Err(format!(
            "service url must be a websocket url, got {}",
            settings.service_url
        ));
    }
    if settings.block_len < 2 {
        return Err(format!("block length too small: {}", settings.block_len));
    }
    validate_stream_format(settings.target_rate_hz, CHANNELS)?;
    if settings.cache_capacity == 0 {
        return Err("cache capacity must be non-zero".to_string());
    }
    if settings.export_dir.trim().is_empty() {
        return Err("export directory must not be empty".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_settings() -> SessionSettings {
        SessionSettings {
            access_token: "tok-abc123".to_string(),
            ..SessionSettings::default()
        }
    }

    #[test]
    fn defaults_match_stream_format() {
        let settings = SessionSettings::default();
        assert_eq!(settings.block_len, 4096);
        assert_eq!(settings.target_rate_hz, 16_000);
        assert_eq!(settings.cache_capacity, 256);
        assert_eq!(settings.target_pattern, "chatgpt.com");
        assert!(settings.access_token.is_empty());
        assert_eq!(settings.export_dir, ".");
        assert!(!settings.export_audio);
        assert!(settings.input_device_id.is_none());
    }

    #[test]
    fn older_payload_deserializes_with_defaults() {
        let json = r#"{
  "service_url": "wss://stt.example.com/v1/stream"
}"#;

        let parsed: SessionSettings =
            serde_json::from_str(json).expect("older settings payload should deserialize");
        assert_eq!(parsed.block_len, 4096);
        assert_eq!(parsed.target_rate_hz, 16_000);
        assert_eq!(parsed.target_pattern, "chatgpt.com");
        assert_eq!(parsed.export_dir, ".");
        assert!(parsed.access_token.is_empty());
    }

    #[test]
    fn access_token_is_never_serialized() {
        let serialized =
            serde_json::to_string(&valid_settings()).expect("settings should serialize");
        assert!(!serialized.contains("tok-abc123"));
        assert!(!serialized.contains("access_token"));
    }

    #[test]
    fn rejects_missing_or_malformed_token() {
        assert!(validate_access_token("").is_err());
        assert!(validate_access_token("   ").is_err());
        assert!(validate_access_token("bad token").is_err());
        assert!(validate_access_token("tok-abc123").is_ok());
    }

    #[test]
    fn validates_full_settings() {
        assert!(validate_settings(&valid_settings()).is_ok());

        let mut bad_url = valid_settings();
        bad_url.service_url = "https://stt.example.com".to_string();
        assert!(validate_settings(&bad_url).is_err());

        let mut bad_block = valid_settings();
        bad_block.block_len = 1;
        assert!(validate_settings(&bad_block).is_err());

        let mut bad_rate = valid_settings();
        bad_rate.target_rate_hz = 44_100;
        assert!(validate_settings(&bad_rate).is_err());

        let mut bad_cache = valid_settings();
        bad_cache.cache_capacity = 0;
        assert!(validate_settings(&bad_cache).is_err());

        let mut bad_dir = valid_settings();
        bad_dir.export_dir = "  ".to_string();
        assert!(validate_settings(&bad_dir).is_err());
    }
}
