use crate::config::SessionSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSettingsPatch {
    pub service_url: Option<String>,
    pub block_len: Option<usize>,
    pub cache_capacity: Option<usize>,
    pub target_pattern: Option<String>,
    pub export_dir: Option<String>,
    pub export_audio: Option<bool>,
    pub input_device_id: Option<Option<String>>,
}

pub fn default_settings_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("tabscribe").join("settings.json")
}

pub fn load_or_default(path: &Path) -> SessionSettings {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str::<SessionSettings>(&contents).unwrap_or_default(),
        Err(_) => SessionSettings::default(),
    }
}

pub fn save(path: &Path, settings: &SessionSettings) -> Result<(), String> {
    let parent = path
        .parent()
        .ok_or_else(|| "settings path has no parent directory".to_string())?;
    fs::create_dir_all(parent).map_err(io_to_string)?;
    let contents = serde_json::to_string_pretty(settings).map_err(|error| error.to_string())?;
    fs::write(path, contents).map_err(io_to_string)
}

pub fn apply_patch(settings: &SessionSettings, patch: SessionSettingsPatch) -> SessionSettings {
    SessionSettings {
        service_url: patch
            .service_url
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| settings.service_url.clone()),
        access_token: settings.access_token.clone(),
        block_len: patch.block_len.unwrap_or(settings.block_len),
        target_rate_hz: settings.target_rate_hz,
        cache_capacity: patch.cache_capacity.unwrap_or(settings.cache_capacity),
        target_pattern: patch
            .target_pattern
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| settings.target_pattern.clone()),
        export_dir: patch
            .export_dir
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| settings.export_dir.clone()),
        export_audio: patch.export_audio.unwrap_or(settings.export_audio),
        input_device_id: patch
            .input_device_id
            .unwrap_or_else(|| settings.input_device_id.clone()),
    }
}

fn io_to_string(error: io::Error) -> String {
    error.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be set")
            .as_nanos();
        std::env::temp_dir().join(format!("tabscribe-{name}-{nanos}.json"))
    }

    #[test]
    fn applies_partial_settings_patch() {
        let defaults = SessionSettings::default();
        let updated = apply_patch(
            &defaults,
            SessionSettingsPatch {
                service_url: Some("wss://other.example.com/stream".to_string()),
                block_len: Some(8192),
                cache_capacity: None,
                target_pattern: Some("claude.ai".to_string()),
                export_dir: Some("/tmp/exports".to_string()),
                export_audio: Some(true),
                input_device_id: Some(Some("2".to_string())),
            },
        );

        assert_eq!(updated.service_url, "wss://other.example.com/stream");
        assert_eq!(updated.block_len, 8192);
        assert_eq!(updated.cache_capacity, defaults.cache_capacity);
        assert_eq!(updated.target_pattern, "claude.ai");
        assert_eq!(updated.export_dir, "/tmp/exports");
        assert!(updated.export_audio);
        assert_eq!(updated.input_device_id, Some("2".to_string()));
    }

    #[test]
    fn empty_patch_values_keep_existing_settings() {
        let defaults = SessionSettings::default();
        let updated = apply_patch(
            &defaults,
            SessionSettingsPatch {
                service_url: Some("   ".to_string()),
                target_pattern: Some(String::new()),
                export_dir: Some("  ".to_string()),
                ..SessionSettingsPatch::default()
            },
        );
        assert_eq!(updated.service_url, defaults.service_url);
        assert_eq!(updated.target_pattern, defaults.target_pattern);
        assert_eq!(updated.export_dir, defaults.export_dir);
    }

    #[test]
    fn persists_and_loads_settings() {
        let path = temp_file("settings");
        let settings = SessionSettings {
            service_url: "wss://stt.example.com/v1/stream".to_string(),
            target_pattern: "claude.ai".to_string(),
            export_audio: true,
            ..SessionSettings::default()
        };

        save(&path, &settings).expect("settings should be saved");
        let loaded = load_or_default(&path);
        assert_eq!(loaded, settings);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn falls_back_to_defaults_for_missing_file() {
        let path = temp_file("missing");
        let loaded = load_or_default(&path);
        assert_eq!(loaded, SessionSettings::default());
    }
}
