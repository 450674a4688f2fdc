use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const TRANSCRIPTION_KEY: &str = "currentTranscription";

pub fn default_store_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("tabscribe").join("store.json")
}

/// Mirrors the live transcript so other surfaces (and the export step) read a
/// consistent snapshot even if the session ends abruptly.
pub fn save_transcription(path: &Path, text: &str) -> Result<(), String> {
    let mut entries = read_entries(path)?;
    entries.insert(TRANSCRIPTION_KEY.to_string(), Value::String(text.to_string()));
    write_entries(path, &entries)
}

pub fn load_transcription(path: &Path) -> Result<Option<String>, String> {
    let entries = read_entries(path)?;
    Ok(entries
        .get(TRANSCRIPTION_KEY)
        .and_then(Value::as_str)
        .map(str::to_string))
}

pub fn clear_transcription(path: &Path) -> Result<(), String> {
    let mut entries = read_entries(path)?;
    if entries.remove(TRANSCRIPTION_KEY).is_none() {
        return Ok(());
    }
    write_entries(path, &entries)
}

fn read_entries(path: &Path) -> Result<Map<String, Value>, String> {
    if !path.exists() {
        return Ok(Map::new());
    }
    let contents = fs::read_to_string(path).map_err(io_to_string)?;
    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Ok(Map::new()),
    }
}

fn write_entries(path: &Path, entries: &Map<String, Value>) -> Result<(), String> {
    let parent = path
        .parent()
        .ok_or_else(|| "store path has no parent directory".to_string())?;
    fs::create_dir_all(parent).map_err(io_to_string)?;
    let contents =
        serde_json::to_string_pretty(&Value::Object(entries.clone())).map_err(|error| error.to_string())?;
    fs::write(path, contents).map_err(io_to_string)
}

fn io_to_string(error: io::Error) -> String {
    error.to_string()
}
