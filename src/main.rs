use clap::Parser;
use log::info;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tabscribe::audio;
use tabscribe::config::{validate_access_token, SessionSettings};
use tabscribe::relay::{wait_for_target, RelayTarget, TargetRegistry};
use tabscribe::session::{CaptureFeed, Session};
use tabscribe::settings_store::{self, SessionSettingsPatch};
use tabscribe::store;

#[derive(Default, Debug, Copy, Clone, clap::ValueEnum)]
enum Level {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<Level> for log::LevelFilter {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => log::LevelFilter::Error,
            Level::Warn => log::LevelFilter::Warn,
            Level::Info => log::LevelFilter::Info,
            Level::Debug => log::LevelFilter::Debug,
            Level::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Parser)]
#[command(name = "tabscribe")]
#[command(version)]
#[command(about = "Stream live audio to a transcription service and relay the text", long_about = None)]
struct Cli {
    /// WebSocket URL of the transcription service.
    #[arg(long)]
    service_url: Option<String>,

    /// Access token; falls back to the TABSCRIBE_ACCESS_TOKEN environment variable.
    #[arg(long)]
    access_token: Option<String>,

    /// Input device index; defaults to the system default device.
    #[arg(long)]
    device: Option<String>,

    /// Directory to export the transcript (and optionally audio) into on stop.
    #[arg(long)]
    export_dir: Option<String>,

    /// Also export the cached raw audio as WAV on stop.
    #[arg(long)]
    export_audio: bool,

    #[arg(long, default_value_t = Level::Info)]
    #[clap(value_enum)]
    level: Level,
}

/// Relay target that writes transcript updates to stdout. Stands in for a
/// remote context when running from the terminal.
struct ConsoleTarget;

impl RelayTarget for ConsoleTarget {
    fn address(&self) -> &str {
        "console://chatgpt.com"
    }

    fn submit(&self, message: &str) -> Result<String, String> {
        let parsed =
            serde_json::from_str::<serde_json::Value>(message).map_err(|error| error.to_string())?;
        let text = parsed
            .get("text")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        println!("\r>> {text}");
        Ok(r#"{"success":true}"#.to_string())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::new().filter(None, cli.level.into()).init();

    let settings_path = settings_store::default_settings_path();
    let loaded = settings_store::load_or_default(&settings_path);

    // Flag overrides go through the same patch path as any other settings
    // change and persist for the next run.
    let patch = SessionSettingsPatch {
        service_url: cli.service_url,
        export_dir: cli.export_dir,
        export_audio: cli.export_audio.then_some(true),
        input_device_id: cli.device.map(Some),
        ..SessionSettingsPatch::default()
    };
    let mut settings = settings_store::apply_patch(&loaded, patch);
    if settings != loaded {
        if let Err(error) = settings_store::save(&settings_path, &settings) {
            log::warn!("failed to persist settings: {error}");
        }
    }

    let token = cli
        .access_token
        .or_else(|| std::env::var("TABSCRIBE_ACCESS_TOKEN").ok())
        .unwrap_or_default();
    validate_access_token(&token).map_err(|error| anyhow::anyhow!(error))?;
    settings.access_token = token;

    run_session(settings).await
}

async fn run_session(settings: SessionSettings) -> anyhow::Result<()> {
    let mut registry = TargetRegistry::new(settings.target_pattern.clone());
    registry.register(Box::new(ConsoleTarget));
    let registry = Arc::new(Mutex::new(registry));

    {
        let registry = registry
            .lock()
            .map_err(|_| anyhow::anyhow!("failed to acquire target registry"))?;
        let always_active = AtomicBool::new(true);
        if !wait_for_target(&registry, &always_active, 5, Duration::from_millis(100)) {
            anyhow::bail!(
                "no relay target matches pattern {}",
                registry.address_pattern()
            );
        }
    }

    let (block_tx, block_rx) = sync_channel::<Vec<f32>>(16);
    let live_input = audio::build_live_input_stream(
        settings.input_device_id.as_deref(),
        settings.block_len,
        block_tx,
    )
    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    info!("capturing at {} Hz", live_input.sample_rate_hz);

    let feed = CaptureFeed {
        block_rx,
        source_rate_hz: live_input.sample_rate_hz,
    };
    let session = Session::start_capture(
        settings,
        feed,
        registry,
        store::default_store_path(),
    )
    .await
    .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    info!("session {} running; press Ctrl-C to stop", session.id());

    tokio::signal::ctrl_c().await?;
    info!("stopping session");

    // Dropping the stream disconnects the feed, which also unblocks the
    // block loop if no more callbacks arrive.
    drop(live_input);

    let summary = session
        .stop_capture()
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;
    if let Some(error) = &summary.fatal_error {
        log::warn!("session ended on its own: {error}");
    }
    println!("final transcript: {}", summary.final_text);
    if let Some(path) = &summary.transcript_path {
        println!("transcript exported to {path}");
    }
    if let Some(path) = &summary.audio_path {
        println!("audio exported to {path}");
    }

    Ok(())
}
