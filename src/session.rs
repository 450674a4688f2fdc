use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use crate::audio::AudioBlock;
use crate::capture::{CapturePipeline, FrameSink, PipelineStatus};
use crate::config::{validate_settings, SessionSettings};
use crate::error::{SessionError, SessionResult};
use crate::export;
use crate::reconciler::{ReconcilerStatus, TranscriptEvent, TranscriptReconciler};
use crate::relay::{append_recent, DeliveryRecord, TargetRegistry, MAX_RECENT_DELIVERIES};
use crate::store;
use crate::transport;

const BLOCK_RECV_TIMEOUT: Duration = Duration::from_millis(250);

/// The acquired audio source as the session sees it: a stream of fixed-size
/// sample blocks plus the rate they were captured at. The cpal stream itself
/// stays with the caller; dropping it disconnects the channel, which the
/// session treats as source-inactive.
pub struct CaptureFeed {
    pub block_rx: Receiver<Vec<f32>>,
    pub source_rate_hz: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub final_text: String,
    pub pipeline: PipelineStatus,
    pub transcript: ReconcilerStatus,
    pub transcript_path: Option<String>,
    pub audio_path: Option<String>,
    pub recent_deliveries: Vec<DeliveryRecord>,
    pub fatal_error: Option<String>,
}

pub struct Session {
    id: String,
    settings: SessionSettings,
    active: Arc<AtomicBool>,
    transport: transport::TransportHandle,
    pipeline: Arc<Mutex<CapturePipeline>>,
    reconciler: Arc<Mutex<TranscriptReconciler>>,
    deliveries: Arc<Mutex<Vec<DeliveryRecord>>>,
    last_error: Arc<Mutex<Option<SessionError>>>,
    store_path: PathBuf,
    block_thread: Option<std::thread::JoinHandle<()>>,
}

impl Session {
    /// Starts a capture session: connects the streaming channel, then runs
    /// the block loop on its own thread and the transcript event loop on the
    /// runtime. Connect failure is fatal; the session never starts half-wired.
    pub async fn start_capture(
        settings: SessionSettings,
        feed: CaptureFeed,
        registry: Arc<Mutex<TargetRegistry>>,
        store_path: PathBuf,
    ) -> SessionResult<Session> {
        validate_settings(&settings).map_err(SessionError::capture_unavailable)?;

        let channel = transport::connect(&settings.service_url, &settings.access_token).await?;
        let transport::Transport {
            handle: transport_handle,
            events,
        } = channel;

        let id = Uuid::new_v4().to_string();
        let active = Arc::new(AtomicBool::new(true));
        let pipeline = Arc::new(Mutex::new(CapturePipeline::new(
            settings.target_rate_hz,
            settings.cache_capacity,
        )));
        let reconciler = Arc::new(Mutex::new(TranscriptReconciler::new()));
        let deliveries = Arc::new(Mutex::new(Vec::new()));
        let last_error = Arc::new(Mutex::new(None));

        // A stale mirror from an earlier session must not leak into this one.
        if let Err(error) = store::clear_transcription(&store_path) {
            log::warn!("failed to clear transcript mirror: {error}");
        }

        log::info!("session {id} started");

        let block_thread = {
            let active = active.clone();
            let pipeline = pipeline.clone();
            let sink = transport_handle.clone();
            let source_rate_hz = feed.source_rate_hz;
            let block_rx = feed.block_rx;
            std::thread::spawn(move || {
                run_block_loop(&block_rx, source_rate_hz, &active, &pipeline, &sink);
            })
        };

        tokio::spawn(run_event_loop(
            events,
            active.clone(),
            reconciler.clone(),
            store_path.clone(),
            registry.clone(),
            deliveries.clone(),
            last_error.clone(),
        ));

        Ok(Session {
            id,
            settings,
            active,
            transport: transport_handle,
            pipeline,
            reconciler,
            deliveries,
            last_error,
            store_path,
            block_thread: Some(block_thread),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn current_text(&self) -> String {
        lock_or_recover(&self.reconciler).current_text().to_string()
    }

    pub fn pipeline_status(&self) -> PipelineStatus {
        lock_or_recover(&self.pipeline).status()
    }

    /// The fatal error that ended the session, if it died on its own rather
    /// than through `stop_capture`.
    pub fn fatal_error(&self) -> Option<SessionError> {
        lock_or_recover(&self.last_error).clone()
    }

    /// Stops the session. The active flag flips first so no callback effect
    /// lands afterwards; in-flight work finishes on its own and its results
    /// are discarded. Consumes the session, so stop happens exactly once.
    pub fn stop_capture(mut self) -> SessionResult<SessionSummary> {
        self.active.store(false, Ordering::SeqCst);
        self.transport.close();

        if let Some(handle) = self.block_thread.take() {
            if handle.join().is_err() {
                log::warn!("block loop thread ended abnormally");
            }
        }

        let final_text = lock_or_recover(&self.reconciler).current_text().to_string();
        if let Err(error) = store::save_transcription(&self.store_path, &final_text) {
            log::warn!("failed to mirror final transcript: {error}");
        }

        let dir = PathBuf::from(&self.settings.export_dir);
        let now = Utc::now();
        let transcript_path = match export::export_transcript(&dir, &final_text, now) {
            Ok(path) => Some(path.to_string_lossy().to_string()),
            Err(error) => {
                log::warn!("transcript export failed: {error}");
                None
            }
        };

        let mut audio_path = None;
        if self.settings.export_audio {
            let pipeline = lock_or_recover(&self.pipeline);
            let cache = pipeline.cache();
            if let Some(rate) = cache.source_rate_hz() {
                match export::export_audio(&dir, &cache.samples(), rate, now) {
                    Ok(path) => audio_path = Some(path.to_string_lossy().to_string()),
                    Err(error) => log::warn!("audio export failed: {error}"),
                }
            }
        }

        let summary = SessionSummary {
            session_id: self.id.clone(),
            final_text,
            pipeline: lock_or_recover(&self.pipeline).status(),
            transcript: lock_or_recover(&self.reconciler).status(),
            transcript_path,
            audio_path,
            recent_deliveries: lock_or_recover(&self.deliveries).clone(),
            fatal_error: lock_or_recover(&self.last_error)
                .as_ref()
                .map(SessionError::to_string),
        };
        log::info!(
            "session {} stopped: {} frames sent, {} events",
            summary.session_id,
            summary.pipeline.sent_frames,
            summary.transcript.event_count
        );
        Ok(summary)
    }
}

/// Drains the source feed until stop or disconnect. Each block goes through
/// the pipeline synchronously; a disconnected feed means the source went
/// inactive and tears the session down.
fn run_block_loop<S: FrameSink>(
    block_rx: &Receiver<Vec<f32>>,
    source_rate_hz: u32,
    active: &AtomicBool,
    pipeline: &Mutex<CapturePipeline>,
    sink: &S,
) {
    loop {
        if !active.load(Ordering::SeqCst) {
            break;
        }
        match block_rx.recv_timeout(BLOCK_RECV_TIMEOUT) {
            Ok(samples) => {
                if !active.load(Ordering::SeqCst) {
                    break;
                }
                let block = AudioBlock::new(samples, source_rate_hz);
                lock_or_recover(pipeline).process_block(block, sink);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::info!("capture source went inactive");
                active.store(false, Ordering::SeqCst);
                break;
            }
        }
    }
    log::debug!("block loop finished");
}

/// Applies transcript events until stop or channel end. The channel ending
/// while the session is still active means the service side died after
/// `Ready`; that is fatal and is surfaced exactly once.
async fn run_event_loop(
    mut events: UnboundedReceiver<TranscriptEvent>,
    active: Arc<AtomicBool>,
    reconciler: Arc<Mutex<TranscriptReconciler>>,
    store_path: PathBuf,
    registry: Arc<Mutex<TargetRegistry>>,
    deliveries: Arc<Mutex<Vec<DeliveryRecord>>>,
    last_error: Arc<Mutex<Option<SessionError>>>,
) {
    while let Some(event) = events.recv().await {
        if !active.load(Ordering::SeqCst) {
            break;
        }
        handle_transcript_event(&event, &reconciler, &store_path, &registry, &deliveries);
    }

    if active.swap(false, Ordering::SeqCst) {
        let error = SessionError::transport_closed("streaming channel ended before stop");
        log::warn!("{error}");
        *lock_or_recover(&last_error) = Some(error);
    }
    log::debug!("transcript event loop finished");
}

/// One transcript event end to end: reconcile, mirror the text, deliver it,
/// record the outcome. Delivery failures are recorded, never propagated.
fn handle_transcript_event(
    event: &TranscriptEvent,
    reconciler: &Mutex<TranscriptReconciler>,
    store_path: &std::path::Path,
    registry: &Mutex<TargetRegistry>,
    deliveries: &Mutex<Vec<DeliveryRecord>>,
) {
    let text = lock_or_recover(reconciler).on_event(event).to_string();

    if let Err(error) = store::save_transcription(store_path, &text) {
        log::warn!("failed to mirror transcript: {error}");
    }

    let result = lock_or_recover(registry).deliver(&text);
    if let Some(error) = result.as_error() {
        log::debug!("delivery failed: {error}");
    }

    append_recent(
        &mut lock_or_recover(deliveries),
        DeliveryRecord {
            text,
            success: result.success,
        },
        MAX_RECENT_DELIVERIES,
    );
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
