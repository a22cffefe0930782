//! `AcquisitionEngine`: owns the stream-side state and the extractor thread.
//!
//! ## Lifecycle
//!
//! ```text
//! AcquisitionEngine::new(config, recorder)
//!     └─► open_stream()   → (PacketIngest, SampleConsumer), counters reset
//!         └─► start(consumer) → extractor spawned, status = Streaming
//!             └─► stop()      → running=false, extractor joined, status = Stopped
//! ```
//!
//! The ingest half is handed to the device driver as its data callback; the
//! consumer half moves into the extractor thread. `start()`/`stop()` return
//! an error when called in the wrong state.

pub mod extractor;

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::{
    buffering::{create_sample_ring, SampleConsumer, RING_CAPACITY},
    calibration::CalibrationState,
    channel::{feature_channel, FeatureReceiver, FeatureSender, FEATURE_CHANNEL_CAP},
    classifier::ClassifierSlot,
    device::ingest::PacketIngest,
    error::{MyoscopeError, Result},
    features::{CHANNEL_COUNT, RAW_OFFSET},
    ipc::events::{SessionStatus, SessionStatusEvent},
    recording::RecordingSink,
};

pub use extractor::{DiagnosticsSnapshot, EngineDiagnostics};

/// Broadcast channel capacity for status events.
const BROADCAST_CAP: usize = 256;

/// Configuration for `AcquisitionEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Samples per analysis window (interleaved, all channels). Default: 400.
    pub window_len: usize,
    /// Samples the window cursor advances after each window. Default: 200.
    pub stride: usize,
    /// Subtracted from every raw byte before scaling. Default: 121.
    pub raw_offset: f32,
    /// Fixed sleep between extractor iterations. Default: 47 ms.
    pub extract_interval: Duration,
    /// Samples jumped by one skip request. Default: 1000.
    pub skip_amount: usize,
    /// Feature vectors held before the oldest is displaced. Default: 64.
    pub feature_capacity: usize,
    /// Sample ring capacity in bytes.
    pub ring_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_len: 400,
            stride: 200,
            raw_offset: RAW_OFFSET,
            extract_interval: Duration::from_millis(47),
            skip_amount: 1_000,
            feature_capacity: FEATURE_CHANNEL_CAP,
            ring_capacity: RING_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Window, stride and skip must stay channel-aligned.
    pub fn validate(&self) -> Result<()> {
        let aligned = |name: &str, value: usize| {
            if value == 0 || value % CHANNEL_COUNT != 0 {
                Err(MyoscopeError::InvalidConfig(format!(
                    "{name} ({value}) must be a positive multiple of {CHANNEL_COUNT}"
                )))
            } else {
                Ok(())
            }
        };
        aligned("window_len", self.window_len)?;
        aligned("stride", self.stride)?;
        aligned("skip_amount", self.skip_amount)?;
        if self.stride > self.window_len {
            return Err(MyoscopeError::InvalidConfig(format!(
                "stride ({}) must not exceed window_len ({})",
                self.stride, self.window_len
            )));
        }
        if !self.raw_offset.is_finite() {
            return Err(MyoscopeError::InvalidConfig("raw_offset must be finite".into()));
        }
        if self.feature_capacity == 0 {
            return Err(MyoscopeError::InvalidConfig(
                "feature_capacity must be > 0".into(),
            ));
        }
        if self.ring_capacity < self.window_len {
            return Err(MyoscopeError::InvalidConfig(format!(
                "ring_capacity ({}) cannot hold one window ({})",
                self.ring_capacity, self.window_len
            )));
        }
        Ok(())
    }
}

/// Stream-side engine handle.
///
/// All fields use interior mutability, so the engine can be shared as
/// `Arc<AcquisitionEngine>` between the controller and observers.
pub struct AcquisitionEngine {
    config: EngineConfig,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<SessionStatus>>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    calibration: Arc<CalibrationState>,
    recorder: Arc<RecordingSink>,
    classifier: ClassifierSlot,
    skip_requests: Arc<AtomicUsize>,
    cursor: Arc<AtomicUsize>,
    diagnostics: Arc<EngineDiagnostics>,
    feature_tx: FeatureSender,
    feature_rx: FeatureReceiver,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AcquisitionEngine {
    pub fn new(config: EngineConfig, recorder: Arc<RecordingSink>) -> Result<Self> {
        config.validate()?;
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (feature_tx, feature_rx) = feature_channel(config.feature_capacity);

        Ok(Self {
            calibration: Arc::new(CalibrationState::new(config.raw_offset)),
            config,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionStatus::Disconnected)),
            status_tx,
            recorder,
            classifier: ClassifierSlot::default(),
            skip_requests: Arc::new(AtomicUsize::new(0)),
            cursor: Arc::new(AtomicUsize::new(0)),
            diagnostics: Arc::new(EngineDiagnostics::default()),
            feature_tx,
            feature_rx,
            worker: Mutex::new(None),
        })
    }

    /// Create a fresh sample ring for a new device stream and discard any
    /// feature vectors left over from the previous one.
    ///
    /// # Errors
    /// `AlreadyRunning` while an extractor still owns the previous ring.
    pub fn open_stream(&self) -> Result<(PacketIngest, SampleConsumer)> {
        if self.is_running() {
            return Err(MyoscopeError::AlreadyRunning);
        }
        self.diagnostics.reset();
        self.skip_requests.store(0, Ordering::SeqCst);
        // Vectors from a previous stream must not reach the renderer.
        let stale = std::iter::from_fn(|| self.feature_rx.poll()).count();
        if stale > 0 {
            info!(stale, "discarded feature vectors from previous stream");
        }
        let (producer, consumer) = create_sample_ring(self.config.ring_capacity);
        let ingest = PacketIngest::new(
            producer,
            Arc::clone(&self.recorder),
            Arc::clone(&self.diagnostics),
        );
        Ok((ingest, consumer))
    }

    /// Spawn the feature extractor over `consumer`.
    pub fn start(&self, consumer: SampleConsumer) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MyoscopeError::AlreadyRunning);
        }
        self.cursor.store(0, Ordering::SeqCst);

        let ctx = extractor::ExtractorContext {
            config: self.config.clone(),
            consumer,
            running: Arc::clone(&self.running),
            calibration: Arc::clone(&self.calibration),
            classifier: self.classifier.clone(),
            features: self.feature_tx.clone(),
            skip_requests: Arc::clone(&self.skip_requests),
            cursor: Arc::clone(&self.cursor),
            diagnostics: Arc::clone(&self.diagnostics),
        };

        let spawned = std::thread::Builder::new()
            .name("feature-extractor".into())
            .spawn(move || extractor::run(ctx));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                self.set_status(SessionStatus::Streaming, None);
                info!("engine started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                Err(MyoscopeError::Io(e))
            }
        }
    }

    /// Stop the extractor and wait for it to exit.
    ///
    /// # Errors
    /// `NotRunning` if the extractor is not active.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(MyoscopeError::NotRunning);
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("feature extractor panicked");
            }
        }
        self.set_status(SessionStatus::Stopped, None);
        info!("engine stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// A receiver for published feature vectors. Clones share one queue.
    pub fn feature_receiver(&self) -> FeatureReceiver {
        self.feature_rx.clone()
    }

    pub fn calibration(&self) -> &Arc<CalibrationState> {
        &self.calibration
    }

    pub fn recorder(&self) -> &Arc<RecordingSink> {
        &self.recorder
    }

    pub fn classifier(&self) -> &ClassifierSlot {
        &self.classifier
    }

    /// Ask the extractor to jump the window cursor forward by `skip_amount`.
    pub fn request_skip(&self) -> usize {
        let amount = self.config.skip_amount;
        self.skip_requests.fetch_add(amount, Ordering::AcqRel);
        amount
    }

    /// Window cursor as last stored by the extractor.
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    /// Record a status transition and broadcast it to subscribers.
    pub fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: new_status,
            detail,
        });
    }
}

impl Drop for AcquisitionEngine {
    fn drop(&mut self) {
        // Signal only; the extractor exits on its next iteration.
        self.running.store(false, Ordering::SeqCst);
    }
}
