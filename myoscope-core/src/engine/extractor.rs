//! Blocking feature-extractor loop.
//!
//! ## Per iteration
//!
//! ```text
//! 1. Drain the sample ring into the append-only history
//! 2. Apply pending skip requests to the window cursor
//! 3. If [cursor, cursor + window) is available:
//!    a. deinterleave, offset, mean + RMS features
//!    b. calibrate (display sample, or baseline/peak tracking)
//!    c. optional classifier prediction
//!    d. publish to the feature channel (never blocks)
//!    e. advance the cursor by one stride
//! 4. Compact history behind the cursor
//! 5. Sleep a fixed interval
//! ```
//!
//! The loop is a polling design: a short window simply waits for the next
//! iteration. Data faults are logged and counted; they never end the loop.
//! It runs until `running` is cleared.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    buffering::{history::SampleHistory, Consumer, SampleConsumer},
    calibration::{CalibrationState, SamplePhase},
    channel::{Delivery, FeatureSender},
    classifier::ClassifierSlot,
    engine::EngineConfig,
    features::{extract_window, FeatureError},
    ipc::events::FeatureVector,
};

#[derive(Default)]
pub struct EngineDiagnostics {
    pub packets_in: AtomicUsize,
    pub packets_malformed: AtomicUsize,
    pub samples_in: AtomicUsize,
    pub samples_overflowed: AtomicUsize,
    pub windows_processed: AtomicUsize,
    pub windows_starved: AtomicUsize,
    pub calibration_windows: AtomicUsize,
    pub feature_faults: AtomicUsize,
    pub classifier_faults: AtomicUsize,
    pub features_displaced: AtomicUsize,
    pub skips: AtomicUsize,
}

impl EngineDiagnostics {
    pub fn reset(&self) {
        for counter in self.counters() {
            counter.store(0, Ordering::Relaxed);
        }
    }

    fn counters(&self) -> [&AtomicUsize; 11] {
        [
            &self.packets_in,
            &self.packets_malformed,
            &self.samples_in,
            &self.samples_overflowed,
            &self.windows_processed,
            &self.windows_starved,
            &self.calibration_windows,
            &self.feature_faults,
            &self.classifier_faults,
            &self.features_displaced,
            &self.skips,
        ]
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            packets_in: self.packets_in.load(Ordering::Relaxed),
            packets_malformed: self.packets_malformed.load(Ordering::Relaxed),
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_overflowed: self.samples_overflowed.load(Ordering::Relaxed),
            windows_processed: self.windows_processed.load(Ordering::Relaxed),
            windows_starved: self.windows_starved.load(Ordering::Relaxed),
            calibration_windows: self.calibration_windows.load(Ordering::Relaxed),
            feature_faults: self.feature_faults.load(Ordering::Relaxed),
            classifier_faults: self.classifier_faults.load(Ordering::Relaxed),
            features_displaced: self.features_displaced.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub packets_in: usize,
    pub packets_malformed: usize,
    pub samples_in: usize,
    pub samples_overflowed: usize,
    pub windows_processed: usize,
    pub windows_starved: usize,
    pub calibration_windows: usize,
    pub feature_faults: usize,
    pub classifier_faults: usize,
    pub features_displaced: usize,
    pub skips: usize,
}

/// All context the extractor needs, passed as one struct so the spawn stays tidy.
pub struct ExtractorContext {
    pub config: EngineConfig,
    pub consumer: SampleConsumer,
    pub running: Arc<AtomicBool>,
    pub calibration: Arc<CalibrationState>,
    pub classifier: ClassifierSlot,
    pub features: FeatureSender,
    /// Samples to jump over, added by the controller and drained here.
    pub skip_requests: Arc<AtomicUsize>,
    /// Mirror of the window cursor for observers. Only this loop writes it.
    pub cursor: Arc<AtomicUsize>,
    pub diagnostics: Arc<EngineDiagnostics>,
}

/// Bytes popped from the ring per `pop_slice` call.
const DRAIN_CHUNK: usize = 4096;

/// Run the extractor until `ctx.running` becomes false.
pub fn run(mut ctx: ExtractorContext) {
    let window_len = ctx.config.window_len;
    let stride = ctx.config.stride;
    info!(window_len, stride, "feature extractor started");

    let mut history = SampleHistory::with_capacity(window_len * 8);
    let mut scratch = vec![0u8; DRAIN_CHUNK];
    let mut cursor = 0usize;
    let mut seq = 0u64;

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        drain_ring(&mut ctx.consumer, &mut history, &mut scratch);

        let skip = ctx.skip_requests.swap(0, Ordering::AcqRel);
        if skip > 0 {
            cursor = cursor.saturating_add(skip);
            ctx.diagnostics.skips.fetch_add(1, Ordering::Relaxed);
            info!(skip, cursor, "window cursor skipped forward");
        }

        match history.window(cursor, window_len) {
            Some(window) => {
                match process_window(
                    window,
                    seq,
                    ctx.config.raw_offset,
                    &ctx.calibration,
                    &ctx.classifier,
                    &ctx.diagnostics,
                ) {
                    Ok(vector) => {
                        debug!(
                            seq,
                            cursor,
                            rms = format_args!("{:.4}", vector.rms),
                            phase = ?vector.phase,
                            "window processed"
                        );
                        if let Delivery::DisplacedOldest(n) = ctx.features.publish(vector) {
                            ctx.diagnostics
                                .features_displaced
                                .fetch_add(n, Ordering::Relaxed);
                        }
                        seq = seq.saturating_add(1);
                    }
                    Err(e) => {
                        ctx.diagnostics.feature_faults.fetch_add(1, Ordering::Relaxed);
                        warn!(cursor, "skipping faulty window: {e}");
                    }
                }
                // Windows are immutable, so a faulty one would fault forever.
                cursor = cursor.saturating_add(stride);
            }
            None => {
                ctx.diagnostics.windows_starved.fetch_add(1, Ordering::Relaxed);
            }
        }

        ctx.cursor.store(cursor, Ordering::Relaxed);
        history.discard_before(cursor);
        std::thread::sleep(ctx.config.extract_interval);
    }

    info!(windows = seq, "feature extractor stopped");
}

fn drain_ring(consumer: &mut SampleConsumer, history: &mut SampleHistory, scratch: &mut [u8]) {
    loop {
        let n = consumer.pop_slice(scratch);
        if n == 0 {
            break;
        }
        history.extend(&scratch[..n]);
    }
}

/// Turn one raw window into a calibrated feature vector.
pub fn process_window(
    window: &[u8],
    seq: u64,
    raw_offset: f32,
    calibration: &CalibrationState,
    classifier: &ClassifierSlot,
    diagnostics: &EngineDiagnostics,
) -> Result<FeatureVector, FeatureError> {
    let features = extract_window(window, raw_offset)?;
    let (rms, phase) = calibration.observe(features.rms_raw);

    diagnostics.windows_processed.fetch_add(1, Ordering::Relaxed);
    if phase == SamplePhase::Calibration {
        diagnostics
            .calibration_windows
            .fetch_add(1, Ordering::Relaxed);
    }

    let mut vector = FeatureVector {
        seq,
        rms,
        rms_raw: features.rms_raw,
        channel_means: features.channel_means,
        phase,
        prediction: None,
    };

    if let Some(handle) = classifier.current() {
        match handle.0.lock().predict(&vector) {
            Ok(prediction) => vector.prediction = prediction,
            Err(e) => {
                diagnostics.classifier_faults.fetch_add(1, Ordering::Relaxed);
                warn!(seq, "classifier failed: {e}");
            }
        }
    }

    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_sample_ring, Producer};
    use crate::channel::{feature_channel, FeatureReceiver};
    use crate::classifier::{ClassifierHandle, GestureClassifier};
    use crate::error::{MyoscopeError, Result};
    use crate::features::RAW_OFFSET;
    use crate::ipc::events::GesturePrediction;
    use approx::assert_relative_eq;
    use std::thread;
    use std::time::{Duration, Instant};

    struct FailingClassifier;

    impl GestureClassifier for FailingClassifier {
        fn predict(&mut self, _features: &FeatureVector) -> Result<Option<GesturePrediction>> {
            Err(MyoscopeError::InvalidInput("model exploded".into()))
        }

        fn reset(&mut self) {}
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            extract_interval: Duration::from_millis(1),
            ..EngineConfig::default()
        }
    }

    fn recv_with_timeout(rx: &FeatureReceiver, timeout: Duration) -> FeatureVector {
        let start = Instant::now();
        loop {
            if let Some(v) = rx.poll() {
                return v;
            }
            if start.elapsed() >= timeout {
                panic!("timed out waiting for feature vector");
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn process_window_zero_references_display_samples() {
        let calibration = CalibrationState::default();
        calibration.set_zero_reference(Some(0.1));
        let diagnostics = EngineDiagnostics::default();

        let v = process_window(
            &[128u8; 400],
            3,
            RAW_OFFSET,
            &calibration,
            &ClassifierSlot::default(),
            &diagnostics,
        )
        .expect("features");

        assert_eq!(v.seq, 3);
        assert_eq!(v.phase, SamplePhase::Display);
        assert_relative_eq!(v.rms, v.rms_raw - 0.1, epsilon = 1e-6);
        assert_eq!(diagnostics.snapshot().calibration_windows, 0);
    }

    #[test]
    fn classifier_failure_is_transient() {
        let calibration = CalibrationState::default();
        let slot = ClassifierSlot::default();
        slot.install(ClassifierHandle::new(FailingClassifier));
        let diagnostics = EngineDiagnostics::default();

        let v = process_window(&[130u8; 400], 0, RAW_OFFSET, &calibration, &slot, &diagnostics)
            .expect("features still produced");
        assert!(v.prediction.is_none());
        assert_eq!(diagnostics.snapshot().classifier_faults, 1);
    }

    #[test]
    fn faulty_windows_are_counted_and_skipped_by_stride() {
        let (mut producer, consumer) = create_sample_ring(1 << 12);
        let (tx, rx) = feature_channel(16);
        let running = Arc::new(AtomicBool::new(true));
        let cursor = Arc::new(AtomicUsize::new(0));
        let diagnostics = Arc::new(EngineDiagnostics::default());

        let ctx = ExtractorContext {
            config: EngineConfig {
                raw_offset: f32::NAN,
                ..fast_config()
            },
            consumer,
            running: Arc::clone(&running),
            calibration: Arc::new(CalibrationState::default()),
            classifier: ClassifierSlot::default(),
            features: tx,
            skip_requests: Arc::new(AtomicUsize::new(0)),
            cursor: Arc::clone(&cursor),
            diagnostics: Arc::clone(&diagnostics),
        };
        let handle = thread::spawn(move || run(ctx));

        // 800 samples hold windows at 0, 200 and 400.
        producer.push_slice(&[125u8; 800]);
        let deadline = Instant::now() + Duration::from_secs(1);
        while cursor.load(Ordering::Relaxed) < 600 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        thread::sleep(Duration::from_millis(20));

        assert!(!handle.is_finished(), "extractor must outlive data faults");
        running.store(false, Ordering::SeqCst);
        handle.join().expect("extractor thread panicked");

        let snap = diagnostics.snapshot();
        assert_eq!(snap.feature_faults, 3);
        assert_eq!(snap.windows_processed, 0);
        assert_eq!(cursor.load(Ordering::Relaxed), 600);
        assert!(rx.poll().is_none());
    }

    #[test]
    fn run_waits_for_a_full_window_then_advances_by_stride() {
        let (mut producer, consumer) = create_sample_ring(1 << 12);
        let (tx, rx) = feature_channel(16);
        let running = Arc::new(AtomicBool::new(true));
        let cursor = Arc::new(AtomicUsize::new(0));
        let diagnostics = Arc::new(EngineDiagnostics::default());

        let ctx = ExtractorContext {
            config: fast_config(),
            consumer,
            running: Arc::clone(&running),
            calibration: Arc::new(CalibrationState::default()),
            classifier: ClassifierSlot::default(),
            features: tx,
            skip_requests: Arc::new(AtomicUsize::new(0)),
            cursor: Arc::clone(&cursor),
            diagnostics: Arc::clone(&diagnostics),
        };
        let handle = thread::spawn(move || run(ctx));

        producer.push_slice(&[125u8; 399]);
        thread::sleep(Duration::from_millis(30));
        assert!(rx.poll().is_none(), "partial window must not be processed");
        assert_eq!(cursor.load(Ordering::Relaxed), 0);

        producer.push_slice(&[125u8; 201]);
        let first = recv_with_timeout(&rx, Duration::from_secs(1));
        let second = recv_with_timeout(&rx, Duration::from_secs(1));
        thread::sleep(Duration::from_millis(20));

        running.store(false, Ordering::SeqCst);
        handle.join().expect("extractor thread panicked");

        assert_eq!((first.seq, second.seq), (0, 1));
        assert!(rx.poll().is_none(), "600 samples hold exactly two windows");
        assert_eq!(cursor.load(Ordering::Relaxed), 400);
        assert!(diagnostics.snapshot().windows_starved > 0);
    }
}
