#![cfg(feature = "simulator")]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::{Duration, Instant};

use approx::assert_relative_eq;
use myoscope_core::buffering::{create_sample_ring, Producer};
use myoscope_core::channel::{feature_channel, FeatureReceiver};
use myoscope_core::classifier::ClassifierSlot;
use myoscope_core::display::renderer::{spawn_renderer, DrawError, DrawSurface, Frame, Renderer};
use myoscope_core::display::{DisplayConfig, DisplayScale};
use myoscope_core::engine::extractor::{self, EngineDiagnostics, ExtractorContext};
use myoscope_core::engine::{AcquisitionEngine, EngineConfig};
use myoscope_core::recording::RecordingSink;
use myoscope_core::session::{SessionConfig, SessionController};
use myoscope_core::{
    CalibrationState, FeatureVector, SamplePhase, SimulatedDevice, SimulatedDeviceConfig,
};

fn fast_engine_config() -> EngineConfig {
    EngineConfig {
        extract_interval: Duration::from_millis(1),
        ..EngineConfig::default()
    }
}

fn collect_n(rx: &FeatureReceiver, n: usize, timeout: Duration) -> Vec<FeatureVector> {
    let start = Instant::now();
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        match rx.poll() {
            Some(v) => out.push(v),
            None => {
                if start.elapsed() >= timeout {
                    panic!("timed out after {} of {n} feature vectors", out.len());
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
    }
    out
}

/// Run the extractor over `samples` until `expected` vectors are out.
fn extract_all(
    samples: &[u8],
    calibration: Arc<CalibrationState>,
    expected: usize,
) -> (Vec<FeatureVector>, Arc<EngineDiagnostics>) {
    let (mut producer, consumer) = create_sample_ring(1 << 14);
    producer.push_slice(samples);

    let (tx, rx) = feature_channel(64);
    let running = Arc::new(AtomicBool::new(true));
    let diagnostics = Arc::new(EngineDiagnostics::default());
    let ctx = ExtractorContext {
        config: fast_engine_config(),
        consumer,
        running: Arc::clone(&running),
        calibration,
        classifier: ClassifierSlot::default(),
        features: tx,
        skip_requests: Default::default(),
        cursor: Default::default(),
        diagnostics: Arc::clone(&diagnostics),
    };
    let handle = thread::spawn(move || extractor::run(ctx));

    let vectors = collect_n(&rx, expected, Duration::from_secs(2));
    // A few starved iterations prove nothing else was pending.
    thread::sleep(Duration::from_millis(20));
    running.store(false, Ordering::SeqCst);
    handle.join().expect("extractor thread panicked");
    assert!(rx.poll().is_none(), "more windows than expected");
    (vectors, diagnostics)
}

#[test]
fn constant_input_converges_baseline_in_calibration_mode() {
    let calibration = Arc::new(CalibrationState::default());
    let (vectors, diagnostics) = extract_all(&[128u8; 1600], Arc::clone(&calibration), 7);

    let expected_rms = 8.0 * (7.0 / 255.0);
    for v in &vectors {
        assert_eq!(v.phase, SamplePhase::Calibration);
        assert_relative_eq!(v.rms_raw, expected_rms, epsilon = 1e-5);
        assert_relative_eq!(v.rms, v.rms_raw);
        for mean in v.channel_means {
            assert_relative_eq!(mean, 7.0);
        }
    }

    // Default multiplier 100 scales the floor; it never rises above the seed.
    assert_relative_eq!(calibration.baseline(), expected_rms * 100.0, epsilon = 1e-3);
    assert!(calibration.baseline() <= 100.0);
    assert_eq!(calibration.peak(), 0.0);
    assert_eq!(calibration.zero_reference(), None);
    assert_eq!(diagnostics.snapshot().calibration_windows, 7);
}

#[test]
fn mvc_run_tracks_unscaled_baseline_and_peak() {
    let calibration = Arc::new(CalibrationState::default());
    calibration.begin_mvc();
    extract_all(&[128u8; 1600], Arc::clone(&calibration), 7);

    let expected_rms = 8.0 * (7.0 / 255.0);
    assert_relative_eq!(calibration.baseline(), expected_rms, epsilon = 1e-5);
    assert_relative_eq!(calibration.peak(), expected_rms, epsilon = 1e-5);

    let (baseline, peak) = calibration.end_mvc();
    assert_relative_eq!(peak - baseline, 0.0, epsilon = 1e-6);
}

#[test]
fn calibrated_windows_are_display_samples() {
    let calibration = Arc::new(CalibrationState::default());
    calibration.set_zero_reference(Some(0.0));
    let (vectors, diagnostics) = extract_all(&[128u8; 800], Arc::clone(&calibration), 3);

    assert!(vectors.iter().all(|v| v.phase == SamplePhase::Display));
    assert_eq!(calibration.baseline(), 100.0, "display windows leave trackers alone");
    assert_eq!(diagnostics.snapshot().calibration_windows, 0);
}

#[test]
fn recording_five_packets_writes_five_channel_ordered_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let recorder = Arc::new(RecordingSink::new(dir.path().join("session.txt")));
    let engine = AcquisitionEngine::new(fast_engine_config(), Arc::clone(&recorder)).expect("engine");
    let (mut ingest, _consumer) = engine.open_stream().expect("stream");

    recorder.start().expect("start");
    for seq in 0..5u8 {
        let mut packet = vec![seq];
        packet.extend((0..8u8).map(|k| 121 + k + seq));
        ingest.on_packet(&packet);
    }
    let path = recorder.stop().expect("stop");

    let contents = std::fs::read_to_string(path).expect("read");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 5);
    for (seq, line) in lines.iter().enumerate() {
        let tokens: Vec<u32> = line
            .split_whitespace()
            .map(|t| t.parse().expect("numeric token"))
            .collect();
        let expected: Vec<u32> = (0..8).map(|k| 121 + k + seq as u32).collect();
        assert_eq!(tokens, expected);
    }
}

#[test]
fn window_means_follow_channel_order() {
    let frame: Vec<u8> = (0..8u8).map(|k| 121 + 2 * k).collect();
    let samples: Vec<u8> = frame.iter().copied().cycle().take(400).collect();
    let (vectors, _) = extract_all(&samples, Arc::new(CalibrationState::default()), 1);

    for (k, mean) in vectors[0].channel_means.iter().enumerate() {
        assert_relative_eq!(*mean, 2.0 * k as f32);
    }
}

struct CountingSurface {
    frames: Arc<parking_lot::Mutex<Vec<(usize, Option<u64>)>>>,
}

impl DrawSurface for CountingSurface {
    fn draw(&mut self, frame: &Frame<'_>) -> Result<(), DrawError> {
        self.frames
            .lock()
            .push((frame.processed.len(), frame.latest.map(|v| v.seq)));
        Ok(())
    }
}

#[test]
fn renderer_consumes_extractor_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let recorder = Arc::new(RecordingSink::new(dir.path().join("session.txt")));
    let engine = AcquisitionEngine::new(fast_engine_config(), recorder).expect("engine");
    let (mut ingest, consumer) = engine.open_stream().expect("stream");

    let display_config = DisplayConfig {
        tick_interval: Duration::from_millis(2),
        ..DisplayConfig::default()
    };
    let scale = Arc::new(DisplayScale::from_config(&display_config));
    let frames = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let renderer = Renderer::new(
        display_config,
        scale,
        engine.feature_receiver(),
        CountingSurface {
            frames: Arc::clone(&frames),
        },
    )
    .expect("renderer");

    // 1000 samples: windows at 0, 200, 400, 600.
    let mut packet = vec![0u8; 9];
    packet[1..].fill(130);
    for _ in 0..125 {
        ingest.on_packet(&packet);
    }
    engine.start(consumer).expect("start");

    let running = Arc::new(AtomicBool::new(true));
    let handle = spawn_renderer(renderer, Arc::clone(&running)).expect("spawn");

    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let drawn = frames.lock().iter().filter(|(_, seq)| seq.is_some()).count();
        if drawn == 4 {
            break;
        }
        assert!(Instant::now() < deadline, "renderer drew {drawn} of 4 vectors");
        thread::sleep(Duration::from_millis(5));
    }

    running.store(false, Ordering::SeqCst);
    let (renderer, result) = handle.join().expect("renderer thread panicked");
    engine.stop().expect("stop");

    assert!(result.is_ok());
    assert_eq!(renderer.buffer().len(), 500);
    assert_eq!(renderer.stats().vectors_drawn, 4);
    let seqs: Vec<u64> = frames.lock().iter().filter_map(|(_, s)| *s).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3]);
    assert!(frames.lock().iter().all(|(len, _)| *len == 400));
}

#[test]
fn simulated_session_records_whole_packets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SessionConfig {
        recordings_dir: dir.path().join("recordingfiles"),
        output_root: dir.path().to_path_buf(),
        schedule_seed: Some(9),
        ..SessionConfig::default()
    };
    let device = SimulatedDevice::new(SimulatedDeviceConfig {
        seed: Some(11),
        ..SimulatedDeviceConfig::default()
    });
    let mut controller = SessionController::new(
        config,
        fast_engine_config(),
        Arc::new(DisplayScale::new(0.5, 20.0)),
        Box::new(device),
    )
    .expect("controller");

    let address = controller.scan().expect("scan").remove(0);
    controller.connect_to_device(&address).expect("connect");
    controller.start_record().expect("start record");

    let deadline = Instant::now() + Duration::from_secs(2);
    while controller.engine().recorder().lines_written() < 3 {
        assert!(Instant::now() < deadline, "no packets recorded");
        thread::sleep(Duration::from_millis(10));
    }
    let saved = controller.stop_record(None).expect("stop record");
    controller.shutdown().expect("shutdown");

    assert_eq!(saved, dir.path().join("Subject_1/Shift_0/Motion_1_Rep_0.txt"));
    let contents = std::fs::read_to_string(saved).expect("read");
    assert!(contents.lines().count() >= 3);
    for line in contents.lines() {
        assert_eq!(line.split_whitespace().count(), 128);
    }
    assert_eq!(controller.catalog().get(1).expect("action").repetitions, 1);
}
