//! Calibration state shared between the session controller and the extractor.
//!
//! ## Consistency
//!
//! Every field is an independent atomic scalar. Writers (controller actions)
//! and the reader (extractor, once per window) never take a lock, so the
//! extractor may observe a half-applied action for one window: e.g. the new
//! baseline multiplier alongside the old baseline. That staleness is bounded
//! by one window and accepted.
//!
//! The zero reference is an explicit `Option`: `None` means every window is
//! a calibration sample, `Some(0.0)` is a legitimate calibrated offset.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::features::RAW_OFFSET;

pub const DEFAULT_BASELINE: f32 = 100.0;
pub const DEFAULT_BASELINE_MULTIPLIER: f32 = 100.0;
pub const DEFAULT_PEAK: f32 = 0.0;
pub const DEFAULT_PEAK_MULTIPLIER: f32 = 0.0;
/// Baseline ceiling seeded when an MVC recording starts.
pub const MVC_BASELINE_SEED: f32 = 10.0;

/// `f32` stored as its bit pattern in an `AtomicU32`.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    pub fn store(&self, value: f32, order: Ordering) {
        self.0.store(value.to_bits(), order);
    }

    /// Store `min(current, value)`; returns the previous value.
    pub fn fetch_min(&self, value: f32, order: Ordering) -> f32 {
        self.fetch_with(order, |current| current.min(value))
    }

    /// Store `max(current, value)`; returns the previous value.
    pub fn fetch_max(&self, value: f32, order: Ordering) -> f32 {
        self.fetch_with(order, |current| current.max(value))
    }

    fn fetch_with(&self, order: Ordering, f: impl Fn(f32) -> f32) -> f32 {
        let prev = self
            .0
            .fetch_update(order, Ordering::Relaxed, |bits| {
                Some(f(f32::from_bits(bits)).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        f32::from_bits(prev)
    }
}

/// How a window's RMS was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplePhase {
    /// No zero reference yet: the window fed the baseline/peak trackers.
    Calibration,
    /// The window was zero-referenced for display.
    Display,
}

/// Point-in-time copy of [`CalibrationState`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationSnapshot {
    pub raw_offset: f32,
    pub baseline: f32,
    pub baseline_multiplier: f32,
    pub peak: f32,
    pub peak_multiplier: f32,
    pub zero_reference: Option<f32>,
}

#[derive(Debug)]
pub struct CalibrationState {
    raw_offset: AtomicF32,
    baseline: AtomicF32,
    baseline_multiplier: AtomicF32,
    peak: AtomicF32,
    peak_multiplier: AtomicF32,
    zero_reference: AtomicF32,
    zero_reference_set: AtomicBool,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self::new(RAW_OFFSET)
    }
}

impl CalibrationState {
    pub fn new(raw_offset: f32) -> Self {
        Self {
            raw_offset: AtomicF32::new(raw_offset),
            baseline: AtomicF32::new(DEFAULT_BASELINE),
            baseline_multiplier: AtomicF32::new(DEFAULT_BASELINE_MULTIPLIER),
            peak: AtomicF32::new(DEFAULT_PEAK),
            peak_multiplier: AtomicF32::new(DEFAULT_PEAK_MULTIPLIER),
            zero_reference: AtomicF32::new(0.0),
            zero_reference_set: AtomicBool::new(false),
        }
    }

    pub fn raw_offset(&self) -> f32 {
        self.raw_offset.load(Ordering::Relaxed)
    }

    pub fn baseline(&self) -> f32 {
        self.baseline.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> f32 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn zero_reference(&self) -> Option<f32> {
        if self.zero_reference_set.load(Ordering::Acquire) {
            Some(self.zero_reference.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    pub fn set_zero_reference(&self, value: Option<f32>) {
        match value {
            Some(v) => {
                self.zero_reference.store(v, Ordering::Relaxed);
                self.zero_reference_set.store(true, Ordering::Release);
            }
            None => self.zero_reference_set.store(false, Ordering::Release),
        }
    }

    pub fn snapshot(&self) -> CalibrationSnapshot {
        CalibrationSnapshot {
            raw_offset: self.raw_offset(),
            baseline: self.baseline(),
            baseline_multiplier: self.baseline_multiplier.load(Ordering::Relaxed),
            peak: self.peak(),
            peak_multiplier: self.peak_multiplier.load(Ordering::Relaxed),
            zero_reference: self.zero_reference(),
        }
    }

    /// Arm the baseline/peak trackers for a maximum voluntary contraction run.
    pub fn begin_mvc(&self) {
        self.peak_multiplier.store(1.0, Ordering::Relaxed);
        self.baseline_multiplier.store(1.0, Ordering::Relaxed);
        self.baseline.store(MVC_BASELINE_SEED, Ordering::Relaxed);
        self.set_zero_reference(None);
    }

    /// Disarm the trackers and return the `(baseline, peak)` they reached.
    pub fn end_mvc(&self) -> (f32, f32) {
        let captured = (self.baseline(), self.peak());
        self.peak_multiplier.store(DEFAULT_PEAK_MULTIPLIER, Ordering::Relaxed);
        self.peak.store(DEFAULT_PEAK, Ordering::Relaxed);
        self.baseline_multiplier
            .store(DEFAULT_BASELINE_MULTIPLIER, Ordering::Relaxed);
        captured
    }

    /// Calibrate one window's summed RMS.
    ///
    /// With a zero reference the window is a display sample; without one it
    /// updates the baseline floor and peak ceiling.
    pub fn observe(&self, rms_raw: f32) -> (f32, SamplePhase) {
        match self.zero_reference() {
            Some(offset) => (rms_raw - offset, SamplePhase::Display),
            None => {
                let bm = self.baseline_multiplier.load(Ordering::Relaxed);
                let pm = self.peak_multiplier.load(Ordering::Relaxed);
                self.baseline.fetch_min(rms_raw * bm, Ordering::Relaxed);
                self.peak.fetch_max(rms_raw * pm, Ordering::Relaxed);
                (rms_raw, SamplePhase::Calibration)
            }
        }
    }
}
