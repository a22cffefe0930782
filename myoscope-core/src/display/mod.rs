//! Rolling strip-chart state: the stacked channel buffer, the operator cue
//! trace and the shared display scale.
//!
//! Column 0 of the display buffer is the calibrated RMS trace; columns 1..=8
//! are the channel means, each shifted down by `spacing · k` so the channels
//! stack without overlapping.

pub mod renderer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;

use crate::calibration::AtomicF32;
use crate::error::{MyoscopeError, Result};
use crate::features::CHANNEL_COUNT;
use crate::ipc::events::FeatureVector;

/// RMS trace plus one column per channel.
pub const DISPLAY_COLUMNS: usize = CHANNEL_COUNT + 1;

/// Cue template segments, in display ticks (20 ticks ≈ 1 s).
pub const CUE_LEAD_IN: usize = 540;
pub const CUE_RAMP: usize = 40;
pub const CUE_HOLD: usize = 200;

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Samples kept per column. Default: 500.
    pub history_len: usize,
    /// Moving-average width for the processed RMS line. Default: 15.
    pub smoothing_window: usize,
    /// Smoothed points drawn; the marker sits just past them. Default: 400.
    pub processed_len: usize,
    /// Redraw period. Default: 50 ms.
    pub tick_interval: Duration,
    /// Cue amplitude before any calibration. Default: 0.5.
    pub initial_amplitude: f32,
    /// Vertical distance between stacked channels. Default: 20.
    pub channel_spacing: f32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            history_len: 500,
            smoothing_window: 15,
            processed_len: 400,
            tick_interval: Duration::from_millis(50),
            initial_amplitude: 0.5,
            channel_spacing: 20.0,
        }
    }
}

impl DisplayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.smoothing_window == 0 || self.smoothing_window > self.history_len {
            return Err(MyoscopeError::InvalidConfig(format!(
                "smoothing window {} must be in 1..={}",
                self.smoothing_window, self.history_len
            )));
        }
        let smoothed_len = self.history_len - self.smoothing_window + 1;
        if self.processed_len == 0 || self.processed_len > smoothed_len {
            return Err(MyoscopeError::InvalidConfig(format!(
                "processed_len {} must be in 1..={smoothed_len}",
                self.processed_len
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(MyoscopeError::InvalidConfig("tick_interval must be > 0".into()));
        }
        if !self.initial_amplitude.is_finite() || !self.channel_spacing.is_finite() {
            return Err(MyoscopeError::InvalidConfig(
                "display amplitude and spacing must be finite".into(),
            ));
        }
        Ok(())
    }
}

/// Display parameters written by controller actions and read by the renderer.
///
/// Every amplitude write bumps `generation`, which tells the renderer to
/// rebuild the cue trace even when the value did not change.
#[derive(Debug)]
pub struct DisplayScale {
    amplitude: AtomicF32,
    spacing: AtomicF32,
    generation: AtomicU64,
}

impl DisplayScale {
    pub fn new(amplitude: f32, spacing: f32) -> Self {
        Self {
            amplitude: AtomicF32::new(amplitude),
            spacing: AtomicF32::new(spacing),
            generation: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &DisplayConfig) -> Self {
        Self::new(config.initial_amplitude, config.channel_spacing)
    }

    pub fn amplitude(&self) -> f32 {
        self.amplitude.load(Ordering::Relaxed)
    }

    pub fn spacing(&self) -> f32 {
        self.spacing.load(Ordering::Relaxed)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn set_amplitude(&self, amplitude: f32) {
        self.amplitude.store(amplitude, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn set_spacing(&self, spacing: f32) {
        self.spacing.store(spacing, Ordering::Relaxed);
    }

    /// Vertical limits of the feedback (RMS) axis.
    pub fn feedback_ylim(&self) -> (f32, f32) {
        (-0.01, self.amplitude() * 2.0)
    }

    /// Vertical limits of the stacked channel axis.
    pub fn channel_ylim(&self) -> (f32, f32) {
        (-self.spacing() * DISPLAY_COLUMNS as f32, 0.0)
    }
}

/// Data faults while updating the display. Logged per tick, never fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DisplayError {
    #[error("feature vector {seq} contains non-finite values")]
    NonFinite { seq: u64 },
}

/// Fixed-length stacked history, shifted left and appended once per vector.
#[derive(Debug, Clone)]
pub struct RollingDisplayBuffer {
    columns: [Vec<f32>; DISPLAY_COLUMNS],
}

impl RollingDisplayBuffer {
    /// Every column starts flat at its own stacking offset.
    pub fn new(len: usize, spacing: f32) -> Self {
        Self {
            columns: std::array::from_fn(|k| vec![-spacing * k as f32; len]),
        }
    }

    pub fn len(&self) -> usize {
        self.columns[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns[0].is_empty()
    }

    pub fn column(&self, k: usize) -> &[f32] {
        &self.columns[k]
    }

    pub fn rms(&self) -> &[f32] {
        &self.columns[0]
    }

    /// Channel columns 1..=8, in channel order.
    pub fn channels(&self) -> impl Iterator<Item = &[f32]> {
        self.columns[1..].iter().map(Vec::as_slice)
    }

    /// Drop the oldest row and append `vector`, stacked with `spacing`.
    pub fn push(&mut self, vector: &FeatureVector, spacing: f32) -> std::result::Result<(), DisplayError> {
        let finite = vector.rms.is_finite() && vector.channel_means.iter().all(|m| m.is_finite());
        if !finite {
            return Err(DisplayError::NonFinite { seq: vector.seq });
        }

        for (k, column) in self.columns.iter_mut().enumerate() {
            let value = if k == 0 {
                vector.rms
            } else {
                vector.channel_means[k - 1]
            };
            if let Some(last) = shift_left(column) {
                *last = value - spacing * k as f32;
            }
        }
        Ok(())
    }
}

fn shift_left(column: &mut [f32]) -> Option<&mut f32> {
    if column.is_empty() {
        return None;
    }
    column.rotate_left(1);
    column.last_mut()
}

/// The guided waveform the operator tries to follow.
///
/// Rotates circularly one slot per consumed feature vector; only the first
/// `visible` slots are drawn.
#[derive(Debug, Clone)]
pub struct CueTrace {
    samples: Vec<f32>,
    visible: usize,
}

impl CueTrace {
    /// A flat cue, shown before any amplitude is set.
    pub fn flat(visible: usize) -> Self {
        Self {
            samples: vec![0.0; visible],
            visible,
        }
    }

    /// Rest, ramp up, hold, ramp down.
    pub fn template(amplitude: f32, visible: usize) -> Self {
        let mut samples = Vec::with_capacity(CUE_LEAD_IN + 2 * CUE_RAMP + CUE_HOLD);
        samples.resize(CUE_LEAD_IN, 0.0);
        samples.extend(linspace(0.0, amplitude, CUE_RAMP));
        samples.extend(std::iter::repeat(amplitude).take(CUE_HOLD));
        samples.extend(linspace(amplitude, 0.0, CUE_RAMP));
        Self { samples, visible }
    }

    pub fn advance(&mut self) {
        if !self.samples.is_empty() {
            self.samples.rotate_left(1);
        }
    }

    pub fn visible(&self) -> &[f32] {
        &self.samples[..self.visible.min(self.samples.len())]
    }

    pub fn period(&self) -> usize {
        self.samples.len()
    }
}

/// `n` evenly spaced values from `start` to `end`, both inclusive.
fn linspace(start: f32, end: f32, n: usize) -> impl Iterator<Item = f32> {
    let step = if n > 1 {
        (end - start) / (n - 1) as f32
    } else {
        0.0
    };
    (0..n).map(move |i| if i + 1 == n { end } else { start + step * i as f32 })
}

/// Valid-mode moving average: `values.len() - window + 1` points.
///
/// Uses a running sum, so each output costs O(1).
pub fn moving_average(values: &[f32], window: usize, out: &mut Vec<f32>) {
    out.clear();
    if window == 0 || values.len() < window {
        return;
    }
    let mut sum: f64 = values[..window].iter().map(|&v| f64::from(v)).sum();
    out.push((sum / window as f64) as f32);
    for i in window..values.len() {
        sum += f64::from(values[i]) - f64::from(values[i - window]);
        out.push((sum / window as f64) as f32);
    }
}
