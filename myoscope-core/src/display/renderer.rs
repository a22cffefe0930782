//! Fixed-rate redraw loop.
//!
//! Each tick polls at most one feature vector, updates the rolling buffer and
//! cue, smooths the RMS column and hands a borrowed [`Frame`] to the draw
//! surface. A tick without a new vector redraws the unchanged state.
//!
//! Data faults (`DisplayError`) are logged and counted. A [`DrawError`] from
//! the surface ends the loop.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::channel::FeatureReceiver;
use crate::display::{
    moving_average, CueTrace, DisplayConfig, DisplayScale, RollingDisplayBuffer,
};
use crate::error::Result;
use crate::features::CHANNEL_COUNT;
use crate::ipc::events::FeatureVector;

/// Failure of the draw driver itself. Fatal to the render loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("draw surface failed: {0}")]
pub struct DrawError(pub String);

/// Everything one redraw needs, borrowed from the renderer.
#[derive(Debug)]
pub struct Frame<'a> {
    pub tick: u64,
    /// Tail of the smoothed RMS line.
    pub processed: &'a [f32],
    /// `(x, y)` of the newest smoothed value.
    pub marker: Option<(usize, f32)>,
    pub channels: [&'a [f32]; CHANNEL_COUNT],
    pub cue: &'a [f32],
    pub feedback_ylim: (f32, f32),
    pub channel_ylim: (f32, f32),
    /// The vector consumed this tick, if any.
    pub latest: Option<&'a FeatureVector>,
}

/// A draw driver (plot widget, terminal, log).
pub trait DrawSurface: Send {
    fn draw(&mut self, frame: &Frame<'_>) -> std::result::Result<(), DrawError>;
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A vector was consumed and drawn.
    Updated { seq: u64 },
    /// Nothing pending; previous state redrawn.
    Unchanged,
    /// A vector was consumed but rejected as a data fault.
    Rejected { seq: u64 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub ticks: u64,
    pub vectors_drawn: u64,
    pub data_faults: u64,
    pub overruns: u64,
}

pub struct Renderer<S: DrawSurface> {
    config: DisplayConfig,
    scale: Arc<DisplayScale>,
    features: FeatureReceiver,
    surface: S,
    buffer: RollingDisplayBuffer,
    cue: CueTrace,
    smoothed: Vec<f32>,
    amplitude_generation: u64,
    stats: RendererStats,
}

impl<S: DrawSurface> Renderer<S> {
    pub fn new(
        config: DisplayConfig,
        scale: Arc<DisplayScale>,
        features: FeatureReceiver,
        surface: S,
    ) -> Result<Self> {
        config.validate()?;
        let buffer = RollingDisplayBuffer::new(config.history_len, scale.spacing());
        let cue = CueTrace::flat(config.history_len);
        let mut smoothed = Vec::with_capacity(config.history_len);
        moving_average(buffer.rms(), config.smoothing_window, &mut smoothed);
        // An amplitude set before the renderer exists is picked up on the first tick.
        let amplitude_generation = 0;

        Ok(Self {
            config,
            scale,
            features,
            surface,
            buffer,
            cue,
            smoothed,
            amplitude_generation,
            stats: RendererStats::default(),
        })
    }

    pub fn buffer(&self) -> &RollingDisplayBuffer {
        &self.buffer
    }

    pub fn cue(&self) -> &CueTrace {
        &self.cue
    }

    pub fn smoothed(&self) -> &[f32] {
        &self.smoothed
    }

    pub fn stats(&self) -> RendererStats {
        self.stats
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Run one redraw.
    ///
    /// # Errors
    /// Only a failing draw surface; data faults are absorbed.
    pub fn tick(&mut self) -> std::result::Result<TickOutcome, DrawError> {
        self.stats.ticks += 1;

        let generation = self.scale.generation();
        if generation != self.amplitude_generation {
            self.amplitude_generation = generation;
            self.cue = CueTrace::template(self.scale.amplitude(), self.config.history_len);
        }

        let latest = self.features.poll();
        let outcome = match &latest {
            None => TickOutcome::Unchanged,
            Some(vector) => match self.buffer.push(vector, self.scale.spacing()) {
                Ok(()) => {
                    self.cue.advance();
                    moving_average(
                        self.buffer.rms(),
                        self.config.smoothing_window,
                        &mut self.smoothed,
                    );
                    self.stats.vectors_drawn += 1;
                    TickOutcome::Updated { seq: vector.seq }
                }
                Err(e) => {
                    self.stats.data_faults += 1;
                    warn!("display update skipped: {e}");
                    TickOutcome::Rejected { seq: vector.seq }
                }
            },
        };

        let tail_start = self.smoothed.len().saturating_sub(self.config.processed_len);
        let processed = &self.smoothed[tail_start..];
        let marker = processed.last().map(|&y| (processed.len(), y));

        let mut channels = self.buffer.channels();
        let channels: [&[f32]; CHANNEL_COUNT] =
            std::array::from_fn(|_| channels.next().unwrap_or(&[]));

        let frame = Frame {
            tick: self.stats.ticks,
            processed,
            marker,
            channels,
            cue: self.cue.visible(),
            feedback_ylim: self.scale.feedback_ylim(),
            channel_ylim: self.scale.channel_ylim(),
            latest: latest.as_ref(),
        };
        self.surface.draw(&frame)?;
        Ok(outcome)
    }

    /// Tick at a fixed rate until `running` is cleared or the surface fails.
    ///
    /// Late ticks are not replayed: after an overrun the schedule restarts
    /// from the current instant.
    pub fn run(&mut self, running: &AtomicBool) -> std::result::Result<(), DrawError> {
        let interval = self.config.tick_interval;
        info!(interval_ms = interval.as_millis() as u64, "renderer started");
        let mut next = Instant::now() + interval;

        while running.load(Ordering::Relaxed) {
            if let Err(e) = self.tick() {
                error!("draw surface failed, stopping renderer: {e}");
                return Err(e);
            }

            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
                next += interval;
            } else {
                self.stats.overruns += 1;
                next = now + interval;
            }
        }

        info!(ticks = self.stats.ticks, "renderer stopped");
        Ok(())
    }
}

/// Spawn `renderer.run` on a named thread; returns the renderer when it ends.
pub fn spawn_renderer<S: DrawSurface + 'static>(
    mut renderer: Renderer<S>,
    running: Arc<AtomicBool>,
) -> Result<std::thread::JoinHandle<(Renderer<S>, std::result::Result<(), DrawError>)>> {
    let handle = std::thread::Builder::new()
        .name("renderer".into())
        .spawn(move || {
            let result = renderer.run(&running);
            (renderer, result)
        })?;
    Ok(handle)
}
