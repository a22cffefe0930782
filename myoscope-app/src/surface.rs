//! Headless draw surface: summarises frames to the log.

use myoscope_core::{DrawError, DrawSurface, Frame};
use tracing::info;

pub struct LogSurface {
    every: u64,
    frames: u64,
}

impl LogSurface {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            frames: 0,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl DrawSurface for LogSurface {
    fn draw(&mut self, frame: &Frame<'_>) -> Result<(), DrawError> {
        self.frames += 1;
        if frame.tick % self.every != 0 {
            return Ok(());
        }

        let smoothed = frame.marker.map(|(_, y)| y).unwrap_or_default();
        let cue = frame.cue.first().copied().unwrap_or_default();
        let channel_tips: Vec<String> = frame
            .channels
            .iter()
            .map(|c| format!("{:.1}", c.last().copied().unwrap_or_default()))
            .collect();

        match frame.latest.and_then(|v| v.prediction) {
            Some(prediction) => info!(
                tick = frame.tick,
                smoothed = format_args!("{smoothed:.4}"),
                cue = format_args!("{cue:.4}"),
                ylim = ?frame.feedback_ylim,
                channels = %channel_tips.join(" "),
                action = prediction.action_id,
                confidence = format_args!("{:.2}", prediction.confidence),
                "frame"
            ),
            None => info!(
                tick = frame.tick,
                smoothed = format_args!("{smoothed:.4}"),
                cue = format_args!("{cue:.4}"),
                ylim = ?frame.feedback_ylim,
                channels = %channel_tips.join(" "),
                "frame"
            ),
        }
        Ok(())
    }
}
