//! `StubClassifier`: placeholder backend with no trained model.
//!
//! Picks the channel with the largest absolute mean and maps it onto an
//! action id, so the prediction path can be exercised end-to-end before a
//! real model exists. Windows below the activity threshold are "Rest".

use tracing::debug;

use crate::classifier::GestureClassifier;
use crate::error::Result;
use crate::ipc::events::{FeatureVector, GesturePrediction};
use crate::session::actions::REST_ACTION_ID;

pub struct StubClassifier {
    /// Minimum calibrated RMS for a non-rest prediction.
    activity_threshold: f32,
}

impl StubClassifier {
    pub fn new(activity_threshold: f32) -> Self {
        Self { activity_threshold }
    }
}

impl Default for StubClassifier {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl GestureClassifier for StubClassifier {
    fn predict(&mut self, features: &FeatureVector) -> Result<Option<GesturePrediction>> {
        if features.rms < self.activity_threshold {
            return Ok(Some(GesturePrediction {
                action_id: REST_ACTION_ID,
                confidence: 1.0,
            }));
        }

        let total: f32 = features.channel_means.iter().map(|m| m.abs()).sum();
        let strongest = features
            .channel_means
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()));

        Ok(strongest.and_then(|(channel, mean)| {
            if total <= f32::EPSILON {
                return None;
            }
            Some(GesturePrediction {
                action_id: channel as u8 + 1,
                confidence: (mean.abs() / total).clamp(0.0, 1.0),
            })
        }))
    }

    fn reset(&mut self) {
        debug!("StubClassifier::reset");
    }
}
