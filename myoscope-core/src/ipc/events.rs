//! Feature and session status events.

use serde::{Deserialize, Serialize};

use crate::calibration::SamplePhase;
use crate::features::CHANNEL_COUNT;

// ---------------------------------------------------------------------------
// Feature events
// ---------------------------------------------------------------------------

/// One calibrated feature vector, produced per extracted window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    /// Monotonically increasing production sequence number.
    pub seq: u64,
    /// Summed RMS after the zero reference was subtracted.
    pub rms: f32,
    /// Summed RMS before calibration.
    pub rms_raw: f32,
    /// Offset-adjusted mean of each channel, in channel order.
    pub channel_means: [f32; CHANNEL_COUNT],
    pub phase: SamplePhase,
    /// Output of the optional gesture classifier.
    pub prediction: Option<GesturePrediction>,
}

/// A classifier's guess for one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GesturePrediction {
    pub action_id: u8,
    /// Confidence in [0.0, 1.0].
    pub confidence: f32,
}

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

/// Emitted whenever the session status changes or an action reports a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Human-readable status line (e.g. "Found 2").
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No armband connected.
    Disconnected,
    /// Device scan in progress.
    Scanning,
    /// Connected, raw stream not running yet.
    Connected,
    /// Raw stream and extractor running.
    Streaming,
    /// Extractor stopped; may be restarted by reconnecting.
    Stopped,
    /// Connection or stream setup failed.
    Error,
}
