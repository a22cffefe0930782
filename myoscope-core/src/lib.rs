//! # myoscope-core
//!
//! Real-time surface-EMG streaming engine for labelled motion collection.
//!
//! ## Architecture
//!
//! ```text
//! Armband → EmgDevice callback → PacketIngest ──► RecordingSink (while recording)
//!                                    │
//!                             SPSC RingBuffer<u8>
//!                                    │
//!                      feature-extractor thread (fixed sleep)
//!                      SampleHistory → window → RMS/means
//!                                    │
//!                        CalibrationState (atomics) ◄── SessionController
//!                                    │
//!                    FeatureChannel (bounded, drop-oldest)
//!                                    │
//!                      Renderer (fixed tick) → RollingDisplayBuffer → DrawSurface
//! ```
//!
//! The device callback never blocks and never allocates per sample. All
//! windowing happens on the extractor thread.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod calibration;
pub mod channel;
pub mod classifier;
pub mod device;
pub mod display;
pub mod engine;
pub mod error;
pub mod features;
pub mod ipc;
pub mod recording;
pub mod session;

// Convenience re-exports for downstream crates
pub use calibration::{CalibrationSnapshot, CalibrationState, SamplePhase};
pub use classifier::{ClassifierHandle, GestureClassifier};
pub use device::{DeviceAddress, EmgDevice, RawStreamConfig};
pub use display::renderer::{DrawError, DrawSurface, Frame, Renderer};
pub use display::{DisplayConfig, DisplayScale};
pub use engine::{AcquisitionEngine, EngineConfig};
pub use error::MyoscopeError;
pub use ipc::events::{FeatureVector, GesturePrediction, SessionStatus, SessionStatusEvent};
pub use session::{SessionConfig, SessionController};

#[cfg(feature = "simulator")]
pub use device::simulated::{SimulatedDevice, SimulatedDeviceConfig};
