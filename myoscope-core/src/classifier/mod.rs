//! Gesture classifier hook.
//!
//! The `GestureClassifier` trait decouples the extractor from any concrete
//! model. A classifier is optional: when none is installed the extractor
//! publishes feature vectors without a prediction.
//!
//! `&mut self` on `predict` lets implementations keep state (smoothing,
//! hysteresis). All calls are serialised through `ClassifierHandle`'s
//! `parking_lot::Mutex`.

pub mod stub;

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::ipc::events::{FeatureVector, GesturePrediction};

/// Contract for gesture classification backends.
pub trait GestureClassifier: Send + 'static {
    /// Classify one feature vector. `Ok(None)` means "no confident guess".
    ///
    /// # Errors
    /// Any error is treated as a transient data fault by the extractor.
    fn predict(&mut self, features: &FeatureVector) -> Result<Option<GesturePrediction>>;

    /// Reset internal state (e.g. when the session returns to collection).
    fn reset(&mut self);
}

/// Thread-safe reference-counted handle to any `GestureClassifier` implementor.
#[derive(Clone)]
pub struct ClassifierHandle(pub Arc<Mutex<dyn GestureClassifier>>);

impl ClassifierHandle {
    pub fn new<C: GestureClassifier>(classifier: C) -> Self {
        Self(Arc::new(Mutex::new(classifier)))
    }
}

impl std::fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierHandle").finish_non_exhaustive()
    }
}

/// Slot shared by the controller (writer) and extractor (reader).
#[derive(Debug, Clone, Default)]
pub struct ClassifierSlot(Arc<RwLock<Option<ClassifierHandle>>>);

impl ClassifierSlot {
    pub fn install(&self, handle: ClassifierHandle) {
        *self.0.write() = Some(handle);
    }

    /// Remove and reset the installed classifier, if any.
    pub fn clear(&self) {
        if let Some(handle) = self.0.write().take() {
            handle.0.lock().reset();
        }
    }

    pub fn is_installed(&self) -> bool {
        self.0.read().is_some()
    }

    pub fn current(&self) -> Option<ClassifierHandle> {
        self.0.read().clone()
    }
}
