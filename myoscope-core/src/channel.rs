//! Bounded feature hand-off from the extractor to the renderer.
//!
//! The producer never blocks: when the channel is full the oldest pending
//! vector is displaced to make room. The sender keeps its own receiver clone
//! for that purpose, which also means the channel never reports a
//! disconnected consumer.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};

use crate::ipc::events::FeatureVector;

/// Default number of feature vectors held before the oldest is displaced.
pub const FEATURE_CHANNEL_CAP: usize = 64;

/// Result of a non-blocking publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queued after displacing this many older vectors.
    DisplacedOldest(usize),
}

#[derive(Clone)]
pub struct FeatureSender {
    tx: Sender<FeatureVector>,
    overflow: Receiver<FeatureVector>,
}

#[derive(Clone)]
pub struct FeatureReceiver {
    rx: Receiver<FeatureVector>,
}

/// Create a bounded drop-oldest feature channel.
pub fn feature_channel(capacity: usize) -> (FeatureSender, FeatureReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    (
        FeatureSender {
            tx,
            overflow: rx.clone(),
        },
        FeatureReceiver { rx },
    )
}

impl FeatureSender {
    pub fn publish(&self, mut vector: FeatureVector) -> Delivery {
        let mut displaced = 0;
        loop {
            match self.tx.try_send(vector) {
                Ok(()) => {
                    return if displaced == 0 {
                        Delivery::Queued
                    } else {
                        Delivery::DisplacedOldest(displaced)
                    };
                }
                Err(TrySendError::Full(v)) | Err(TrySendError::Disconnected(v)) => {
                    if self.overflow.try_recv().is_ok() {
                        displaced += 1;
                    }
                    vector = v;
                }
            }
        }
    }
}

impl FeatureReceiver {
    /// Take the oldest pending vector without blocking.
    pub fn poll(&self) -> Option<FeatureVector> {
        match self.rx.try_recv() {
            Ok(v) => Some(v),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl std::fmt::Debug for FeatureSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureSender")
            .field("pending", &self.tx.len())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for FeatureReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureReceiver")
            .field("pending", &self.rx.len())
            .finish()
    }
}
