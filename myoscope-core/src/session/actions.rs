//! Motion catalog and the randomised collection schedule.

use std::collections::VecDeque;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{MyoscopeError, Result};

pub const ACTION_COUNT: u8 = 9;
pub const REST_ACTION_ID: u8 = 9;

const CATALOG: [(&str, &str); ACTION_COUNT as usize] = [
    ("Flexion", "img/Flexion.png"),
    ("Extension", "img/Extension.png"),
    ("Ulnar Deviation", "img/UlnarDeviation.png"),
    ("Radial Deviation", "img/RadialDeviation.png"),
    ("Supination", "img/Supination.png"),
    ("Pronation", "img/Pronation.png"),
    ("Open palm", "img/Open.png"),
    ("Close palm", "img/Close.png"),
    ("Rest", "img/Rest.png"),
];

/// Baseline and peak captured by an MVC run for one motion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionCalibration {
    pub baseline: f32,
    pub peak: f32,
}

impl ActionCalibration {
    pub fn span(&self) -> f32 {
        self.peak - self.baseline
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub id: u8,
    pub label: String,
    pub image_path: String,
    pub calibration: Option<ActionCalibration>,
    /// Repetitions saved so far.
    pub repetitions: u32,
}

/// The fixed, process-wide set of motions. Records are never removed.
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    records: Vec<ActionRecord>,
}

impl Default for ActionCatalog {
    fn default() -> Self {
        let records = CATALOG
            .iter()
            .zip(1u8..)
            .map(|(&(label, image_path), id)| ActionRecord {
                id,
                label: label.to_string(),
                image_path: image_path.to_string(),
                calibration: None,
                repetitions: 0,
            })
            .collect();
        Self { records }
    }
}

impl ActionCatalog {
    pub fn get(&self, id: u8) -> Result<&ActionRecord> {
        id.checked_sub(1)
            .and_then(|i| self.records.get(usize::from(i)))
            .ok_or(MyoscopeError::UnknownAction(id))
    }

    fn get_mut(&mut self, id: u8) -> Result<&mut ActionRecord> {
        id.checked_sub(1)
            .and_then(|i| self.records.get_mut(usize::from(i)))
            .ok_or(MyoscopeError::UnknownAction(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActionRecord> {
        self.records.iter()
    }

    /// Store an MVC result; the motion counts as one repetition in.
    pub fn set_calibration(&mut self, id: u8, calibration: ActionCalibration) -> Result<()> {
        let record = self.get_mut(id)?;
        record.calibration = Some(calibration);
        record.repetitions = 1;
        Ok(())
    }

    /// Returns the new repetition count.
    pub fn increment_repetitions(&mut self, id: u8) -> Result<u32> {
        let record = self.get_mut(id)?;
        record.repetitions += 1;
        Ok(record.repetitions)
    }
}

/// Shuffled list of motion ids, each present `repetitions` times.
#[derive(Debug, Clone)]
pub struct MotionSchedule {
    pending: VecDeque<u8>,
}

impl MotionSchedule {
    /// `seed = None` draws from OS entropy.
    pub fn shuffled(repetitions: usize, seed: Option<u64>) -> Self {
        let mut ids: Vec<u8> = (1..=ACTION_COUNT)
            .cycle()
            .take(usize::from(ACTION_COUNT) * repetitions)
            .collect();
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        ids.shuffle(&mut rng);
        Self {
            pending: ids.into(),
        }
    }

    pub fn pop_next(&mut self) -> Result<u8> {
        self.pending
            .pop_front()
            .ok_or(MyoscopeError::ScheduleExhausted)
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}
