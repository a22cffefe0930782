//! Per-window feature extraction.
//!
//! ## Algorithm
//!
//! 1. Split the flat window into [`CHANNEL_COUNT`] channels; channel `k` is
//!    every 8th byte starting at offset `k`.
//! 2. Subtract the raw DC offset from every sample.
//! 3. Mean of each offset-adjusted channel.
//! 4. RMS of each channel after normalising by [`FULL_SCALE`].
//! 5. Sum the per-channel RMS values into one scalar.

use thiserror::Error;

/// Number of interleaved channels delivered by the armband.
pub const CHANNEL_COUNT: usize = 8;

/// Raw DC offset of the 8-bit ADC stream.
pub const RAW_OFFSET: f32 = 121.0;

/// Normalisation divisor for 8-bit samples.
pub const FULL_SCALE: f32 = 255.0;

/// Data faults raised while turning a window into features.
///
/// These are transient: the extractor logs them and keeps looping.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("empty window")]
    EmptyWindow,

    #[error("window of {len} samples is not a multiple of {channels} channels")]
    Misaligned { len: usize, channels: usize },

    #[error("non-finite feature value")]
    NonFinite,
}

/// Uncalibrated features of one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowFeatures {
    /// Sum of the per-channel RMS values.
    pub rms_raw: f32,
    pub channel_rms: [f32; CHANNEL_COUNT],
    /// Offset-adjusted mean of each channel, in raw ADC units.
    pub channel_means: [f32; CHANNEL_COUNT],
}

/// Split a channel-interleaved buffer into one sequence per channel.
///
/// A trailing partial frame is ignored.
pub fn deinterleave<T: Copy>(flat: &[T]) -> [Vec<T>; CHANNEL_COUNT] {
    let frames = flat.len() / CHANNEL_COUNT;
    let mut channels: [Vec<T>; CHANNEL_COUNT] =
        std::array::from_fn(|_| Vec::with_capacity(frames));
    for frame in flat.chunks_exact(CHANNEL_COUNT) {
        for (channel, &sample) in channels.iter_mut().zip(frame) {
            channel.push(sample);
        }
    }
    channels
}

/// Root-mean-square of a sample slice. Empty input yields `0.0`.
pub fn rms_formula(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

fn mean(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f32>() / samples.len() as f32
}

/// Compute the features of one raw window.
pub fn extract_window(window: &[u8], raw_offset: f32) -> Result<WindowFeatures, FeatureError> {
    if window.is_empty() {
        return Err(FeatureError::EmptyWindow);
    }
    if window.len() % CHANNEL_COUNT != 0 {
        return Err(FeatureError::Misaligned {
            len: window.len(),
            channels: CHANNEL_COUNT,
        });
    }

    let mut channel_rms = [0f32; CHANNEL_COUNT];
    let mut channel_means = [0f32; CHANNEL_COUNT];
    let mut normalized = Vec::with_capacity(window.len() / CHANNEL_COUNT);

    for (k, channel) in deinterleave(window).iter().enumerate() {
        let adjusted: Vec<f32> = channel.iter().map(|&v| v as f32 - raw_offset).collect();
        channel_means[k] = mean(&adjusted);

        normalized.clear();
        normalized.extend(adjusted.iter().map(|v| v / FULL_SCALE));
        channel_rms[k] = rms_formula(&normalized);
    }

    let rms_raw: f32 = channel_rms.iter().sum();
    if !rms_raw.is_finite() || channel_means.iter().any(|m| !m.is_finite()) {
        return Err(FeatureError::NonFinite);
    }

    Ok(WindowFeatures {
        rms_raw,
        channel_rms,
        channel_means,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn deinterleave_recovers_each_channel_at_stride_eight() {
        let n = 50;
        let flat: Vec<u16> = (0..(n * CHANNEL_COUNT) as u16).collect();
        let channels = deinterleave(&flat);

        for (channel, samples) in channels.iter().enumerate() {
            assert_eq!(samples.len(), n);
            for (k, &value) in samples.iter().enumerate() {
                assert_eq!(value as usize, CHANNEL_COUNT * k + channel);
            }
        }
    }

    #[test]
    fn deinterleave_drops_trailing_partial_frame() {
        let flat = [1u8; 8 * 3 + 5];
        let channels = deinterleave(&flat);
        assert!(channels.iter().all(|c| c.len() == 3));
    }

    #[test]
    fn rms_of_zero_input_is_exactly_zero() {
        assert_eq!(rms_formula(&[0.0; 64]), 0.0);
        assert_eq!(rms_formula(&[]), 0.0);
    }

    #[test]
    fn rms_of_constant_input_equals_the_constant() {
        for v in [0.02745_f32, 0.5, 1.0, 3.25] {
            assert_relative_eq!(rms_formula(&[v; 50]), v, epsilon = 1e-6);
        }
    }

    #[test]
    fn offset_only_window_has_zero_features() {
        let window = [RAW_OFFSET as u8; 400];
        let features = extract_window(&window, RAW_OFFSET).expect("valid window");
        assert_eq!(features.rms_raw, 0.0);
        assert!(features.channel_means.iter().all(|&m| m == 0.0));
    }

    #[test]
    fn constant_window_features_match_closed_form() {
        let window = [128u8; 400];
        let features = extract_window(&window, RAW_OFFSET).expect("valid window");
        let per_channel = 7.0 / FULL_SCALE;

        for k in 0..CHANNEL_COUNT {
            assert_relative_eq!(features.channel_means[k], 7.0, epsilon = 1e-5);
            assert_relative_eq!(features.channel_rms[k], per_channel, epsilon = 1e-6);
        }
        assert_relative_eq!(features.rms_raw, 8.0 * per_channel, epsilon = 1e-5);
    }

    #[test]
    fn channel_means_follow_interleave_order() {
        let window: Vec<u8> = (0..400).map(|i| 121 + (i % CHANNEL_COUNT) as u8).collect();
        let features = extract_window(&window, RAW_OFFSET).expect("valid window");
        for (k, &m) in features.channel_means.iter().enumerate() {
            assert_relative_eq!(m, k as f32, epsilon = 1e-5);
        }
    }

    #[test]
    fn malformed_windows_are_data_faults() {
        assert_eq!(extract_window(&[], RAW_OFFSET), Err(FeatureError::EmptyWindow));
        assert_eq!(
            extract_window(&[0u8; 13], RAW_OFFSET),
            Err(FeatureError::Misaligned {
                len: 13,
                channels: CHANNEL_COUNT
            })
        );
        assert_eq!(
            extract_window(&[0u8; 16], f32::NAN),
            Err(FeatureError::NonFinite)
        );
    }
}
