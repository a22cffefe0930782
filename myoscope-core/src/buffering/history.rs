//! Append-only sample history with index-stable windows.
//!
//! Every byte that leaves the ring is appended here and addressed by its
//! logical arrival index for the rest of the session. A written slot is never
//! modified. Prefixes the window cursor has moved past may be compacted away;
//! compaction only moves the `base` index forward, so indices stay stable.

/// Extractor-owned, append-only sample store.
#[derive(Debug, Default)]
pub struct SampleHistory {
    /// Logical index of `data[0]`.
    base: usize,
    data: Vec<u8>,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            base: 0,
            data: Vec::with_capacity(capacity),
        }
    }

    /// Append newly arrived samples.
    pub fn extend(&mut self, samples: &[u8]) {
        self.data.extend_from_slice(samples);
    }

    /// Logical index one past the newest sample.
    pub fn end(&self) -> usize {
        self.base + self.data.len()
    }

    /// Logical index of the oldest retained sample.
    pub fn base(&self) -> usize {
        self.base
    }

    /// Number of samples available from `start` onwards.
    pub fn available_from(&self, start: usize) -> usize {
        self.end().saturating_sub(start)
    }

    /// The window `[start, start + len)`, or `None` if it is not fully
    /// available yet (or has already been compacted away).
    pub fn window(&self, start: usize, len: usize) -> Option<&[u8]> {
        if start < self.base {
            return None;
        }
        let offset = start - self.base;
        let stop = offset.checked_add(len)?;
        self.data.get(offset..stop)
    }

    /// Drop retained samples before `index`.
    ///
    /// The backing vector is only shifted once at least half of it is dead,
    /// keeping the amortised cost per appended sample constant.
    pub fn discard_before(&mut self, index: usize) {
        let index = index.min(self.end());
        if index <= self.base {
            return;
        }
        let dead = index - self.base;
        if dead * 2 >= self.data.len() && dead > 0 {
            self.data.drain(..dead);
            self.base = index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(len: usize) -> SampleHistory {
        let mut history = SampleHistory::new();
        let samples: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        history.extend(&samples);
        history
    }

    #[test]
    fn window_requires_full_length() {
        let history = filled(399);
        assert!(history.window(0, 400).is_none());
        assert_eq!(history.window(0, 399).map(<[u8]>::len), Some(399));
    }

    #[test]
    fn successive_windows_share_window_minus_stride_samples() {
        let history = filled(2_000);
        let (w, s) = (400, 200);
        let mut cursor = 0;
        while let (Some(a), Some(b)) = (history.window(cursor, w), history.window(cursor + s, w)) {
            assert_eq!(&a[s..], &b[..w - s]);
            cursor += s;
        }
        assert_eq!(cursor, 1_600);
    }

    #[test]
    fn compaction_keeps_logical_indices_stable() {
        let mut history = filled(1_000);
        let before = history.window(600, 100).map(<[u8]>::to_vec);

        history.discard_before(600);
        assert_eq!(history.base(), 600);
        assert_eq!(history.end(), 1_000);
        assert_eq!(history.window(600, 100).map(<[u8]>::to_vec), before);
        assert!(history.window(599, 10).is_none());
    }

    #[test]
    fn compaction_is_deferred_until_half_dead() {
        let mut history = filled(1_000);
        history.discard_before(100);
        assert_eq!(history.base(), 0);
        assert!(history.window(0, 10).is_some());
    }

    #[test]
    fn discard_past_end_is_clamped() {
        let mut history = filled(100);
        history.discard_before(5_000);
        assert_eq!(history.base(), 100);
        assert_eq!(history.available_from(100), 0);

        history.extend(&[1, 2, 3]);
        assert_eq!(history.window(100, 3), Some(&[1u8, 2, 3][..]));
    }
}
