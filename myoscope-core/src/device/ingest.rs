//! Device packet ingest.
//!
//! Runs on the driver's notification thread. It must not block on the
//! extractor: samples go into the SPSC ring with the wait-free `push_slice`,
//! and overflow is dropped with a warning. Only whole frames are queued, so a
//! full ring never leaves the stream misaligned across channels. The only lock taken is the
//! recording writer's, and only while a recording is active.

use std::sync::{atomic::Ordering, Arc};

use tracing::warn;

use crate::buffering::{Observer, Producer, SampleProducer};
use crate::device::DataCallback;
use crate::engine::extractor::EngineDiagnostics;
use crate::features::CHANNEL_COUNT;
use crate::recording::RecordingSink;

/// Outcome of one packet, mostly for tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// All payload samples were queued.
    Accepted(usize),
    /// Some samples did not fit in the ring.
    Overflowed { written: usize, dropped: usize },
    /// Header-only or misaligned packet.
    Malformed,
}

pub struct PacketIngest {
    producer: SampleProducer,
    recorder: Arc<RecordingSink>,
    diagnostics: Arc<EngineDiagnostics>,
}

impl PacketIngest {
    pub fn new(
        producer: SampleProducer,
        recorder: Arc<RecordingSink>,
        diagnostics: Arc<EngineDiagnostics>,
    ) -> Self {
        Self {
            producer,
            recorder,
            diagnostics,
        }
    }

    /// Handle one packet; `packet[0]` is the sequence/header byte.
    pub fn on_packet(&mut self, packet: &[u8]) -> IngestOutcome {
        self.diagnostics.packets_in.fetch_add(1, Ordering::Relaxed);

        let payload = match packet.split_first() {
            Some((_, payload)) if !payload.is_empty() && payload.len() % CHANNEL_COUNT == 0 => {
                payload
            }
            _ => {
                self.diagnostics
                    .packets_malformed
                    .fetch_add(1, Ordering::Relaxed);
                warn!(len = packet.len(), "dropping malformed packet");
                return IngestOutcome::Malformed;
            }
        };

        if let Err(e) = self.recorder.append_packet(payload) {
            warn!("failed to record packet: {e}");
        }

        let whole_frames = self.producer.vacant_len() / CHANNEL_COUNT * CHANNEL_COUNT;
        let fit = whole_frames.min(payload.len());
        let written = self.producer.push_slice(&payload[..fit]);
        self.diagnostics
            .samples_in
            .fetch_add(written, Ordering::Relaxed);
        if written < payload.len() {
            let dropped = payload.len() - written;
            self.diagnostics
                .samples_overflowed
                .fetch_add(dropped, Ordering::Relaxed);
            warn!("sample ring full: dropped {dropped} samples");
            return IngestOutcome::Overflowed { written, dropped };
        }
        IngestOutcome::Accepted(written)
    }

    pub fn into_callback(mut self) -> DataCallback {
        Box::new(move |packet: &[u8]| {
            self.on_packet(packet);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::{create_sample_ring, Consumer, Observer};

    fn ingest(capacity: usize) -> (PacketIngest, crate::buffering::SampleConsumer, Arc<EngineDiagnostics>) {
        let (producer, consumer) = create_sample_ring(capacity);
        let diagnostics = Arc::new(EngineDiagnostics::default());
        let recorder = Arc::new(RecordingSink::new(std::env::temp_dir().join("unused.txt")));
        (
            PacketIngest::new(producer, recorder, Arc::clone(&diagnostics)),
            consumer,
            diagnostics,
        )
    }

    #[test]
    fn strips_header_byte() {
        let (mut ingest, mut consumer, _) = ingest(64);
        let packet: Vec<u8> = std::iter::once(0xAA).chain(1..=16).collect();
        assert_eq!(ingest.on_packet(&packet), IngestOutcome::Accepted(16));

        let mut out = [0u8; 32];
        let n = consumer.pop_slice(&mut out);
        assert_eq!(&out[..n], &(1..=16).collect::<Vec<u8>>()[..]);
    }

    #[test]
    fn malformed_packets_are_counted_and_dropped() {
        let (mut ingest, _consumer, diagnostics) = ingest(64);
        assert_eq!(ingest.on_packet(&[]), IngestOutcome::Malformed);
        assert_eq!(ingest.on_packet(&[1]), IngestOutcome::Malformed);
        assert_eq!(ingest.on_packet(&[1, 2, 3]), IngestOutcome::Malformed);

        let snap = diagnostics.snapshot();
        assert_eq!(snap.packets_in, 3);
        assert_eq!(snap.packets_malformed, 3);
        assert_eq!(snap.samples_in, 0);
    }

    #[test]
    fn full_ring_drops_whole_frames_without_blocking() {
        let (mut ingest, consumer, diagnostics) = ingest(12);
        let packet = [0u8; 17];
        assert_eq!(
            ingest.on_packet(&packet),
            IngestOutcome::Overflowed {
                written: 8,
                dropped: 8
            }
        );
        assert_eq!(consumer.occupied_len() % CHANNEL_COUNT, 0);
        assert_eq!(diagnostics.snapshot().samples_overflowed, 8);
    }

    #[test]
    fn overflow_keeps_channel_alignment() {
        let (mut ingest, mut consumer, _) = ingest(12);
        let packet: Vec<u8> = std::iter::once(0xAA).chain(0..8).collect();

        assert_eq!(ingest.on_packet(&packet), IngestOutcome::Accepted(8));
        assert_eq!(
            ingest.on_packet(&packet),
            IngestOutcome::Overflowed {
                written: 0,
                dropped: 8
            }
        );

        let mut stream = Vec::new();
        let mut out = [0u8; 32];
        let n = consumer.pop_slice(&mut out);
        stream.extend_from_slice(&out[..n]);

        assert_eq!(ingest.on_packet(&packet), IngestOutcome::Accepted(8));
        let n = consumer.pop_slice(&mut out);
        stream.extend_from_slice(&out[..n]);

        assert_eq!(stream.len() % CHANNEL_COUNT, 0);
        for frame in stream.chunks_exact(CHANNEL_COUNT) {
            assert_eq!(frame, &[0, 1, 2, 3, 4, 5, 6, 7]);
        }
    }
}
