//! Lock-free SPSC ring buffer for raw EMG bytes.
//!
//! Uses `ringbuf::HeapRb<u8>`; `push_slice` is wait-free and safe to call from
//! the device notification thread. The extractor drains the consumer half into
//! its own [`history::SampleHistory`].

pub mod history;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by the device notification callback.
pub type SampleProducer = ringbuf::HeapProd<u8>;

/// Consumer half, held by the extractor thread.
pub type SampleConsumer = ringbuf::HeapCons<u8>;

/// Default capacity: 2^20 bytes ≈ 262 s of 8-channel data at 500 Hz.
pub const RING_CAPACITY: usize = 1 << 20;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<u8>::new(capacity.max(1)).split()
}
