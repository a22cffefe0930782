//! `SimulatedDevice`: synthetic armband for development and tests.
//!
//! Emits `[seq, payload…]` packets on a named thread at the rate implied by
//! the raw stream config. Each channel carries zero-mean noise around the
//! 8-bit DC offset whose amplitude follows a slow contraction envelope, so
//! calibration and the live display have something realistic to show.

use std::f32::consts::PI;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::device::{DataCallback, DeviceAddress, EmgDevice, NotificationKind, RawStreamConfig};
use crate::error::{MyoscopeError, Result};
use crate::features::{CHANNEL_COUNT, RAW_OFFSET};

#[derive(Debug, Clone)]
pub struct SimulatedDeviceConfig {
    /// Addresses reported by `scan`.
    pub addresses: Vec<DeviceAddress>,
    /// Seed for the noise generator; `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Full rest→contraction→rest cycle length.
    pub contraction_period: Duration,
    /// Peak noise amplitude in ADC units during a contraction.
    pub contraction_amplitude: f32,
    /// Noise amplitude at rest.
    pub rest_amplitude: f32,
}

impl Default for SimulatedDeviceConfig {
    fn default() -> Self {
        Self {
            addresses: vec![DeviceAddress("SIM:00:00:00:00:01".into())],
            seed: None,
            contraction_period: Duration::from_secs(8),
            contraction_amplitude: 60.0,
            rest_amplitude: 3.0,
        }
    }
}

pub struct SimulatedDevice {
    config: SimulatedDeviceConfig,
    connected: Option<DeviceAddress>,
    stream: Option<RawStreamConfig>,
    notifying: bool,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedDevice {
    pub fn new(config: SimulatedDeviceConfig) -> Self {
        Self {
            config,
            connected: None,
            stream: None,
            notifying: false,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(SimulatedDeviceConfig::default())
    }
}

impl EmgDevice for SimulatedDevice {
    fn scan(&mut self, timeout: Duration) -> Result<Vec<DeviceAddress>> {
        debug!(?timeout, "simulated scan");
        Ok(self.config.addresses.clone())
    }

    fn connect(&mut self, address: &DeviceAddress) -> Result<()> {
        if !self.config.addresses.contains(address) {
            return Err(MyoscopeError::Connect {
                address: address.to_string(),
            });
        }
        self.connected = Some(address.clone());
        Ok(())
    }

    fn configure_raw_stream(&mut self, config: &RawStreamConfig) -> Result<()> {
        if self.connected.is_none() {
            return Err(MyoscopeError::NotConnected);
        }
        config.validate()?;
        self.stream = Some(*config);
        Ok(())
    }

    fn set_notification(&mut self, kind: NotificationKind, enabled: bool) -> Result<()> {
        if self.connected.is_none() {
            return Err(MyoscopeError::NotConnected);
        }
        debug!(?kind, enabled, "simulated notification switch");
        self.notifying = enabled;
        Ok(())
    }

    fn start_notification(&mut self, mut on_data: DataCallback) -> Result<()> {
        let stream = self.stream.ok_or_else(|| {
            MyoscopeError::Device("raw stream must be configured before notifications".into())
        })?;
        if !self.notifying {
            return Err(MyoscopeError::Device("EMG raw notifications are disabled".into()));
        }
        if self.worker.is_some() {
            return Err(MyoscopeError::AlreadyRunning);
        }

        let frames_per_packet = stream.packet_length / CHANNEL_COUNT;
        let interval =
            Duration::from_secs_f64(frames_per_packet as f64 / stream.sample_rate as f64);
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let gains: [f32; CHANNEL_COUNT] = std::array::from_fn(|k| 0.4 + 0.6 * ((k % 4) as f32 / 3.0));
        let period_frames = (self.config.contraction_period.as_secs_f32()
            * stream.sample_rate as f32)
            .max(1.0);
        let rest = self.config.rest_amplitude;
        let active = self.config.contraction_amplitude;

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);

        let worker = std::thread::Builder::new()
            .name("simulated-armband".into())
            .spawn(move || {
                let mut seq = 0u8;
                let mut frame = 0u64;
                let mut packet = vec![0u8; stream.packet_length + 1];
                while running.load(Ordering::Relaxed) {
                    packet[0] = seq;
                    for chunk in packet[1..].chunks_exact_mut(CHANNEL_COUNT) {
                        let phase = (frame as f32 % period_frames) / period_frames;
                        let envelope = (PI * phase).sin().powi(2);
                        let amplitude = rest + (active - rest) * envelope;
                        for (k, slot) in chunk.iter_mut().enumerate() {
                            let noise: f32 = rng.gen_range(-1.0..=1.0);
                            let value = RAW_OFFSET + amplitude * gains[k] * noise;
                            *slot = value.round().clamp(0.0, 255.0) as u8;
                        }
                        frame += 1;
                    }
                    on_data(&packet);
                    seq = seq.wrapping_add(1);
                    std::thread::sleep(interval);
                }
            })
            .map_err(MyoscopeError::Io)?;

        self.worker = Some(worker);
        info!(?interval, "simulated notifications started");
        Ok(())
    }

    fn stop_notification(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("simulated notification thread panicked");
            }
        }
        Ok(())
    }
}

impl Drop for SimulatedDevice {
    fn drop(&mut self) {
        let _ = self.stop_notification();
    }
}
