//! Simulated puff-logging device.
//!
//! Produces the same MessagePack stream the firmware does: measurement maps
//! with a microsecond timestamp `t`, battery voltage `v` and coil current `i`,
//! plus an occasional `debug` map. The bytes are handed out in randomly sized
//! chunks so downstream code sees realistic fragmentation.
//!
//! # Waveform
//!
//! Idle at ~4.1 V / 0 A, then a heating pulse where the voltage sags under load
//! and the current follows `v / coil_ohms`, then idle again.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use super::ByteSource;
use crate::codec::{encode, Value};
use crate::error::AppResult;

/// Shape of the simulated session.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationProfile {
    /// Total measurement records to emit.
    pub records: usize,
    /// Records before the heating pulse starts.
    pub pulse_start: usize,
    /// Records the pulse lasts.
    pub pulse_len: usize,
    /// Device timestamp step between records, microseconds.
    pub sample_period_us: i64,
    /// Coil resistance.
    pub coil_ohms: f64,
    /// Emit a `debug` record every this many measurements (0 disables).
    pub debug_every: usize,
    /// Largest chunk handed out per poll.
    pub max_chunk: usize,
    /// Delay per poll, emulating the link rate.
    pub pace: Duration,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            records: 2_000,
            pulse_start: 400,
            pulse_len: 1_000,
            sample_period_us: 1_000,
            coil_ohms: 0.5,
            debug_every: 250,
            max_chunk: 256,
            pace: Duration::ZERO,
        }
    }
}

/// Byte source emitting synthetic puff telemetry.
pub struct SimulatedDevice {
    profile: SimulationProfile,
    rng: StdRng,
    boot_us: i64,
    emitted: usize,
    pending: BytesMut,
}

impl SimulatedDevice {
    /// Device with a random seed.
    pub fn new(profile: SimulationProfile) -> Self {
        Self::with_rng(profile, StdRng::from_entropy())
    }

    /// Deterministic device for tests.
    pub fn seeded(profile: SimulationProfile, seed: u64) -> Self {
        Self::with_rng(profile, StdRng::seed_from_u64(seed))
    }

    fn with_rng(profile: SimulationProfile, mut rng: StdRng) -> Self {
        let boot_us = rng.gen_range(1_000_000..10_000_000);
        Self {
            profile,
            rng,
            boot_us,
            emitted: 0,
            pending: BytesMut::new(),
        }
    }

    /// Measurement records generated so far.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    fn next_measurement(&mut self) -> Value {
        let k = self.emitted;
        let p = &self.profile;
        let heating = k >= p.pulse_start && k < p.pulse_start + p.pulse_len;
        let noise: f64 = self.rng.gen_range(-0.01..0.01);
        let (v, i) = if heating {
            let v = 3.6 + noise;
            (v, v / p.coil_ohms)
        } else {
            (4.1 + noise, self.rng.gen_range(0.0..0.02))
        };
        let t = self.boot_us + k as i64 * p.sample_period_us;

        Value::Map(vec![
            (Value::from("t"), Value::Int(t)),
            (Value::from("v"), Value::Float(v)),
            (Value::from("i"), Value::Float(i)),
        ])
    }

    fn refill(&mut self) {
        let want = self.profile.max_chunk.max(1);
        let mut scratch = Vec::new();
        while self.pending.len() < want && self.emitted < self.profile.records {
            scratch.clear();
            let every = self.profile.debug_every;
            if every > 0 && self.emitted > 0 && self.emitted % every == 0 {
                let note = Value::Map(vec![(
                    Value::from("debug"),
                    Value::from(format!("sample {}", self.emitted)),
                )]);
                encode(&note, &mut scratch);
            }
            let record = self.next_measurement();
            encode(&record, &mut scratch);
            self.emitted += 1;
            self.pending.extend_from_slice(&scratch);
        }
    }
}

#[async_trait]
impl ByteSource for SimulatedDevice {
    async fn poll(&mut self) -> AppResult<Option<Bytes>> {
        if !self.profile.pace.is_zero() {
            tokio::time::sleep(self.profile.pace).await;
        }
        self.refill();
        if self.pending.is_empty() {
            return Ok(None);
        }
        let n = self.rng.gen_range(1..=self.pending.len().min(self.profile.max_chunk.max(1)));
        Ok(Some(self.pending.split_to(n).freeze()))
    }

    fn describe(&self) -> String {
        format!("SimulatedDevice({} records)", self.profile.records)
    }
}
