//! A pretend sensor for running the whole system without hardware.
//!
//! [`DummySensor`] is a [`Transport`] that streams data frames for a person
//! who walks in, sits down for a while and leaves again, over and over. Line
//! noise can be sprinkled between frames to exercise the resynchronizer, and
//! every configuration command gets a successful acknowledgement.

use crate::command::{
    SensorParameters, ACK_FLAG, CMD_DISABLE_ENGINEERING, CMD_ENABLE_CONFIG,
    CMD_ENABLE_ENGINEERING, CMD_READ_FIRMWARE, CMD_READ_PARAMS, CMD_SET_DISTANCE_PARAMS,
};
use crate::frame::{self, Channel, DecodeResult, FrameError};
use crate::telemetry::{EngineeringData, GateEnergy, GateResolution, TargetReading, TargetStatus};
use crate::transport::{Transport, TransportError};
use log::{debug, trace, warn};
use rand::prelude::*;
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

const REPORT_INTERVAL: Duration = Duration::from_millis(100);

// Seconds into each cycle at which the scene changes.
const ARRIVE: f64 = 20.0;
const SIT_DOWN: f64 = 26.0;
const STAND_UP: f64 = 100.0;
const GONE: f64 = 104.0;
const CYCLE: f64 = 120.0;

const SIMULATED_GATES: u8 = 8;

/// A simulated sensor on a simulated link.
pub struct DummySensor {
    rng: StdRng,
    started: Instant,
    next_report: Instant,
    inbound: VecDeque<u8>,
    noise: f64,
    engineering: bool,
    parameters: SensorParameters,
}

impl DummySensor {
    /// A sensor that starts its scene now.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Like [`DummySensor::new`], but reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let now = Instant::now();
        Self {
            rng,
            started: now,
            next_report: now,
            inbound: VecDeque::new(),
            noise: 0.0,
            engineering: false,
            parameters: SensorParameters::default(),
        }
    }

    /// Probability, per report, of a burst of garbage bytes before it.
    pub fn set_noise(&mut self, probability: f64) {
        self.noise = probability.clamp(0.0, 1.0);
    }

    /// What the scene shows `elapsed` seconds after start.
    pub fn status_at(elapsed: f64) -> TargetStatus {
        let t = elapsed % CYCLE;
        if t < ARRIVE {
            TargetStatus::None
        } else if t < SIT_DOWN {
            TargetStatus::Moving
        } else if t < STAND_UP {
            // Sitting still, fidgeting now and then.
            TargetStatus::Stationary
        } else if t < GONE {
            TargetStatus::Moving
        } else {
            TargetStatus::None
        }
    }

    fn reading(&mut self, status: TargetStatus) -> TargetReading {
        let status = match status {
            TargetStatus::Stationary if self.rng.gen_bool(0.2) => TargetStatus::Both,
            other => other,
        };
        let mut reading = TargetReading::with_status(status);
        if status.is_moving() {
            reading.move_distance_cm = self.rng.gen_range(80..400);
            reading.move_energy = self.rng.gen_range(40..100);
        }
        if status.is_stationary() {
            reading.static_distance_cm = self.rng.gen_range(110..130);
            reading.static_energy = self.rng.gen_range(30..70);
        }
        reading.detection_distance_cm = reading.move_distance_cm.max(reading.static_distance_cm);

        if self.engineering {
            let resolution = GateResolution::Coarse;
            let gates = (0..SIMULATED_GATES)
                .map(|gate| GateEnergy {
                    gate,
                    distance_m: f32::from(gate) * resolution.metres_per_gate(),
                    move_energy: self.rng.gen_range(0..reading.move_energy.max(10)),
                    static_energy: self.rng.gen_range(0..reading.static_energy.max(10)),
                })
                .collect();
            reading.engineering = Some(EngineeringData {
                max_move_gate: self.parameters.max_motion_gate,
                max_static_gate: self.parameters.max_static_gate,
                gates,
            });
        }
        reading
    }

    // Queues every report that is due by now. A reader that fell far behind
    // only gets the most recent second's worth.
    fn pump(&mut self) {
        let now = Instant::now();
        if now.saturating_duration_since(self.next_report) > Duration::from_secs(1) {
            self.next_report = now - Duration::from_secs(1);
        }
        while self.next_report <= now {
            let elapsed = self
                .next_report
                .saturating_duration_since(self.started)
                .as_secs_f64();
            if self.noise > 0.0 && self.rng.gen_bool(self.noise) {
                let len = self.rng.gen_range(1..24);
                for _ in 0..len {
                    let byte = self.rng.gen();
                    self.inbound.push_back(byte);
                }
            }
            let reading = self.reading(Self::status_at(elapsed));
            trace!("Simulated {}", reading.status);
            let framed = frame::encode(Channel::Data, &reading.to_payload());
            self.emit(framed);
            self.next_report += REPORT_INTERVAL;
        }
    }

    fn acknowledge(&mut self, command: u16, data: &[u8]) {
        let mut body = Vec::new();
        match command {
            CMD_ENABLE_CONFIG => body.extend_from_slice(&[0x01, 0x00, 0x40, 0x00]),
            CMD_ENABLE_ENGINEERING => self.engineering = true,
            CMD_DISABLE_ENGINEERING => self.engineering = false,
            CMD_SET_DISTANCE_PARAMS if data.len() >= 18 => {
                self.parameters.max_motion_gate = data[2];
                self.parameters.max_static_gate = data[8];
                self.parameters.no_one_duration_s = u16::from_le_bytes([data[14], data[15]]);
            }
            CMD_READ_PARAMS => {
                let n = usize::from(SIMULATED_GATES) + 1;
                let padded = |values: &[u8]| -> Vec<u8> {
                    (0..n).map(|i| values.get(i).copied().unwrap_or(0)).collect()
                };
                body.extend_from_slice(&[
                    0xAA,
                    SIMULATED_GATES,
                    self.parameters.max_motion_gate,
                    self.parameters.max_static_gate,
                ]);
                body.extend(padded(&self.parameters.motion_sensitivity));
                body.extend(padded(&self.parameters.static_sensitivity));
                body.extend_from_slice(&self.parameters.no_one_duration_s.to_le_bytes());
            }
            CMD_READ_FIRMWARE => {
                body.extend_from_slice(&0x0000u16.to_le_bytes());
                body.extend_from_slice(&0x0102u16.to_le_bytes());
                body.extend_from_slice(&0x2206_2416u32.to_le_bytes());
            }
            _ => {}
        }

        let mut ack = 0u16.to_le_bytes().to_vec();
        ack.extend(body);
        debug!("Simulated ack for command 0x{:04X}", command);
        self.emit(frame::encode_command(command | ACK_FLAG, &ack));
    }

    fn emit(&mut self, framed: Result<Vec<u8>, FrameError>) {
        match framed {
            Ok(bytes) => self.inbound.extend(bytes),
            Err(e) => warn!("Simulated sensor dropped a frame: {}", e),
        }
    }
}

impl Default for DummySensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DummySensor {
    fn bytes_available(&mut self) -> Result<usize, TransportError> {
        self.pump();
        Ok(self.inbound.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.pump();
        let n = self.inbound.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if let DecodeResult::Frame(request, _) = frame::decode(Channel::Command, data) {
            if let Some(command) = request.command_word() {
                let body = request.command_body().to_vec();
                self.acknowledge(command, &body);
            }
        }
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.inbound.clear();
        Ok(())
    }
}
