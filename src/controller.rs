//! The control loop: presence in, music and speaker power out.

use crate::actuator::{Audio, Relay};
use crate::presence::{FusionConfig, PresenceFusion, PresenceVerdict};
use crate::sensor_reader::SharedSensorState;
use crate::telemetry::TargetReading;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::{
    sync::{mpsc, Arc},
    time::{Duration, Instant},
};

/// Timing of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Seconds between presence checks.
    pub check_interval_s: f64,
    /// Seconds without robust presence before the speaker is switched off.
    pub relay_off_delay_s: f64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            check_interval_s: 1.0,
            relay_off_delay_s: 15.0 * 60.0,
        }
    }
}

impl ControlConfig {
    /// [`ControlConfig::check_interval_s`] as a [`Duration`].
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.check_interval_s.max(0.0))
    }

    /// [`ControlConfig::relay_off_delay_s`] as a [`Duration`].
    pub fn relay_off_delay(&self) -> Duration {
        Duration::from_secs_f64(self.relay_off_delay_s.max(0.0))
    }
}

/// Drives the actuators from fused presence.
///
/// Music follows robust presence directly. The relay is switched on with the
/// music but only switched off once presence has been gone for the whole
/// off-delay, so short gaps never cycle the speaker's power.
pub struct Controller<A: Audio, R: Relay> {
    audio: A,
    relay: R,
    fusion: PresenceFusion,
    off_delay: Duration,
    last_seen: Option<Instant>,
}

impl<A: Audio, R: Relay> Controller<A, R> {
    /// A controller that has never seen anybody.
    pub fn new(audio: A, relay: R, fusion: FusionConfig, control: ControlConfig) -> Self {
        Self {
            audio,
            relay,
            fusion: PresenceFusion::new(fusion),
            off_delay: control.relay_off_delay(),
            last_seen: None,
        }
    }

    /// The audio actuator.
    pub fn audio(&self) -> &A {
        &self.audio
    }

    /// The relay actuator.
    pub fn relay(&self) -> &R {
        &self.relay
    }

    /// When robust presence was last seen.
    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    fn within_off_delay(&self, now: Instant) -> bool {
        self.last_seen
            .map(|seen| now.saturating_duration_since(seen) < self.off_delay)
            .unwrap_or(false)
    }

    /// One control step with the latest reading observed at `now`.
    pub fn tick(&mut self, reading: Option<&TargetReading>, now: Instant) -> PresenceVerdict {
        let verdict = self.fusion.step(reading, now);
        let was_present = self.within_off_delay(now);

        if verdict.robust {
            if !was_present {
                info!(
                    "PRESENCE DETECTED ({})",
                    if verdict.burst {
                        "continuous motion"
                    } else {
                        "within motion hold"
                    }
                );
            }
            self.last_seen = Some(now);

            if self.relay.is_connected() && !self.relay.is_energized() {
                info!("Robust presence detected - turning on relay");
                if let Err(e) = self.relay.energize() {
                    error!("Failed to turn on relay: {}", e);
                }
            }
            if !self.audio.is_playing() {
                info!("Robust presence detected - starting music");
                if let Err(e) = self.audio.play() {
                    error!("Failed to start music: {}", e);
                }
            }
        } else {
            // Asked once: a player may move on to its next track when asked.
            let playing = self.audio.is_playing();
            if was_present && playing {
                info!("PRESENCE LOST (missing {})", verdict.missing());
            }
            if playing {
                info!("No robust presence - stopping music");
                if let Err(e) = self.audio.stop() {
                    error!("Failed to stop music: {}", e);
                }
            }

            let delay_elapsed = self
                .last_seen
                .map(|seen| now.saturating_duration_since(seen) >= self.off_delay)
                .unwrap_or(true);
            if self.relay.is_energized() && delay_elapsed {
                info!(
                    "Turning off relay after {:.0} s without presence",
                    self.off_delay.as_secs_f64()
                );
                if let Err(e) = self.relay.de_energize() {
                    error!("Failed to turn off relay: {}", e);
                }
            }
        }
        verdict
    }

    /// Ticks every `interval` on the readings in `state` until something is
    /// sent on `stop` (or its sender is dropped), then shuts the actuators
    /// down.
    pub fn run(&mut self, state: &SharedSensorState, interval: Duration, stop: &mpsc::Receiver<()>) {
        info!("Starting control loop, checking every {:?}", interval);
        loop {
            let reading = current_reading(state);
            let verdict = self.tick(reading.as_deref(), Instant::now());
            debug!("{:?}", verdict);

            match stop.recv_timeout(interval) {
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        self.shutdown();
    }

    /// Stops the music and switches the speaker off.
    pub fn shutdown(&mut self) {
        info!("Shutting down actuators");
        if self.audio.is_playing() {
            if let Err(e) = self.audio.stop() {
                error!("Failed to stop music: {}", e);
            }
        }
        if self.relay.is_connected() && self.relay.is_energized() {
            if let Err(e) = self.relay.de_energize() {
                error!("Failed to turn off relay: {}", e);
            }
        }
    }
}

// A reading from a sensor we can no longer hear is no evidence of anybody,
// so the fused presence is left to expire.
fn current_reading(state: &SharedSensorState) -> Option<Arc<TargetReading>> {
    let snapshot = state.snapshot();
    if snapshot.connected {
        snapshot.reading
    } else {
        None
    }
}
