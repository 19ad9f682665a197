//! Actuators that only count what they were asked to do.

use crate::actuator::{ActuatorError, Audio, Relay};
use log::info;

/// An [`Audio`] that remembers calls instead of making noise.
#[derive(Debug, Default)]
pub struct DummyAudio {
    playing: bool,
    /// Times `play` was called.
    pub play_calls: usize,
    /// Times `stop` was called.
    pub stop_calls: usize,
    /// Times `is_playing` was asked.
    pub is_playing_calls: usize,
}

impl DummyAudio {
    /// A silent, stopped player.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Audio for DummyAudio {
    fn play(&mut self) -> Result<(), ActuatorError> {
        self.play_calls += 1;
        self.playing = true;
        info!("[dummy] play");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        self.stop_calls += 1;
        self.playing = false;
        info!("[dummy] stop");
        Ok(())
    }

    fn is_playing(&mut self) -> bool {
        self.is_playing_calls += 1;
        self.playing
    }
}

/// A [`Relay`] that remembers calls instead of switching anything.
#[derive(Debug)]
pub struct DummyRelay {
    connected: bool,
    energized: bool,
    /// Times `energize` was called.
    pub energize_calls: usize,
    /// Times `de_energize` was called.
    pub de_energize_calls: usize,
}

impl DummyRelay {
    /// A connected relay, starting off.
    pub fn new() -> Self {
        Self {
            connected: true,
            energized: false,
            energize_calls: 0,
            de_energize_calls: 0,
        }
    }

    /// A relay that reports itself as missing.
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            ..Self::new()
        }
    }
}

impl Default for DummyRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Relay for DummyRelay {
    fn energize(&mut self) -> Result<(), ActuatorError> {
        if !self.connected {
            return Err(ActuatorError::NotConnected);
        }
        self.energize_calls += 1;
        self.energized = true;
        info!("[dummy] relay on");
        Ok(())
    }

    fn de_energize(&mut self) -> Result<(), ActuatorError> {
        if !self.connected {
            return Err(ActuatorError::NotConnected);
        }
        self.de_energize_calls += 1;
        self.energized = false;
        info!("[dummy] relay off");
        Ok(())
    }

    fn is_energized(&self) -> bool {
        self.energized
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
