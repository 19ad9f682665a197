//! The things presence switches on and off: music and the speaker's power.
//!
//! The control loop only sees the [`Audio`] and [`Relay`] traits. Production
//! implementations live here; call-counting doubles live in
//! [`crate::dummy_actuator`].

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    fs::{File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
};

/// Why an actuator command failed.
#[derive(Debug)]
pub enum ActuatorError {
    /// Writing to the device failed.
    Io(io::Error),
    /// There is no device to talk to.
    NotConnected,
    /// The player process could not be started.
    Spawn {
        /// The program we tried to run.
        program: String,
        /// What went wrong.
        error: io::Error,
    },
    /// Play was requested with an empty playlist.
    NoTracks,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorError::Io(error) => write!(f, "actuator io error: {}", error),
            ActuatorError::NotConnected => write!(f, "device not connected"),
            ActuatorError::Spawn { program, error } => {
                write!(f, "could not start {}: {}", program, error)
            }
            ActuatorError::NoTracks => write!(f, "no tracks configured"),
        }
    }
}

impl std::error::Error for ActuatorError {}

impl From<io::Error> for ActuatorError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Something that can play music.
pub trait Audio {
    /// Starts playback.
    fn play(&mut self) -> Result<(), ActuatorError>;
    /// Stops playback.
    fn stop(&mut self) -> Result<(), ActuatorError>;
    /// Whether music is playing right now.
    fn is_playing(&mut self) -> bool;
}

/// A switch in the speaker's power line.
pub trait Relay {
    /// Closes the relay.
    fn energize(&mut self) -> Result<(), ActuatorError>;
    /// Opens the relay.
    fn de_energize(&mut self) -> Result<(), ActuatorError>;
    /// Whether the relay was last closed.
    fn is_energized(&self) -> bool;
    /// Whether there is a relay at all.
    fn is_connected(&self) -> bool;
}

/// How music gets played.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioConfig {
    /// External player program.
    pub player: String,
    /// Arguments placed before the track path.
    pub player_args: Vec<String>,
    /// Playlist, played in order and looped.
    pub tracks: Vec<PathBuf>,
    /// Playback volume between 0.0 and 1.0, passed as mpg123's `-f` scale.
    pub volume: Option<f32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            player: "mpg123".into(),
            player_args: vec!["-q".into()],
            tracks: Vec::new(),
            volume: None,
        }
    }
}

/// Plays tracks by running an external player, one process per track.
pub struct CommandPlayer {
    config: AudioConfig,
    child: Option<Child>,
    next_track: usize,
}

impl CommandPlayer {
    /// A stopped player for `config`.
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            child: None,
            next_track: 0,
        }
    }

    fn command_for(&self, track: &Path) -> Command {
        let mut command = Command::new(&self.config.player);
        command.args(&self.config.player_args);
        if let Some(volume) = self.config.volume {
            let scale = (volume.clamp(0.0, 1.0) * 32768.0).round() as u32;
            command.arg("-f").arg(scale.to_string());
        }
        command
            .arg(track)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        command
    }

    fn spawn_next(&mut self) -> Result<(), ActuatorError> {
        if self.config.tracks.is_empty() {
            return Err(ActuatorError::NoTracks);
        }
        let index = self.next_track % self.config.tracks.len();
        let track = self.config.tracks[index].clone();
        let child = self
            .command_for(&track)
            .spawn()
            .map_err(|error| ActuatorError::Spawn {
                program: self.config.player.clone(),
                error,
            })?;
        info!("Playing track: {}", track.display());
        self.child = Some(child);
        self.next_track = index + 1;
        Ok(())
    }
}

impl Audio for CommandPlayer {
    fn play(&mut self) -> Result<(), ActuatorError> {
        if self.child.is_some() {
            self.stop()?;
        }
        self.spawn_next()
    }

    fn stop(&mut self) -> Result<(), ActuatorError> {
        if let Some(mut child) = self.child.take() {
            // Killing a child that already exited is not an error for us.
            if let Err(e) = child.kill() {
                debug!("Player already gone: {}", e);
            }
            child.wait()?;
            info!("Stopped music playback");
        }
        Ok(())
    }

    fn is_playing(&mut self) -> bool {
        match self.child.as_mut().map(|child| child.try_wait()) {
            None => return false,
            Some(Ok(None)) => return true,
            Some(Ok(Some(status))) => debug!("Player exited with {}", status),
            Some(Err(e)) => warn!("Could not poll player: {}", e),
        }
        self.child = None;
        // Keep the playlist going until someone calls stop.
        match self.spawn_next() {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not start next track: {}", e);
                false
            }
        }
    }
}

impl Drop for CommandPlayer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop player: {}", e);
        }
    }
}

/// Where the relay is and which of its channels switches the speaker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// hidraw node of the USB relay board, if there is one.
    pub device: Option<PathBuf>,
    /// Relay channel on the board, starting at 1.
    pub channel: u8,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            device: None,
            channel: 1,
        }
    }
}

const RELAY_ON: u8 = 0xFF;
const RELAY_OFF: u8 = 0xFD;

/// A USB HID relay board driven through its hidraw device node.
#[derive(Debug)]
pub struct HidrawRelay {
    device: Option<File>,
    channel: u8,
    energized: bool,
}

impl HidrawRelay {
    /// Opens the relay at `path`.
    pub fn open(path: impl AsRef<Path>, channel: u8) -> Result<Self, ActuatorError> {
        let path = path.as_ref();
        let device = OpenOptions::new().write(true).open(path)?;
        info!("Connected to relay at {}", path.display());
        Ok(Self {
            device: Some(device),
            channel,
            energized: false,
        })
    }

    /// A relay that is not there. Every command fails with
    /// [`ActuatorError::NotConnected`].
    pub fn absent() -> Self {
        Self {
            device: None,
            channel: 1,
            energized: false,
        }
    }

    /// Opens the relay named in `config`, or returns an absent one if none is
    /// configured or it cannot be opened.
    pub fn from_config(config: &RelayConfig) -> Self {
        match &config.device {
            Some(path) => Self::open(path, config.channel).unwrap_or_else(|e| {
                warn!("Relay at {} unavailable: {}", path.display(), e);
                Self::absent()
            }),
            None => Self::absent(),
        }
    }

    fn send(&mut self, command: u8) -> Result<(), ActuatorError> {
        let device = self.device.as_mut().ok_or(ActuatorError::NotConnected)?;
        device.write_all(&[0x00, command, self.channel])?;
        Ok(())
    }
}

impl Relay for HidrawRelay {
    fn energize(&mut self) -> Result<(), ActuatorError> {
        self.send(RELAY_ON)?;
        self.energized = true;
        info!("Relay {} on", self.channel);
        Ok(())
    }

    fn de_energize(&mut self) -> Result<(), ActuatorError> {
        self.send(RELAY_OFF)?;
        self.energized = false;
        info!("Relay {} off", self.channel);
        Ok(())
    }

    fn is_energized(&self) -> bool {
        self.energized
    }

    fn is_connected(&self) -> bool {
        self.device.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn relay_writes_hid_reports() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut relay = HidrawRelay::open(file.path(), 1).unwrap();
        assert!(relay.is_connected());

        relay.energize().unwrap();
        assert!(relay.is_energized());
        relay.de_energize().unwrap();
        assert!(!relay.is_energized());

        assert_eq!(
            fs::read(file.path()).unwrap(),
            vec![0x00, 0xFF, 0x01, 0x00, 0xFD, 0x01]
        );
    }

    #[test]
    fn absent_relay_refuses_commands() {
        let mut relay = HidrawRelay::absent();
        assert!(!relay.is_connected());
        assert!(matches!(relay.energize(), Err(ActuatorError::NotConnected)));
        assert!(!relay.is_energized());
    }

    #[test]
    fn unconfigured_relay_is_absent() {
        assert!(!HidrawRelay::from_config(&RelayConfig::default()).is_connected());
    }

    #[test]
    fn empty_playlist_cannot_play() {
        let mut player = CommandPlayer::new(AudioConfig::default());
        assert!(matches!(player.play(), Err(ActuatorError::NoTracks)));
        assert!(!player.is_playing());
    }

    #[test]
    fn missing_player_is_a_spawn_error() {
        let mut player = CommandPlayer::new(AudioConfig {
            player: "/nonexistent/crescendo-player".into(),
            tracks: vec!["song.mp3".into()],
            ..AudioConfig::default()
        });
        assert!(matches!(player.play(), Err(ActuatorError::Spawn { .. })));
        assert!(!player.is_playing());
    }

    #[test]
    fn volume_becomes_a_scale_factor() {
        let player = CommandPlayer::new(AudioConfig {
            volume: Some(0.5),
            ..AudioConfig::default()
        });
        let command = player.command_for(Path::new("a.mp3"));
        let args: Vec<_> = command.get_args().map(|a| a.to_owned()).collect();
        assert_eq!(args, vec!["-q", "-f", "16384", "a.mp3"]);
    }
}
