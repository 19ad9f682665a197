//! Request/ACK configuration protocol on the command channel.
//!
//! Every request is a command frame whose payload starts with a 16-bit
//! command word. The sensor answers with a command frame carrying the same
//! word with bit `0x0100` set, a 16-bit status (0 = success) and, for read
//! commands, a body.
//!
//! The sensor only accepts configuration commands between an
//! enable-configuration and an end-configuration request. The helpers on
//! [`CommandEngine`] take care of that bracketing, and always try to close
//! configuration mode again so the sensor is never left stuck in it.

use crate::frame::{self, Channel, Frame, FrameError};
use crate::frame_reader::FrameReader;
use crate::telemetry::GateResolution;
use crate::transport::{SharedTransport, Transport, TransportError};
use log::{debug, info, warn};
use nom::{
    bytes::complete::tag,
    multi::count,
    number::complete as num,
    sequence::tuple,
    IResult,
};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Enter configuration mode.
pub const CMD_ENABLE_CONFIG: u16 = 0x00FF;
/// Leave configuration mode.
pub const CMD_END_CONFIG: u16 = 0x00FE;
/// Set farthest gates and the no-one duration.
pub const CMD_SET_DISTANCE_PARAMS: u16 = 0x0060;
/// Read back the current parameters.
pub const CMD_READ_PARAMS: u16 = 0x0061;
/// Switch the data channel to engineering reports.
pub const CMD_ENABLE_ENGINEERING: u16 = 0x0062;
/// Switch the data channel back to basic reports.
pub const CMD_DISABLE_ENGINEERING: u16 = 0x0063;
/// Set motion and static sensitivity for one gate.
pub const CMD_SET_SENSITIVITY: u16 = 0x0064;
/// Read the firmware version.
pub const CMD_READ_FIRMWARE: u16 = 0x00A0;
/// Restore factory settings.
pub const CMD_FACTORY_RESET: u16 = 0x00A2;
/// Reboot the sensor.
pub const CMD_RESTART: u16 = 0x00A3;
/// Choose between 0.75 m and 0.2 m gates.
pub const CMD_SET_DISTANCE_RESOLUTION: u16 = 0x00AA;

/// Bit the sensor sets in the command word of an acknowledgement.
pub const ACK_FLAG: u16 = 0x0100;

/// Gate id that addresses every gate at once.
pub const ALL_GATES: u32 = 0xFFFF;

/// Per-gate sensitivity is only ever sent for this many gates.
pub const MAX_SENSITIVITY_GATES: usize = 8;

const CONFIG_PROTOCOL_VERSION: u16 = 0x0001;

/// Why a command exchange failed.
#[derive(Debug)]
pub enum CommandError {
    /// The link failed underneath us.
    Transport(TransportError),
    /// The request could not be framed.
    Frame(FrameError),
    /// No acknowledgement arrived in time.
    Timeout {
        /// The command that went unanswered.
        command: u16,
    },
    /// The acknowledgement was framed correctly but too short to hold a
    /// command word and status, so we are no longer aligned with the device.
    Desync {
        /// The command being acknowledged.
        command: u16,
    },
    /// The acknowledgement belongs to some other command.
    UnexpectedAck {
        /// `command | ACK_FLAG`
        expected: u16,
        /// What the device sent instead.
        actual: u16,
    },
    /// The device acknowledged the command but refused it.
    Rejected {
        /// The refused command.
        command: u16,
        /// Non-zero status from the device.
        status: u16,
    },
    /// A read command's body could not be parsed.
    Malformed {
        /// The command whose answer was unreadable.
        command: u16,
    },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Transport(error) => write!(f, "{}", error),
            CommandError::Frame(error) => write!(f, "{}", error),
            CommandError::Timeout { command } => {
                write!(f, "no acknowledgement for command 0x{:04X}", command)
            }
            CommandError::Desync { command } => {
                write!(f, "short acknowledgement for command 0x{:04X}", command)
            }
            CommandError::UnexpectedAck { expected, actual } => write!(
                f,
                "unexpected ack 0x{:04X}, expected 0x{:04X}",
                actual, expected
            ),
            CommandError::Rejected { command, status } => write!(
                f,
                "command 0x{:04X} rejected with status {}",
                command, status
            ),
            CommandError::Malformed { command } => {
                write!(f, "malformed reply to command 0x{:04X}", command)
            }
        }
    }
}

impl std::error::Error for CommandError {}

impl From<TransportError> for CommandError {
    fn from(value: TransportError) -> Self {
        Self::Transport(value)
    }
}

impl From<FrameError> for CommandError {
    fn from(value: FrameError) -> Self {
        Self::Frame(value)
    }
}

/// A successful acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// The command this acknowledges (without the ack bit).
    pub command: u16,
    /// Whatever followed the status field.
    pub body: Vec<u8>,
}

/// Timing knobs for the exchange.
#[derive(Debug, Clone, Copy)]
pub struct CommandOptions {
    /// How long to wait for an acknowledgement.
    pub ack_timeout: Duration,
    /// How long to let the sensor boot after a desync restart.
    pub restart_settle: Duration,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(1),
            restart_settle: Duration::from_secs(2),
        }
    }
}

/// Detection parameters, both as configured and as read back.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SensorParameters {
    /// Farthest gate used for motion detection, 1-8.
    pub max_motion_gate: u8,
    /// Farthest gate used for static detection, 1-8.
    pub max_static_gate: u8,
    /// Seconds without a target before the sensor reports nobody.
    pub no_one_duration_s: u16,
    /// Motion sensitivity per gate, 0-100.
    pub motion_sensitivity: Vec<u8>,
    /// Static sensitivity per gate, 0-100.
    pub static_sensitivity: Vec<u8>,
}

impl Default for SensorParameters {
    fn default() -> Self {
        Self {
            max_motion_gate: 8,
            max_static_gate: 8,
            no_one_duration_s: 10,
            motion_sensitivity: vec![80, 80, 75, 75, 75, 70, 70, 70],
            static_sensitivity: vec![80, 80, 75, 75, 75, 70, 70, 70],
        }
    }
}

/// What `read_parameters` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParameters {
    /// Highest gate index the hardware supports.
    pub max_gate: u8,
    /// The currently configured parameters.
    pub parameters: SensorParameters,
}

fn encode_params(params: &[(u16, u32)]) -> Vec<u8> {
    params
        .iter()
        .flat_map(|(word, value)| {
            word.to_le_bytes()
                .into_iter()
                .chain(value.to_le_bytes())
        })
        .collect()
}

/// Checks a response frame against the command it should acknowledge.
pub fn parse_ack(command_word: u16, response: &Frame) -> Result<Ack, CommandError> {
    let expected = command_word | ACK_FLAG;
    let parsed: IResult<&[u8], (u16, u16)> =
        tuple((num::le_u16, num::le_u16))(response.payload());
    let (body, (actual, status)) = parsed.map_err(|_| CommandError::Desync {
        command: command_word,
    })?;

    if actual != expected {
        return Err(CommandError::UnexpectedAck { expected, actual });
    }
    if status != 0 {
        return Err(CommandError::Rejected {
            command: command_word,
            status,
        });
    }
    Ok(Ack {
        command: command_word,
        body: body.to_vec(),
    })
}

fn parse_parameters(body: &[u8]) -> IResult<&[u8], DeviceParameters> {
    let (input, _) = tag(&[0xAA][..])(body)?;
    let (input, (max_gate, max_motion_gate, max_static_gate)) =
        tuple((num::u8, num::u8, num::u8))(input)?;
    let n = usize::from(max_gate) + 1;
    let (input, motion_sensitivity) = count(num::u8, n)(input)?;
    let (input, static_sensitivity) = count(num::u8, n)(input)?;
    let (input, no_one_duration_s) = num::le_u16(input)?;
    Ok((
        input,
        DeviceParameters {
            max_gate,
            parameters: SensorParameters {
                max_motion_gate,
                max_static_gate,
                no_one_duration_s,
                motion_sensitivity,
                static_sensitivity,
            },
        },
    ))
}

fn parse_firmware(body: &[u8]) -> IResult<&[u8], String> {
    let (input, (_kind, major, minor)) = tuple((num::le_u16, num::le_u16, num::le_u32))(body)?;
    Ok((
        input,
        format!("V{}.{:02X}.{:08X}", major >> 8, major & 0xFF, minor),
    ))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Sends configuration commands over a shared transport.
///
/// The engine holds the transport lock for a whole exchange, so a
/// [`crate::sensor_reader::SensorReader`] on the same link is paused until
/// the acknowledgement is in. Each engine has its own command-channel buffer.
pub struct CommandEngine<T: Transport> {
    transport: SharedTransport<T>,
    reader: FrameReader,
    options: CommandOptions,
}

impl<T: Transport> CommandEngine<T> {
    /// An engine talking over `transport`.
    pub fn new(transport: SharedTransport<T>, options: CommandOptions) -> Self {
        Self {
            transport,
            reader: FrameReader::new(Channel::Command),
            options,
        }
    }

    /// Sends one command and waits for its acknowledgement.
    ///
    /// If the answer is too short to be an acknowledgement at all, the sensor
    /// is restarted and the exchange is tried once more. A second short
    /// answer is final.
    pub fn send(&mut self, command_word: u16, data: &[u8]) -> Result<Ack, CommandError> {
        match self.exchange(command_word, data) {
            Err(CommandError::Desync { command }) => {
                warn!(
                    "Desync on command 0x{:04X}, restarting sensor and retrying",
                    command
                );
                if let Err(e) = self.exchange(CMD_RESTART, &[]) {
                    warn!("Restart during desync recovery failed: {}", e);
                }
                spin_sleep::sleep(self.options.restart_settle);
                self.exchange(command_word, data)
            }
            other => other,
        }
    }

    fn exchange(&mut self, command_word: u16, data: &[u8]) -> Result<Ack, CommandError> {
        let request = frame::encode_command(command_word, data)?;

        let response = {
            let mut transport = self
                .transport
                .lock()
                .map_err(|_| TransportError::Disconnected)?;
            transport.clear_input()?;
            self.reader.clear();
            transport.write_all(&request)?;
            debug!("Sent command 0x{:04X}: {}", command_word, hex(&request));
            self.reader
                .next_frame(&mut *transport, self.options.ack_timeout)?
        };

        let response = response.ok_or(CommandError::Timeout {
            command: command_word,
        })?;
        debug!("Response payload: {}", hex(response.payload()));
        parse_ack(command_word, &response)
    }

    /// Puts the sensor into configuration mode.
    pub fn enable_configuration(&mut self) -> Result<(), CommandError> {
        self.send(CMD_ENABLE_CONFIG, &CONFIG_PROTOCOL_VERSION.to_le_bytes())
            .map(|_| ())
    }

    /// Takes the sensor out of configuration mode.
    pub fn end_configuration(&mut self) -> Result<(), CommandError> {
        self.send(CMD_END_CONFIG, &[]).map(|_| ())
    }

    /// Runs `f` inside configuration mode. End-configuration is attempted
    /// whatever `f` returns; the first error wins.
    pub fn in_config_mode<R>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<R, CommandError>,
    ) -> Result<R, CommandError> {
        self.enable_configuration()?;
        let res = f(self);
        let ended = self.end_configuration();
        if let Err(e) = &ended {
            warn!("Failed to end configuration mode: {}", e);
        }
        let value = res?;
        ended?;
        Ok(value)
    }

    /// Sets the farthest motion and static gates and the no-one duration.
    /// Must be called in configuration mode.
    pub fn set_distance_parameters(
        &mut self,
        max_motion_gate: u8,
        max_static_gate: u8,
        no_one_duration_s: u16,
    ) -> Result<(), CommandError> {
        let data = encode_params(&[
            (0x0000, u32::from(max_motion_gate)),
            (0x0001, u32::from(max_static_gate)),
            (0x0002, u32::from(no_one_duration_s)),
        ]);
        self.send(CMD_SET_DISTANCE_PARAMS, &data).map(|_| ())
    }

    /// Sets one gate's sensitivities, or every gate's with [`ALL_GATES`].
    /// Must be called in configuration mode.
    pub fn set_gate_sensitivity(
        &mut self,
        gate: u32,
        motion: u8,
        stationary: u8,
    ) -> Result<(), CommandError> {
        let data = encode_params(&[
            (0x0000, gate),
            (0x0001, u32::from(motion)),
            (0x0002, u32::from(stationary)),
        ]);
        self.send(CMD_SET_SENSITIVITY, &data).map(|_| ())
    }

    /// Applies a full set of parameters: enable configuration, distance
    /// parameters, per-gate sensitivity, end configuration. Any failure after
    /// enabling still closes configuration mode before returning.
    pub fn configure(&mut self, params: &SensorParameters) -> Result<(), CommandError> {
        let gates = params
            .motion_sensitivity
            .len()
            .min(params.static_sensitivity.len());
        if gates > MAX_SENSITIVITY_GATES {
            debug!(
                "Only the first {} of {} gate sensitivities are sent",
                MAX_SENSITIVITY_GATES, gates
            );
        }

        self.in_config_mode(|engine| {
            engine.set_distance_parameters(
                params.max_motion_gate,
                params.max_static_gate,
                params.no_one_duration_s,
            )?;
            for gate in 0..gates.min(MAX_SENSITIVITY_GATES) {
                engine.set_gate_sensitivity(
                    gate as u32,
                    params.motion_sensitivity[gate],
                    params.static_sensitivity[gate],
                )?;
            }
            Ok(())
        })?;

        info!("Sensor configuration completed successfully");
        Ok(())
    }

    /// Sets the same sensitivities on every gate.
    pub fn set_all_gates_sensitivity(
        &mut self,
        motion: u8,
        stationary: u8,
    ) -> Result<(), CommandError> {
        self.in_config_mode(|engine| engine.set_gate_sensitivity(ALL_GATES, motion, stationary))
    }

    /// Reads the parameters currently stored on the sensor.
    pub fn read_parameters(&mut self) -> Result<DeviceParameters, CommandError> {
        self.in_config_mode(|engine| {
            let ack = engine.send(CMD_READ_PARAMS, &[])?;
            parse_parameters(&ack.body)
                .map(|(_, params)| params)
                .map_err(|_| CommandError::Malformed {
                    command: CMD_READ_PARAMS,
                })
        })
    }

    /// Reads the firmware version, formatted like `V1.02.22062416`.
    pub fn read_firmware(&mut self) -> Result<String, CommandError> {
        self.in_config_mode(|engine| {
            let ack = engine.send(CMD_READ_FIRMWARE, &[])?;
            parse_firmware(&ack.body)
                .map(|(_, version)| version)
                .map_err(|_| CommandError::Malformed {
                    command: CMD_READ_FIRMWARE,
                })
        })
    }

    /// Switches the data channel between engineering and basic reports.
    pub fn set_engineering_mode(&mut self, enabled: bool) -> Result<(), CommandError> {
        let command = if enabled {
            CMD_ENABLE_ENGINEERING
        } else {
            CMD_DISABLE_ENGINEERING
        };
        self.in_config_mode(|engine| engine.send(command, &[]).map(|_| ()))
    }

    /// Changes the gate width. Takes effect after a restart.
    pub fn set_distance_resolution(
        &mut self,
        resolution: GateResolution,
    ) -> Result<(), CommandError> {
        self.in_config_mode(|engine| {
            engine
                .send(
                    CMD_SET_DISTANCE_RESOLUTION,
                    &resolution.wire_value().to_le_bytes(),
                )
                .map(|_| ())
        })
    }

    /// Restores factory settings. Takes effect after a restart.
    pub fn factory_reset(&mut self) -> Result<(), CommandError> {
        self.in_config_mode(|engine| engine.send(CMD_FACTORY_RESET, &[]).map(|_| ()))
    }

    /// Reboots the sensor and waits for it to come back.
    pub fn restart(&mut self) -> Result<(), CommandError> {
        self.enable_configuration()?;
        self.send(CMD_RESTART, &[])?;
        spin_sleep::sleep(self.options.restart_settle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode, encode_command};
    use crate::transport::{share, MockTransport};

    fn options() -> CommandOptions {
        CommandOptions {
            ack_timeout: Duration::from_millis(50),
            restart_settle: Duration::from_millis(5),
        }
    }

    fn ack(command: u16, status: u16, body: &[u8]) -> Vec<u8> {
        let mut data = status.to_le_bytes().to_vec();
        data.extend_from_slice(body);
        encode_command(command | ACK_FLAG, &data).unwrap()
    }

    fn engine(mock: &MockTransport) -> CommandEngine<MockTransport> {
        CommandEngine::new(share(mock.clone()), options())
    }

    fn enable_request() -> Vec<u8> {
        encode_command(CMD_ENABLE_CONFIG, &[0x01, 0x00]).unwrap()
    }

    fn end_request() -> Vec<u8> {
        encode_command(CMD_END_CONFIG, &[]).unwrap()
    }

    #[test]
    fn accepts_a_matching_ack() {
        let mock = MockTransport::new();
        mock.reply_to(&enable_request(), &ack(CMD_ENABLE_CONFIG, 0, &[0x01, 0x00, 0x40, 0x00]));

        let mut engine = engine(&mock);
        let ack = engine.send(CMD_ENABLE_CONFIG, &[0x01, 0x00]).unwrap();
        assert_eq!(ack.command, CMD_ENABLE_CONFIG);
        assert_eq!(ack.body, vec![0x01, 0x00, 0x40, 0x00]);
        assert_eq!(mock.clears(), 1);
    }

    #[test]
    fn skips_data_frames_while_waiting() {
        let mock = MockTransport::new();
        let mut reply =
            encode(Channel::Data, &[0x02, 0xAA, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0x55]).unwrap();
        reply.extend_from_slice(&ack(CMD_END_CONFIG, 0, &[]));
        mock.reply_to(&end_request(), &reply);

        let mut engine = engine(&mock);
        assert!(engine.end_configuration().is_ok());
    }

    #[test]
    fn rejects_ack_for_another_command() {
        let mock = MockTransport::new();
        // Status is success, but the word is wrong.
        mock.reply_to(&end_request(), &ack(CMD_ENABLE_CONFIG, 0, &[]));

        let mut engine = engine(&mock);
        match engine.end_configuration() {
            Err(CommandError::UnexpectedAck { expected, actual }) => {
                assert_eq!(expected, 0x01FE);
                assert_eq!(actual, 0x01FF);
            }
            other => panic!("expected UnexpectedAck, got {:?}", other),
        }
    }

    #[test]
    fn ack_without_the_ack_bit_is_rejected() {
        let response = Frame::new(Channel::Command, vec![0xFE, 0x00, 0x00, 0x00]);
        assert!(matches!(
            parse_ack(CMD_END_CONFIG, &response),
            Err(CommandError::UnexpectedAck { .. })
        ));
    }

    #[test]
    fn nonzero_status_is_rejected() {
        let response = Frame::new(Channel::Command, vec![0xFE, 0x01, 0x01, 0x00]);
        assert!(matches!(
            parse_ack(CMD_END_CONFIG, &response),
            Err(CommandError::Rejected { status: 1, .. })
        ));
    }

    #[test]
    fn silence_is_a_timeout() {
        let mock = MockTransport::new();
        let mut engine = engine(&mock);
        assert!(matches!(
            engine.end_configuration(),
            Err(CommandError::Timeout {
                command: CMD_END_CONFIG
            })
        ));
    }

    #[test]
    fn desync_restarts_and_retries_once() {
        let mock = MockTransport::new();
        let restart = encode_command(CMD_RESTART, &[]).unwrap();
        let short = encode_command(CMD_END_CONFIG | ACK_FLAG, &[]).unwrap();
        mock.reply_to(&end_request(), &short);
        mock.reply_to(&restart, &ack(CMD_RESTART, 0, &[]));
        mock.reply_to(&end_request(), &ack(CMD_END_CONFIG, 0, &[]));

        let mut engine = engine(&mock);
        assert!(engine.end_configuration().is_ok());
        assert_eq!(mock.written(), vec![end_request(), restart, end_request()]);
    }

    #[test]
    fn second_desync_is_final() {
        let mock = MockTransport::new();
        let restart = encode_command(CMD_RESTART, &[]).unwrap();
        let short = encode_command(CMD_END_CONFIG | ACK_FLAG, &[]).unwrap();
        mock.reply_to(&end_request(), &short);
        mock.reply_to(&restart, &ack(CMD_RESTART, 0, &[]));
        mock.reply_to(&end_request(), &short);

        let mut engine = engine(&mock);
        assert!(matches!(
            engine.end_configuration(),
            Err(CommandError::Desync { .. })
        ));
        assert_eq!(mock.written().len(), 3);
    }

    #[test]
    fn configure_sends_the_whole_sequence() {
        let mock = MockTransport::new();
        let params = SensorParameters {
            max_motion_gate: 6,
            max_static_gate: 4,
            no_one_duration_s: 10,
            motion_sensitivity: vec![50, 40],
            static_sensitivity: vec![0, 40],
        };
        let distance = encode_command(
            CMD_SET_DISTANCE_PARAMS,
            &encode_params(&[(0, 6), (1, 4), (2, 10)]),
        )
        .unwrap();
        let gate0 =
            encode_command(CMD_SET_SENSITIVITY, &encode_params(&[(0, 0), (1, 50), (2, 0)])).unwrap();
        let gate1 =
            encode_command(CMD_SET_SENSITIVITY, &encode_params(&[(0, 1), (1, 40), (2, 40)])).unwrap();

        mock.reply_to(&enable_request(), &ack(CMD_ENABLE_CONFIG, 0, &[1, 0, 0x40, 0]));
        mock.reply_to(&distance, &ack(CMD_SET_DISTANCE_PARAMS, 0, &[]));
        mock.reply_to(&gate0, &ack(CMD_SET_SENSITIVITY, 0, &[]));
        mock.reply_to(&gate1, &ack(CMD_SET_SENSITIVITY, 0, &[]));
        mock.reply_to(&end_request(), &ack(CMD_END_CONFIG, 0, &[]));

        let mut engine = engine(&mock);
        engine.configure(&params).unwrap();
        assert_eq!(
            mock.written(),
            vec![enable_request(), distance, gate0, gate1, end_request()]
        );
    }

    #[test]
    fn configure_failure_still_ends_config_mode() {
        let mock = MockTransport::new();
        let params = SensorParameters::default();
        mock.reply_to(&enable_request(), &ack(CMD_ENABLE_CONFIG, 0, &[1, 0, 0x40, 0]));
        let distance = encode_command(
            CMD_SET_DISTANCE_PARAMS,
            &encode_params(&[(0, 8), (1, 8), (2, 10)]),
        )
        .unwrap();
        mock.reply_to(&distance, &ack(CMD_SET_DISTANCE_PARAMS, 1, &[]));
        mock.reply_to(&end_request(), &ack(CMD_END_CONFIG, 0, &[]));

        let mut engine = engine(&mock);
        assert!(matches!(
            engine.configure(&params),
            Err(CommandError::Rejected {
                command: CMD_SET_DISTANCE_PARAMS,
                status: 1
            })
        ));
        assert_eq!(mock.written().last(), Some(&end_request()));
    }

    #[test]
    fn configure_stops_if_enable_fails() {
        let mock = MockTransport::new();
        let mut engine = engine(&mock);
        assert!(engine.configure(&SensorParameters::default()).is_err());
        assert_eq!(mock.written(), vec![enable_request()]);
    }

    #[test]
    fn reads_parameters() {
        let mock = MockTransport::new();
        let mut body = vec![0xAA, 0x08, 0x06, 0x04];
        body.extend_from_slice(&[50, 50, 40, 30, 20, 15, 15, 15, 15]);
        body.extend_from_slice(&[0, 0, 40, 40, 30, 30, 20, 20, 20]);
        body.extend_from_slice(&10u16.to_le_bytes());

        mock.reply_to(&enable_request(), &ack(CMD_ENABLE_CONFIG, 0, &[1, 0, 0x40, 0]));
        let request = encode_command(CMD_READ_PARAMS, &[]).unwrap();
        mock.reply_to(&request, &ack(CMD_READ_PARAMS, 0, &body));
        mock.reply_to(&end_request(), &ack(CMD_END_CONFIG, 0, &[]));

        let mut engine = engine(&mock);
        let read = engine.read_parameters().unwrap();
        assert_eq!(read.max_gate, 8);
        assert_eq!(read.parameters.max_motion_gate, 6);
        assert_eq!(read.parameters.max_static_gate, 4);
        assert_eq!(read.parameters.no_one_duration_s, 10);
        assert_eq!(read.parameters.motion_sensitivity.len(), 9);
        assert_eq!(read.parameters.static_sensitivity[2], 40);
    }

    #[test]
    fn truncated_parameters_are_malformed() {
        let mock = MockTransport::new();
        mock.reply_to(&enable_request(), &ack(CMD_ENABLE_CONFIG, 0, &[1, 0, 0x40, 0]));
        mock.reply_to(
            &encode_command(CMD_READ_PARAMS, &[]).unwrap(),
            &ack(CMD_READ_PARAMS, 0, &[0xAA, 0x08, 0x06]),
        );
        mock.reply_to(&end_request(), &ack(CMD_END_CONFIG, 0, &[]));

        let mut engine = engine(&mock);
        assert!(matches!(
            engine.read_parameters(),
            Err(CommandError::Malformed { .. })
        ));
        assert_eq!(mock.written().last(), Some(&end_request()));
    }

    #[test]
    fn formats_firmware_version() {
        let mut body = 0x0000u16.to_le_bytes().to_vec();
        body.extend_from_slice(&0x0102u16.to_le_bytes());
        body.extend_from_slice(&0x22062416u32.to_le_bytes());
        let (_, version) = parse_firmware(&body).unwrap();
        assert_eq!(version, "V1.02.22062416");
    }

    #[test]
    fn broadcast_sensitivity_uses_gate_ffff() {
        let mock = MockTransport::new();
        let request = encode_command(
            CMD_SET_SENSITIVITY,
            &encode_params(&[(0, 0xFFFF), (1, 40), (2, 30)]),
        )
        .unwrap();
        mock.reply_to(&enable_request(), &ack(CMD_ENABLE_CONFIG, 0, &[1, 0, 0x40, 0]));
        mock.reply_to(&request, &ack(CMD_SET_SENSITIVITY, 0, &[]));
        mock.reply_to(&end_request(), &ack(CMD_END_CONFIG, 0, &[]));

        let mut engine = engine(&mock);
        engine.set_all_gates_sensitivity(40, 30).unwrap();
        assert_eq!(mock.written()[1], request);
    }
}
