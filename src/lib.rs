//! Crescendo plays music while somebody is in the room.
//!
//! A 24GHz mmWave presence sensor (LD2410 family) reports targets over a
//! UART. This crate reads that stream, fuses the sensor's moving and
//! stationary reports into one robust presence signal, and uses it to start
//! and stop playback and to switch the speaker's power through a USB relay.
//!
//! The layers, from the wire up:
//!
//! - [`transport`]: the byte link, a serial port or a test double.
//! - [`frame`] and [`frame_reader`]: framing and resynchronization.
//! - [`command`]: the request/ACK configuration protocol.
//! - [`telemetry`]: decoding target reports.
//! - [`sensor_reader`]: the background thread publishing the latest reading.
//! - [`presence`]: fusing readings into robust presence.
//! - [`controller`]: driving the [`actuator`]s from presence.
//!
//! [`dummy_sensor`] and [`dummy_actuator`] stand in for hardware, both in
//! tests and with `crescendo run --simulate`.

#![warn(missing_docs)]
pub mod actuator;
#[allow(missing_docs)]
pub mod args;
pub mod command;
pub mod config;
pub mod controller;
pub mod dummy_actuator;
pub mod dummy_sensor;
pub mod frame;
pub mod frame_reader;
pub mod gui;
pub mod presence;
pub mod sensor_reader;
pub mod telemetry;
pub mod transport;
