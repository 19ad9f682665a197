//! Interprets data-channel payloads as target readings.
//!
//! A data payload looks like `TYPE | 0xAA | FIELDS...`. Basic reports
//! (`TYPE = 0x02`) carry a ten byte block:
//!
//! ```text
//! status(1) | move_distance:u16 | move_energy(1) | static_distance:u16 |
//! static_energy(1) | detection_distance:u16 | reserved(1)
//! ```
//!
//! Engineering reports (`TYPE = 0x01`) carry the same block followed by the
//! farthest active gates and a `(move, static)` energy pair per gate. That
//! extra data is informational; presence decisions never depend on it.

use nom::{
    bytes::complete::take,
    multi::count,
    number::complete as num,
    sequence::tuple,
    IResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Data type byte for engineering-mode reports.
pub const DATA_TYPE_ENGINEERING: u8 = 0x01;
/// Data type byte for basic target reports.
pub const DATA_TYPE_BASIC: u8 = 0x02;
/// Marker byte that must follow the data type.
pub const DATA_HEAD: u8 = 0xAA;

const BASIC_BLOCK_LEN: usize = 10;
const MAX_GATES: usize = 8;

/// What kind of target the sensor currently sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// Nothing in range.
    None,
    /// Something moving.
    Moving,
    /// Something present but still.
    Stationary,
    /// Both a moving and a stationary target.
    Both,
}

impl TargetStatus {
    /// Maps the wire byte to a status; anything above 3 is not a status.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(TargetStatus::None),
            0x01 => Some(TargetStatus::Moving),
            0x02 => Some(TargetStatus::Stationary),
            0x03 => Some(TargetStatus::Both),
            _ => None,
        }
    }

    /// The wire byte for this status.
    pub fn to_byte(self) -> u8 {
        match self {
            TargetStatus::None => 0x00,
            TargetStatus::Moving => 0x01,
            TargetStatus::Stationary => 0x02,
            TargetStatus::Both => 0x03,
        }
    }

    /// True when the report includes a moving target.
    pub fn is_moving(self) -> bool {
        matches!(self, TargetStatus::Moving | TargetStatus::Both)
    }

    /// True when the report includes a stationary target.
    pub fn is_stationary(self) -> bool {
        matches!(self, TargetStatus::Stationary | TargetStatus::Both)
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetStatus::None => "No target",
            TargetStatus::Moving => "Moving target",
            TargetStatus::Stationary => "Stationary target",
            TargetStatus::Both => "Moving & Stationary target",
        };
        write!(f, "{}", s)
    }
}

/// Width of one distance gate, which depends on how the sensor is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum GateResolution {
    /// 0.75 m per gate, the factory setting.
    #[default]
    Coarse,
    /// 0.2 m per gate.
    Fine,
}

impl GateResolution {
    /// Metres covered by one gate.
    pub fn metres_per_gate(self) -> f32 {
        match self {
            GateResolution::Coarse => 0.75,
            GateResolution::Fine => 0.2,
        }
    }

    /// The value the set-distance-resolution command expects.
    pub fn wire_value(self) -> u16 {
        match self {
            GateResolution::Coarse => 0x0000,
            GateResolution::Fine => 0x0001,
        }
    }

    /// Inverse of [`GateResolution::wire_value`].
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(GateResolution::Coarse),
            0x0001 => Some(GateResolution::Fine),
            _ => None,
        }
    }
}

/// Energy the sensor measured in one distance gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateEnergy {
    /// Gate index, 0 is closest.
    pub gate: u8,
    /// Distance to the near edge of the gate.
    pub distance_m: f32,
    /// Motion energy, 0-100.
    pub move_energy: u8,
    /// Static energy, 0-100.
    pub static_energy: u8,
}

/// The extra per-gate detail of an engineering-mode report.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineeringData {
    /// Farthest gate configured for motion detection.
    pub max_move_gate: u8,
    /// Farthest gate configured for static detection.
    pub max_static_gate: u8,
    /// Per-gate energies, at most eight.
    pub gates: Vec<GateEnergy>,
}

/// One decoded target report. A fresh value is made for every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetReading {
    /// What the sensor sees.
    pub status: TargetStatus,
    /// Distance to the moving target, in cm.
    pub move_distance_cm: u16,
    /// Energy of the moving target, 0-100.
    pub move_energy: u8,
    /// Distance to the stationary target, in cm.
    pub static_distance_cm: u16,
    /// Energy of the stationary target, 0-100.
    pub static_energy: u8,
    /// Overall detection distance, in cm.
    pub detection_distance_cm: u16,
    /// Present only in engineering-mode reports.
    pub engineering: Option<EngineeringData>,
}

impl TargetReading {
    /// A reading with the given status and every number zeroed.
    pub fn with_status(status: TargetStatus) -> Self {
        Self {
            status,
            move_distance_cm: 0,
            move_energy: 0,
            static_distance_cm: 0,
            static_energy: 0,
            detection_distance_cm: 0,
            engineering: None,
        }
    }

    /// The sensor's own idea of presence: any target at all.
    pub fn presence(&self) -> bool {
        self.status != TargetStatus::None
    }

    /// Encodes this reading as a data payload, an engineering report if it
    /// carries engineering data. Used by the simulated sensor and in tests.
    pub fn to_payload(&self) -> Vec<u8> {
        let data_type = match self.engineering {
            Some(_) => DATA_TYPE_ENGINEERING,
            None => DATA_TYPE_BASIC,
        };
        let mut out = vec![data_type, DATA_HEAD, self.status.to_byte()];
        out.extend_from_slice(&self.move_distance_cm.to_le_bytes());
        out.push(self.move_energy);
        out.extend_from_slice(&self.static_distance_cm.to_le_bytes());
        out.push(self.static_energy);
        out.extend_from_slice(&self.detection_distance_cm.to_le_bytes());
        out.push(0x55);
        if let Some(eng) = &self.engineering {
            out.push(eng.max_move_gate);
            out.push(eng.max_static_gate);
            for gate in &eng.gates {
                out.push(gate.move_energy);
                out.push(gate.static_energy);
            }
        }
        out
    }
}

type BasicFields = (u8, u16, u8, u16, u8, u16);

fn basic_block(input: &[u8]) -> IResult<&[u8], BasicFields> {
    let (rest, block) = take(BASIC_BLOCK_LEN)(input)?;
    let (_, fields) = tuple((
        num::u8,
        num::le_u16,
        num::u8,
        num::le_u16,
        num::u8,
        num::le_u16,
    ))(block)?;
    Ok((rest, fields))
}

fn engineering_block(input: &[u8], resolution: GateResolution) -> IResult<&[u8], EngineeringData> {
    let (input, max_move_gate) = num::u8(input)?;
    let (input, max_static_gate) = num::u8(input)?;
    let n_gates = (input.len() / 2).min(MAX_GATES);
    let (input, pairs) = count(tuple((num::u8, num::u8)), n_gates)(input)?;

    let gates = pairs
        .into_iter()
        .enumerate()
        .map(|(i, (move_energy, static_energy))| GateEnergy {
            gate: i as u8,
            distance_m: i as f32 * resolution.metres_per_gate(),
            move_energy,
            static_energy,
        })
        .collect();

    Ok((
        input,
        EngineeringData {
            max_move_gate,
            max_static_gate,
            gates,
        },
    ))
}

/// Decodes a data-channel payload. Returns `None` for anything that is not a
/// well-formed target report; callers treat that as "no reading this cycle".
pub fn decode(payload: &[u8], resolution: GateResolution) -> Option<TargetReading> {
    let (data_type, head, body) = match payload {
        [data_type, head, body @ ..] => (*data_type, *head, body),
        _ => return None,
    };
    if head != DATA_HEAD {
        log::debug!("Invalid data head 0x{:02X}, expected 0x{:02X}", head, DATA_HEAD);
        return None;
    }
    if data_type != DATA_TYPE_BASIC && data_type != DATA_TYPE_ENGINEERING {
        log::debug!("Ignoring data type 0x{:02X}", data_type);
        return None;
    }

    let (rest, (status, move_dist, move_energy, static_dist, static_energy, detect_dist)) =
        basic_block(body).ok()?;
    let status = TargetStatus::from_byte(status)?;

    let engineering = if data_type == DATA_TYPE_ENGINEERING {
        engineering_block(rest, resolution)
            .ok()
            .map(|(_, data)| data)
    } else {
        None
    };

    Some(TargetReading {
        status,
        move_distance_cm: move_dist,
        move_energy,
        static_distance_cm: static_dist,
        static_energy,
        detection_distance_cm: detect_dist,
        engineering,
    })
}
