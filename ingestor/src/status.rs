//! Dome status string codec.
//!
//! Index table, in string order: closed end-switch, motor, open end-switch,
//! safety, lens heating, camera heating, intensifier, fan, rain sensor,
//! light sensor, computer power. `'-'` marks an absent flag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a well-formed status string, in characters
pub const STATUS_LENGTH: usize = 11;

/// Character marking an absent flag
pub const ABSENT: char = '-';

/// One position of the status string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusFlag {
    CoverClosed,
    CoverMotor,
    CoverOpen,
    Safety,
    LensHeating,
    CameraHeating,
    Intensifier,
    Fan,
    RainSensor,
    LightSensor,
    ComputerPower,
}

/// Index → meaning, in string order
pub const STATUS_TABLE: [StatusFlag; STATUS_LENGTH] = [
    StatusFlag::CoverClosed,
    StatusFlag::CoverMotor,
    StatusFlag::CoverOpen,
    StatusFlag::Safety,
    StatusFlag::LensHeating,
    StatusFlag::CameraHeating,
    StatusFlag::Intensifier,
    StatusFlag::Fan,
    StatusFlag::RainSensor,
    StatusFlag::LightSensor,
    StatusFlag::ComputerPower,
];

impl StatusFlag {
    pub fn index(self) -> usize {
        STATUS_TABLE
            .iter()
            .position(|flag| *flag == self)
            .unwrap_or_default()
    }
}

/// Mechanical state of the dome cover
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverState {
    Open,
    Opening,
    Closed,
    Closing,
    Problem,
    Safety,
    #[default]
    Unknown,
}

impl CoverState {
    /// Single-character code used in storage
    pub fn code(self) -> char {
        match self {
            CoverState::Open => 'O',
            CoverState::Opening => 'o',
            CoverState::Closed => 'C',
            CoverState::Closing => 'c',
            CoverState::Problem => 'P',
            CoverState::Safety => 'S',
            CoverState::Unknown => 'U',
        }
    }

    pub fn from_code(code: char) -> Self {
        match code {
            'O' => CoverState::Open,
            'o' => CoverState::Opening,
            'C' => CoverState::Closed,
            'c' => CoverState::Closing,
            'P' => CoverState::Problem,
            'S' => CoverState::Safety,
            _ => CoverState::Unknown,
        }
    }
}

/// Boolean sensors carried by a heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorFlag {
    LensHeating,
    CameraHeating,
    IntensifierActive,
    FanActive,
    RainSensorActive,
    LightSensorActive,
    ComputerPower,
}

impl SensorFlag {
    pub fn name(self) -> &'static str {
        match self {
            SensorFlag::LensHeating => "lens_heating",
            SensorFlag::CameraHeating => "camera_heating",
            SensorFlag::IntensifierActive => "intensifier_active",
            SensorFlag::FanActive => "fan_active",
            SensorFlag::RainSensorActive => "rain_sensor_active",
            SensorFlag::LightSensorActive => "light_sensor_active",
            SensorFlag::ComputerPower => "computer_power",
        }
    }
}

impl fmt::Display for SensorFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SensorFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "lens_heating" => Ok(SensorFlag::LensHeating),
            "camera_heating" => Ok(SensorFlag::CameraHeating),
            "intensifier_active" => Ok(SensorFlag::IntensifierActive),
            "fan_active" => Ok(SensorFlag::FanActive),
            "rain_sensor_active" => Ok(SensorFlag::RainSensorActive),
            "light_sensor_active" => Ok(SensorFlag::LightSensorActive),
            "computer_power" => Ok(SensorFlag::ComputerPower),
            other => Err(format!("unknown sensor flag {:?}", other)),
        }
    }
}

/// Typed result of decoding a status string
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedStatus {
    pub cover_state: CoverState,
    pub lens_heating: Option<bool>,
    pub camera_heating: Option<bool>,
    pub intensifier_active: Option<bool>,
    pub fan_active: Option<bool>,
    pub rain_sensor_active: Option<bool>,
    pub light_sensor_active: Option<bool>,
    pub computer_power: Option<bool>,
}

impl DecodedStatus {
    pub fn flag(&self, flag: SensorFlag) -> Option<bool> {
        match flag {
            SensorFlag::LensHeating => self.lens_heating,
            SensorFlag::CameraHeating => self.camera_heating,
            SensorFlag::IntensifierActive => self.intensifier_active,
            SensorFlag::FanActive => self.fan_active,
            SensorFlag::RainSensorActive => self.rain_sensor_active,
            SensorFlag::LightSensorActive => self.light_sensor_active,
            SensorFlag::ComputerPower => self.computer_power,
        }
    }
}

/// Why a present status string fell back to the all-null decode.
/// A signal for logging, never a failure of the report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeDegraded {
    #[error("status string has {0} characters, expected {}", STATUS_LENGTH)]
    WrongLength(usize),
}

/// `None` and `Some("")` decode identically
pub fn decode(raw: Option<&str>) -> DecodedStatus {
    try_decode(raw).unwrap_or_default()
}

/// Like [`decode`], but reports why a present string was not decodable
pub fn try_decode(raw: Option<&str>) -> Result<DecodedStatus, DecodeDegraded> {
    let raw = match raw {
        Some(raw) if !raw.is_empty() => raw,
        _ => return Ok(DecodedStatus::default()),
    };

    let chars: Vec<char> = raw.chars().collect();
    if chars.len() != STATUS_LENGTH {
        return Err(DecodeDegraded::WrongLength(chars.len()));
    }

    let bits = StatusBits::from_chars(&chars);

    Ok(DecodedStatus {
        cover_state: bits.cover_state(),
        lens_heating: Some(bits.is_set(StatusFlag::LensHeating)),
        camera_heating: Some(bits.is_set(StatusFlag::CameraHeating)),
        intensifier_active: Some(bits.is_set(StatusFlag::Intensifier)),
        fan_active: Some(bits.is_set(StatusFlag::Fan)),
        rain_sensor_active: Some(bits.is_set(StatusFlag::RainSensor)),
        light_sensor_active: Some(bits.is_set(StatusFlag::LightSensor)),
        computer_power: Some(bits.is_set(StatusFlag::ComputerPower)),
    })
}

#[derive(Debug, Clone, Copy)]
struct StatusBits([bool; STATUS_LENGTH]);

impl StatusBits {
    fn from_chars(chars: &[char]) -> Self {
        let mut bits = [false; STATUS_LENGTH];
        for (bit, c) in bits.iter_mut().zip(chars) {
            *bit = *c != ABSENT;
        }
        StatusBits(bits)
    }

    fn is_set(&self, flag: StatusFlag) -> bool {
        self.0[flag.index()]
    }

    fn cover_state(&self) -> CoverState {
        let closed = self.is_set(StatusFlag::CoverClosed);
        let motor = self.is_set(StatusFlag::CoverMotor);

        // Safety overrides every other cover bit
        if self.is_set(StatusFlag::Safety) {
            return CoverState::Safety;
        }

        match (closed, motor) {
            (true, true) => CoverState::Opening,
            (true, false) => CoverState::Closed,
            // Resting state comes from the open end-switch
            (false, _) if self.is_set(StatusFlag::CoverOpen) => CoverState::Open,
            (false, _) => CoverState::Closed,
        }
    }
}
