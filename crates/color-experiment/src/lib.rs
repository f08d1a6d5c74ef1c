//! Simulated color experiment.
//!
//! A responder drives an RGB light source and reads back an eight-channel
//! spectral sensor. Without hardware attached, the readings are modelled as a
//! fixed linear mix of the three drive levels per channel.
//!
//! ```
//! use color_experiment::{run_color_experiment, ColorCommand};
//!
//! let readings = run_color_experiment(ColorCommand::new(255, 0, 0));
//! assert_eq!(readings.channel(410), Some(25.5));
//! assert_eq!(readings.channel(670), Some(255.0));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Sensor channel center wavelengths in nanometers.
pub const WAVELENGTHS: [u16; 8] = [410, 440, 470, 510, 550, 583, 620, 670];

const RED_WEIGHTS: [f64; 8] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.9, 1.0];
const GREEN_WEIGHTS: [f64; 8] = [0.2, 0.4, 0.6, 0.8, 1.0, 0.8, 0.4, 0.2];
const BLUE_WEIGHTS: [f64; 8] = [0.9, 1.0, 0.8, 0.6, 0.4, 0.2, 0.1, 0.0];

/// Errors raised while interpreting a command.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExperimentError {
    #[error("missing color channel {0}")]
    MissingChannel(&'static str),

    #[error("color channel {channel} must be an integer in 0..=255, got {value}")]
    InvalidChannel { channel: &'static str, value: Value },
}

/// RGB drive levels for one experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorCommand {
    #[serde(rename = "R")]
    pub r: u8,
    #[serde(rename = "G")]
    pub g: u8,
    #[serde(rename = "B")]
    pub b: u8,
}

impl ColorCommand {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Validate a loosely-typed command object.
    ///
    /// Integral floats (`15.0`) are accepted since some publishers only
    /// emit doubles; anything fractional or outside `0..=255` is rejected.
    pub fn from_map(command: &Map<String, Value>) -> Result<Self, ExperimentError> {
        Ok(Self {
            r: channel(command, "R")?,
            g: channel(command, "G")?,
            b: channel(command, "B")?,
        })
    }

    /// The command as a JSON object, as published on the wire.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("R".into(), self.r.into());
        map.insert("G".into(), self.g.into());
        map.insert("B".into(), self.b.into());
        map
    }
}

fn channel(command: &Map<String, Value>, name: &'static str) -> Result<u8, ExperimentError> {
    let value = command
        .get(name)
        .ok_or(ExperimentError::MissingChannel(name))?;

    let invalid = || ExperimentError::InvalidChannel {
        channel: name,
        value: value.clone(),
    };

    if let Some(n) = value.as_u64() {
        return u8::try_from(n).map_err(|_| invalid());
    }

    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && (0.0..=255.0).contains(&f) => Ok(f as u8),
        _ => Err(invalid()),
    }
}

/// Named reference colors used for the default experiment batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gemstone {
    Sapphire,
    Ruby,
    Emerald,
}

impl Gemstone {
    pub const ALL: [Gemstone; 3] = [Gemstone::Sapphire, Gemstone::Ruby, Gemstone::Emerald];

    pub const fn command(self) -> ColorCommand {
        match self {
            Gemstone::Sapphire => ColorCommand::new(15, 82, 186),
            Gemstone::Ruby => ColorCommand::new(155, 17, 30),
            Gemstone::Emerald => ColorCommand::new(80, 200, 120),
        }
    }
}

/// Spectral readings keyed by channel name (`ch410` .. `ch670`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorReadings(BTreeMap<String, f64>);

impl SensorReadings {
    /// Reading for the channel at `wavelength` nm.
    pub fn channel(&self, wavelength: u16) -> Option<f64> {
        self.0.get(&channel_key(wavelength)).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The readings as a JSON object, as published on the wire.
    pub fn to_map(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(k, v)| {
                let value = serde_json::Number::from_f64(*v)
                    .map(Value::Number)
                    .unwrap_or(Value::Null);
                (k.clone(), value)
            })
            .collect()
    }
}

/// Channel key for a wavelength, e.g. `ch410`.
pub fn channel_key(wavelength: u16) -> String {
    format!("ch{}", wavelength)
}

/// The exact set of channel keys a reading must carry.
pub fn channel_keys() -> Vec<String> {
    WAVELENGTHS.iter().map(|w| channel_key(*w)).collect()
}

/// Run one simulated experiment.
pub fn run_color_experiment(command: ColorCommand) -> SensorReadings {
    let (r, g, b) = (
        f64::from(command.r),
        f64::from(command.g),
        f64::from(command.b),
    );

    let readings = WAVELENGTHS
        .iter()
        .enumerate()
        .map(|(i, wavelength)| {
            let value = RED_WEIGHTS[i] * r + GREEN_WEIGHTS[i] * g + BLUE_WEIGHTS[i] * b;
            (channel_key(*wavelength), value)
        })
        .collect();

    SensorReadings(readings)
}
