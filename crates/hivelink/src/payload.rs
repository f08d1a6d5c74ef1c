//! Wire payloads and topic names.
//!
//! Both directions carry a UTF-8 JSON object:
//!
//! ```text
//! command: {"command": {...}, "experiment_id": "<token>"}
//! result:  {"command": {...}, "experiment_id": "<token>", "sensor_data": {...}}
//! ```

use crate::correlation::CorrelationId;
use crate::error::{HivelinkError, HivelinkResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel carrying commands from initiator to responder.
pub const COMMAND_CHANNEL: &str = "neopixel";

/// Channel carrying results from responder to initiator.
pub const RESULT_CHANNEL: &str = "as7341";

/// Opaque structured parameters or readings.
pub type Fields = Map<String, Value>;

/// A tagged command as published by the initiator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    pub command: Fields,
    pub experiment_id: CorrelationId,
}

impl CommandPayload {
    pub fn new(command: Fields, experiment_id: CorrelationId) -> Self {
        Self {
            command,
            experiment_id,
        }
    }

    pub fn encode(&self) -> HivelinkResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an inbound command, reporting any failure as `Malformed`.
    pub fn decode(bytes: &[u8]) -> HivelinkResult<Self> {
        decode_json(bytes, "command")
    }
}

/// A command echoed back with the readings appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    pub command: Fields,
    pub experiment_id: CorrelationId,
    pub sensor_data: Fields,
}

impl ResultPayload {
    /// Build the reply for `command`, copying its fields unchanged.
    pub fn for_command(command: CommandPayload, sensor_data: Fields) -> Self {
        Self {
            command: command.command,
            experiment_id: command.experiment_id,
            sensor_data,
        }
    }

    pub fn encode(&self) -> HivelinkResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an inbound result, reporting any failure as `Malformed`.
    pub fn decode(bytes: &[u8]) -> HivelinkResult<Self> {
        decode_json(bytes, "result")
    }

    /// Whether this result answers `command` field-for-field.
    pub fn answers(&self, command: &CommandPayload) -> bool {
        self.experiment_id == command.experiment_id && self.command == command.command
    }
}

fn decode_json<T: DeserializeOwned>(bytes: &[u8], what: &str) -> HivelinkResult<T> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| HivelinkError::Malformed(format!("{} payload is not UTF-8: {}", what, e)))?;
    serde_json::from_str(text)
        .map_err(|e| HivelinkError::Malformed(format!("{} payload rejected: {}", what, e)))
}

/// The pair of topics shared by initiator and responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub command: String,
    pub result: String,
}

impl Topics {
    /// Standard topics under `namespace`.
    pub fn new(namespace: &str) -> Self {
        Self::with_channels(namespace, COMMAND_CHANNEL, RESULT_CHANNEL)
    }

    pub fn with_channels(namespace: &str, command_channel: &str, result_channel: &str) -> Self {
        Self {
            command: format!("{}/{}", namespace, command_channel),
            result: format!("{}/{}", namespace, result_channel),
        }
    }
}
