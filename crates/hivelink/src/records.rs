//! Run records.
//!
//! An initiator run leaves two files behind for later checking:
//! `payload_dicts.json` (every command as published, with its id) and
//! `results.json` (every matched result), both JSON arrays in run order.

use crate::correlation::CorrelationId;
use crate::error::HivelinkResult;
use crate::payload::{CommandPayload, ResultPayload};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use tracing::info;

pub const COMMANDS_FILE: &str = "payload_dicts.json";
pub const RESULTS_FILE: &str = "results.json";

/// Commands and results of one initiator run, index-aligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRecord {
    pub commands: Vec<CommandPayload>,
    pub results: Vec<ResultPayload>,
}

impl RunRecord {
    pub fn push(&mut self, command: CommandPayload, result: ResultPayload) {
        self.commands.push(command);
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Write both files into `dir`, creating it if needed.
    pub fn write(&self, dir: &Path) -> HivelinkResult<()> {
        std::fs::create_dir_all(dir)?;
        write_json(&dir.join(COMMANDS_FILE), &self.commands)?;
        write_json(&dir.join(RESULTS_FILE), &self.results)?;
        info!(
            dir = %dir.display(),
            commands = self.commands.len(),
            results = self.results.len(),
            "Run record written"
        );
        Ok(())
    }

    pub fn load(dir: &Path) -> HivelinkResult<Self> {
        Ok(Self {
            commands: read_json(&dir.join(COMMANDS_FILE))?,
            results: read_json(&dir.join(RESULTS_FILE))?,
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> HivelinkResult<()> {
    let mut content = serde_json::to_string_pretty(value)?;
    content.push('\n');
    std::fs::write(path, content)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> HivelinkResult<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// One problem found by [`verify`].
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    /// The two files hold a different number of entries
    CountMismatch { commands: usize, results: usize },
    /// The same id was used for more than one command
    DuplicateId(CorrelationId),
    /// Result at `index` carries another command's id
    IdMismatch {
        index: usize,
        expected: CorrelationId,
        found: CorrelationId,
    },
    /// Result at `index` does not echo its command's fields
    CommandMismatch { index: usize },
    /// Result at `index` has the wrong set of sensor channels
    ChannelMismatch { index: usize, found: Vec<String> },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::CountMismatch { commands, results } => {
                write!(f, "{} commands but {} results", commands, results)
            }
            Violation::DuplicateId(id) => write!(f, "experiment id {} used more than once", id),
            Violation::IdMismatch {
                index,
                expected,
                found,
            } => write!(
                f,
                "result {}: experiment id {} does not match command id {}",
                index, found, expected
            ),
            Violation::CommandMismatch { index } => {
                write!(f, "result {}: command does not match the one sent", index)
            }
            Violation::ChannelMismatch { index, found } => {
                write!(f, "result {}: unexpected sensor channels {:?}", index, found)
            }
        }
    }
}

/// Check a run record against the exchange guarantees.
pub fn verify(record: &RunRecord) -> Vec<Violation> {
    let mut violations = Vec::new();

    if record.commands.len() != record.results.len() {
        violations.push(Violation::CountMismatch {
            commands: record.commands.len(),
            results: record.results.len(),
        });
    }

    let mut seen = HashSet::new();
    for command in &record.commands {
        if !seen.insert(&command.experiment_id) {
            violations.push(Violation::DuplicateId(command.experiment_id.clone()));
        }
    }

    let expected_channels: BTreeSet<String> = color_experiment::channel_keys().into_iter().collect();

    for (index, (command, result)) in record.commands.iter().zip(&record.results).enumerate() {
        if result.experiment_id != command.experiment_id {
            violations.push(Violation::IdMismatch {
                index,
                expected: command.experiment_id.clone(),
                found: result.experiment_id.clone(),
            });
        }
        if result.command != command.command {
            violations.push(Violation::CommandMismatch { index });
        }
        let channels: BTreeSet<String> = result.sensor_data.keys().cloned().collect();
        if channels != expected_channels {
            violations.push(Violation::ChannelMismatch {
                index,
                found: channels.into_iter().collect(),
            });
        }
    }

    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Fields;
    use color_experiment::{run_color_experiment, ColorCommand, Gemstone};

    fn exchange(gem: Gemstone, id: &str) -> (CommandPayload, ResultPayload) {
        let color = gem.command();
        let command = CommandPayload::new(color.to_map(), id.into());
        let result =
            ResultPayload::for_command(command.clone(), run_color_experiment(color).to_map());
        (command, result)
    }

    fn sample() -> RunRecord {
        let mut record = RunRecord::default();
        for (gem, id) in Gemstone::ALL.into_iter().zip(["aa01", "bb02", "cc03"]) {
            let (command, result) = exchange(gem, id);
            record.push(command, result);
        }
        record
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let record = sample();
        record.write(dir.path()).unwrap();

        assert!(dir.path().join(COMMANDS_FILE).exists());
        assert!(dir.path().join(RESULTS_FILE).exists());

        let loaded = RunRecord::load(dir.path()).unwrap();
        assert_eq!(loaded, record);
        assert!(verify(&loaded).is_empty());
    }

    #[test]
    fn test_commands_file_shape() {
        let dir = tempfile::tempdir().unwrap();
        sample().write(dir.path()).unwrap();

        let raw = std::fs::read_to_string(dir.path().join(COMMANDS_FILE)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            value[0],
            serde_json::json!({"command": {"R": 15, "G": 82, "B": 186}, "experiment_id": "aa01"})
        );
    }

    #[test]
    fn test_load_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunRecord::load(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_verify_reports_each_violation() {
        let mut record = sample();
        record.results.swap(0, 1);
        let (extra, _) = exchange(Gemstone::Ruby, "aa01");
        record.commands.push(extra);

        let mut other: Fields = ColorCommand::new(1, 2, 3).to_map();
        other.insert("extra".into(), 1.into());
        record.results[2].command = other;
        record.results[2].sensor_data.remove("ch670");

        let violations = verify(&record);
        assert!(violations.contains(&Violation::CountMismatch {
            commands: 4,
            results: 3
        }));
        assert!(violations.contains(&Violation::DuplicateId("aa01".into())));
        assert!(violations
            .iter()
            .any(|v| matches!(v, Violation::IdMismatch { index: 0, .. })));
        assert!(violations.contains(&Violation::CommandMismatch { index: 2 }));
        assert!(violations
            .iter()
            .any(|v| matches!(v, Violation::ChannelMismatch { index: 2, found } if found.len() == 7)));
    }
}
