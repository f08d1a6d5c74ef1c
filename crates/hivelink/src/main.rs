//! Hivelink binary entry point.
//!
//! Usage:
//!   hivelink initiate [--commands FILE] [--out DIR]
//!   hivelink respond [--config FILE]
//!   hivelink verify [--dir DIR]
//!   hivelink demo [--out DIR]
//!
//! Broker settings come from `HIVEMQ_HOST`, `HIVEMQ_USERNAME`,
//! `HIVEMQ_PASSWORD` and `COURSE_ID`, or from a device config file for the
//! responder.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use color_experiment::Gemstone;
use hivelink::{
    connect_mqtt, spawn_heartbeat, verify, BrokerSettings, ColorExperiment, Correlator,
    ExchangeTimeouts, Fields, MemoryBroker, QoS, Responder, ResponderSettings, RunRecord, Topics,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Correlated command/result exchange over a pub/sub broker.
#[derive(Parser, Debug)]
#[command(name = "hivelink")]
#[command(about = "Send tagged commands to a remote responder and collect the matching results")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Publish a batch of commands and record the matching results
    Initiate {
        /// JSON array of command objects. Defaults to the gemstone presets.
        #[arg(long)]
        commands: Option<PathBuf>,

        /// Directory for payload_dicts.json and results.json
        #[arg(long, default_value = ".")]
        out: PathBuf,

        /// Longest silence tolerated while waiting for a result, in seconds
        #[arg(long, env = "HIVELINK_QUEUE_TIMEOUT_SECS", default_value = "30")]
        queue_timeout: u64,

        /// Total budget per exchange, in seconds
        #[arg(long, env = "HIVELINK_OVERALL_TIMEOUT_SECS", default_value = "300")]
        overall_timeout: u64,

        /// Pause between exchanges, in milliseconds
        #[arg(long, default_value = "1000")]
        pause_ms: u64,

        /// Wait after connecting before the first command, in seconds
        #[arg(long, default_value = "5")]
        settle_secs: u64,
    },

    /// Serve commands until interrupted
    Respond {
        /// Device config file (JSON). Falls back to the environment.
        #[arg(long, env = "HIVELINK_DEVICE_CONFIG")]
        config: Option<PathBuf>,

        /// Pause before publishing each result, in milliseconds
        #[arg(long, default_value = "0")]
        reply_delay_ms: u64,

        /// Interval of the liveness log line, in seconds
        #[arg(long, default_value = "5")]
        heartbeat_secs: u64,
    },

    /// Check a recorded run
    Verify {
        /// Directory holding payload_dicts.json and results.json
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Run the gemstone batch against an in-process broker and responder
    Demo {
        /// Also write the run record to this directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn service_name(command: &Commands) -> &'static str {
    match command {
        Commands::Initiate { .. } => "initiator",
        Commands::Respond { .. } => "responder",
        Commands::Verify { .. } => "verify",
        Commands::Demo { .. } => "demo",
    }
}

fn gemstone_commands() -> Vec<Fields> {
    Gemstone::ALL.iter().map(|g| g.command().to_map()).collect()
}

fn load_commands(path: &Path) -> anyhow::Result<Vec<Fields>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read commands from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of objects", path.display()))
}

fn report(record: &RunRecord) -> anyhow::Result<()> {
    let violations = verify(record);
    if violations.is_empty() {
        info!(exchanges = record.len(), "Run record verified");
        return Ok(());
    }
    for violation in &violations {
        error!(violation = %violation, "Run record violation");
    }
    bail!("{} violation(s) found", violations.len())
}

async fn initiate(
    commands: Option<PathBuf>,
    out: PathBuf,
    timeouts: ExchangeTimeouts,
    pause: Duration,
    settle: Duration,
) -> anyhow::Result<()> {
    let commands = match commands {
        Some(path) => load_commands(&path)?,
        None => gemstone_commands(),
    };

    let settings = BrokerSettings::from_env()?;
    let topics = Topics::new(&settings.namespace);
    let connection = connect_mqtt(&settings, &topics.result, QoS::STRONGEST)
        .await
        .context("failed to connect to broker")?;

    info!(settle_secs = settle.as_secs(), "Connected, letting subscriptions settle");
    tokio::time::sleep(settle).await;

    let correlator = Correlator::new(Arc::new(connection), topics, timeouts);
    let record = correlator.run_batch(commands, pause).await?;
    record.write(&out)?;
    Ok(())
}

async fn respond(config: Option<PathBuf>, settings: ResponderSettings) -> anyhow::Result<()> {
    let broker = match config {
        Some(path) => BrokerSettings::load_from_file(&path)?,
        None => BrokerSettings::from_env()?,
    };
    let topics = Topics::new(&broker.namespace);
    let connection = connect_mqtt(&broker, &topics.command, QoS::STRONGEST)
        .await
        .context("failed to connect to broker")?;

    let heartbeat = spawn_heartbeat(settings.heartbeat_interval);
    let responder = Responder::new(
        Arc::new(connection),
        topics,
        Arc::new(ColorExperiment),
        settings,
    );

    let result = tokio::select! {
        result = responder.run() => result.map_err(anyhow::Error::from),
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, exiting...");
            Ok(())
        }
    };
    heartbeat.abort();
    result
}

async fn demo(out: Option<PathBuf>) -> anyhow::Result<()> {
    let broker = MemoryBroker::new();
    let topics = Topics::new("demo");

    let responder_conn = broker.connect(&topics.command, QoS::STRONGEST).await?;
    let responder = Responder::new(
        Arc::new(responder_conn),
        topics.clone(),
        Arc::new(ColorExperiment),
        ResponderSettings::default(),
    );
    let serving = tokio::spawn(async move { responder.run().await });

    let initiator_conn = broker.connect(&topics.result, QoS::STRONGEST).await?;
    let timeouts = ExchangeTimeouts {
        queue_timeout: Duration::from_secs(5),
        overall_timeout: Duration::from_secs(30),
    };
    let correlator = Correlator::new(Arc::new(initiator_conn), topics, timeouts);
    let outcome = correlator
        .run_batch(gemstone_commands(), Duration::from_millis(100))
        .await;
    serving.abort();

    let record = outcome?;
    for result in &record.results {
        info!(
            experiment_id = %result.experiment_id,
            command = %serde_json::Value::Object(result.command.clone()),
            sensor_data = %serde_json::Value::Object(result.sensor_data.clone()),
            "Exchange complete"
        );
    }
    if let Some(dir) = out {
        record.write(&dir)?;
    }
    report(&record)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: service_name(&cli.command).into(),
        default_level: cli.log_level.clone(),
        also_stderr: true,
        ..Default::default()
    });

    let outcome = match cli.command {
        Commands::Initiate {
            commands,
            out,
            queue_timeout,
            overall_timeout,
            pause_ms,
            settle_secs,
        } => {
            let timeouts = ExchangeTimeouts {
                queue_timeout: Duration::from_secs(queue_timeout),
                overall_timeout: Duration::from_secs(overall_timeout),
            };
            initiate(
                commands,
                out,
                timeouts,
                Duration::from_millis(pause_ms),
                Duration::from_secs(settle_secs),
            )
            .await
        }
        Commands::Respond {
            config,
            reply_delay_ms,
            heartbeat_secs,
        } => {
            let settings = ResponderSettings {
                reply_delay: Duration::from_millis(reply_delay_ms),
                heartbeat_interval: Duration::from_secs(heartbeat_secs.max(1)),
            };
            respond(config, settings).await
        }
        Commands::Verify { dir } => {
            let record = RunRecord::load(&dir)
                .with_context(|| format!("cannot load run record from {}", dir.display()))?;
            report(&record)
        }
        Commands::Demo { out } => demo(out).await,
    };

    if let Err(e) = &outcome {
        warn!(error = %e, "hivelink exiting with error");
    }
    outcome
}
