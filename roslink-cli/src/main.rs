//! roslink command-line client.
//!
//! ```text
//! roslink-cli gen-config                      Print the default config TOML
//! roslink-cli listen [--channel feedback]     Print telemetry as JSON lines
//! roslink-cli velocity <name> <values>...     Send joint velocities
//! roslink-cli position <name> <values>...     Send joint positions
//! roslink-cli effort <name> <values>...       Send joint efforts
//! roslink-cli trajectory <name> --points f    Send a trajectory from JSON/TOML
//! roslink-cli joypad --buttons .. --axes ..   Send a joypad state
//! roslink-cli --config <path> ...             Load a custom config TOML
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use roslink_core::{Command, ConnectionManager, InboundMessage, SdkConfig, TrajPoint};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "roslink-cli", about = "roslink robot-control client")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "roslink.toml")]
    config: PathBuf,

    /// Override the configured transport ("TCP", "UDS" or "0MQ").
    #[arg(short, long)]
    transport: Option<String>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the default configuration, or write it to a file.
    GenConfig {
        #[arg(long)]
        write: Option<PathBuf>,
    },

    /// Subscribe to telemetry and print each message as a JSON line.
    Listen {
        #[arg(long, value_enum, default_value_t = Which::Both)]
        channel: Which,

        /// Exit after this many messages.
        #[arg(long)]
        count: Option<usize>,
    },

    /// Send joint velocities.
    Velocity {
        name: String,
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f64>,
        #[command(flatten)]
        repeat: Repeat,
    },

    /// Send joint positions.
    Position {
        name: String,
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f64>,
        #[command(flatten)]
        repeat: Repeat,
    },

    /// Send joint efforts.
    Effort {
        name: String,
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f64>,
        #[command(flatten)]
        repeat: Repeat,
    },

    /// Send a joint trajectory read from a file.
    Trajectory {
        name: String,
        /// JSON or TOML file with a `points` list (chosen by extension).
        #[arg(long)]
        points: PathBuf,
        #[command(flatten)]
        repeat: Repeat,
    },

    /// Send a joypad state.
    Joypad {
        #[arg(long, value_delimiter = ',')]
        buttons: Vec<i32>,
        #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
        axes: Vec<f64>,
        #[command(flatten)]
        repeat: Repeat,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Which {
    Feedback,
    State,
    Both,
}

/// Pub/sub transports drop messages sent before the peer has subscribed,
/// so commands can be repeated.
#[derive(clap::Args, Debug, Clone, Copy)]
struct Repeat {
    /// Send the command this many times.
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Delay between repeats in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,
}

/// On-disk layout of a trajectory file.
#[derive(Deserialize, Debug)]
struct TrajectoryFile {
    points: Vec<TrajPoint>,
}

fn load_points(path: &Path) -> Result<Vec<TrajPoint>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)?;
    let file: TrajectoryFile = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text)?,
        _ => serde_json::from_str(&text)?,
    };
    Ok(file.points)
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // gen-config: dump defaults and exit.
    if let Action::GenConfig { write } = &cli.command {
        match write {
            Some(path) => {
                SdkConfig::write_default(path)?;
                println!("Wrote {}", path.display());
            }
            None => println!("{}", toml::to_string_pretty(&SdkConfig::default())?),
        }
        return Ok(());
    }

    // Read the trajectory before connecting so a bad file fails fast.
    let trajectory = match &cli.command {
        Action::Trajectory { points, .. } => Some(load_points(points)?),
        _ => None,
    };

    let mut config = SdkConfig::load(&cli.config);
    if let Some(tag) = cli.transport {
        config.connection.kind = tag;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("roslink-cli v{}", env!("CARGO_PKG_VERSION"));

    let options = config.connection.to_options()?;
    let manager = ConnectionManager::with_settings(config.manager_settings());
    manager.connect(options).await?;

    let result = match cli.command {
        Action::GenConfig { .. } => Ok(()),
        Action::Listen { channel, count } => listen(&manager, channel, count).await,
        Action::Velocity {
            name,
            values,
            repeat,
        } => send(&manager, Command::Velocity { values, name }, repeat).await,
        Action::Position {
            name,
            values,
            repeat,
        } => send(&manager, Command::Position { values, name }, repeat).await,
        Action::Effort {
            name,
            values,
            repeat,
        } => send(&manager, Command::Effort { values, name }, repeat).await,
        Action::Trajectory { name, repeat, .. } => {
            let points = trajectory.unwrap_or_default();
            send(&manager, Command::Trajectory { points, name }, repeat).await
        }
        Action::Joypad {
            buttons,
            axes,
            repeat,
        } => send(&manager, Command::Joypad { buttons, axes }, repeat).await,
    };

    manager.disconnect().await;
    result
}

async fn send(
    manager: &ConnectionManager,
    command: Command,
    repeat: Repeat,
) -> Result<(), Box<dyn std::error::Error>> {
    for i in 0..repeat.repeat.max(1) {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(repeat.interval_ms)).await;
        }
        manager.send(&command).await?;
    }
    info!(kind = %command.message_type(), publisher = command.publisher(), "sent");
    Ok(())
}

async fn listen(
    manager: &ConnectionManager,
    which: Which,
    count: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let feedback = manager.feedback_stream().subscribe().into_stream().boxed();
    let state = manager.state_stream().subscribe().into_stream().boxed();
    let mut messages = match which {
        Which::Feedback => feedback,
        Which::State => state,
        Which::Both => futures::stream::select(feedback, state).boxed(),
    };

    let mut states = manager.watch_state();
    let mut seen = 0usize;

    loop {
        tokio::select! {
            message = messages.next() => {
                let Some(message) = message else { break };
                println!("{}", render(&message));
                seen += 1;
                if count.is_some_and(|n| seen >= n) {
                    break;
                }
            }
            changed = states.changed() => {
                if changed.is_err() || !states.borrow_and_update().is_connected() {
                    warn!("connection lost");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }

    let stats = manager.stats();
    info!(
        received = stats.received,
        malformed = stats.malformed,
        unknown = stats.unknown_kind,
        "listen finished"
    );
    Ok(())
}

fn render(message: &Arc<InboundMessage>) -> serde_json::Value {
    let telemetry = message.telemetry();
    serde_json::json!({
        "channel": message.channel().to_string(),
        "type": telemetry.type_code,
        "publisher": telemetry.publisher,
        "payload": to_json(&telemetry.payload),
    })
}

/// MessagePack to JSON for display. Non-string map keys are printed as
/// strings, binary as a byte array and non-finite floats as `null`.
fn to_json(value: &rmpv::Value) -> serde_json::Value {
    use rmpv::Value;
    use serde_json::Value as Json;

    match value {
        Value::Nil => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Integer(n) => n
            .as_i64()
            .map(Json::from)
            .or_else(|| n.as_u64().map(Json::from))
            .unwrap_or(Json::Null),
        Value::F32(f) => float(f64::from(*f)),
        Value::F64(f) => float(*f),
        Value::String(s) => match s.as_str() {
            Some(s) => Json::from(s),
            None => Json::from(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        },
        Value::Binary(bytes) => Json::from(bytes.clone()),
        Value::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(entries) => Json::Object(
            entries
                .iter()
                .map(|(k, v)| (map_key(k), to_json(v)))
                .collect(),
        ),
        Value::Ext(kind, data) => serde_json::json!({ "ext": kind, "data": data }),
    }
}

fn float(f: f64) -> serde_json::Value {
    serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn map_key(key: &rmpv::Value) -> String {
    match key.as_str() {
        Some(s) => s.to_owned(),
        None => key.to_string(),
    }
}
