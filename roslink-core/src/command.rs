//! Outbound command values.

use serde::{Deserialize, Serialize};

use crate::message::MessageType;

/// Publisher name used for joypad commands, which carry no name of their own.
pub const JOYPAD_PUBLISHER: &str = "joypad";

/// One point of a joint trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajPoint {
    pub positions: Vec<f64>,
    pub velocities: Vec<f64>,
    /// Optional; sent as an empty list when not provided.
    #[serde(default)]
    pub accelerations: Vec<f64>,
    pub effort: Vec<f64>,
    pub seconds: i32,
    pub nanoseconds: u32,
}

impl TrajPoint {
    pub fn new(positions: Vec<f64>, velocities: Vec<f64>, effort: Vec<f64>) -> Self {
        Self {
            positions,
            velocities,
            accelerations: Vec::new(),
            effort,
            seconds: 0,
            nanoseconds: 0,
        }
    }

    /// Time from trajectory start at which this point should be reached.
    pub fn at(mut self, seconds: i32, nanoseconds: u32) -> Self {
        self.seconds = seconds;
        self.nanoseconds = nanoseconds;
        self
    }

    pub fn with_accelerations(mut self, accelerations: Vec<f64>) -> Self {
        self.accelerations = accelerations;
        self
    }
}

/// A robot-control command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Velocity { values: Vec<f64>, name: String },
    Position { values: Vec<f64>, name: String },
    Effort { values: Vec<f64>, name: String },
    Trajectory { points: Vec<TrajPoint>, name: String },
    Joypad { buttons: Vec<i32>, axes: Vec<f64> },
}

impl Command {
    pub fn message_type(&self) -> MessageType {
        match self {
            Command::Velocity { .. } => MessageType::Velocity,
            Command::Position { .. } => MessageType::Position,
            Command::Effort { .. } => MessageType::Effort,
            Command::Trajectory { .. } => MessageType::Trajectory,
            Command::Joypad { .. } => MessageType::Joypad,
        }
    }

    /// The `name_publisher` the command is sent under.
    pub fn publisher(&self) -> &str {
        match self {
            Command::Velocity { name, .. }
            | Command::Position { name, .. }
            | Command::Effort { name, .. }
            | Command::Trajectory { name, .. } => name,
            Command::Joypad { .. } => JOYPAD_PUBLISHER,
        }
    }
}
