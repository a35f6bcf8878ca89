//! Wire type codes and the inbound message model.
//!
//! Uses enums with `TryFrom`; unknown codes are errors, never panics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

// ── MessageType ──────────────────────────────────────────────────

/// The `type` discriminator carried in every envelope.
///
/// - `1`:       Feedback from the peer
/// - `2`, `10`: State (plain and calculated)
/// - `20..=40`: Commands sent by this client
#[repr(i64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Per-command execution feedback.
    Feedback = 1,
    /// Periodic robot state.
    State = 2,
    /// State computed by the peer (e.g. forward kinematics).
    CalculatedState = 10,
    /// Joint trajectory command.
    Trajectory = 20,
    /// Joint position command.
    Position = 30,
    /// Joint velocity command.
    Velocity = 31,
    /// Joint effort command.
    Effort = 32,
    /// Joypad buttons/axes command.
    Joypad = 40,
}

impl MessageType {
    /// The logical inbound channel this type is routed to, if any.
    pub fn channel(self) -> Option<Channel> {
        match self {
            MessageType::Feedback => Some(Channel::Feedback),
            MessageType::State | MessageType::CalculatedState => Some(Channel::State),
            _ => None,
        }
    }
}

impl TryFrom<i64> for MessageType {
    type Error = DecodeError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Feedback),
            2 => Ok(MessageType::State),
            10 => Ok(MessageType::CalculatedState),
            20 => Ok(MessageType::Trajectory),
            30 => Ok(MessageType::Position),
            31 => Ok(MessageType::Velocity),
            32 => Ok(MessageType::Effort),
            40 => Ok(MessageType::Joypad),
            _ => Err(DecodeError::UnknownKind(value)),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Feedback => "Feedback",
            MessageType::State => "State",
            MessageType::CalculatedState => "CalculatedState",
            MessageType::Trajectory => "Trajectory",
            MessageType::Position => "Position",
            MessageType::Velocity => "Velocity",
            MessageType::Effort => "Effort",
            MessageType::Joypad => "Joypad",
        };
        write!(f, "{name}")
    }
}

// ── Channel ──────────────────────────────────────────────────────

/// The two logical inbound streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Feedback,
    State,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Feedback => write!(f, "feedback"),
            Channel::State => write!(f, "state"),
        }
    }
}

// ── InboundMessage ───────────────────────────────────────────────

/// Body shared by feedback and state messages.
///
/// The payload layout belongs to the upstream robot API, so it is kept as an
/// opaque MessagePack value: binary fields and non-string map keys survive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// Raw `type` code from the envelope (1, 2 or 10).
    pub type_code: i64,
    /// The `name_publisher` field, when the peer sent one.
    pub publisher: Option<String>,
    /// Decoded payload.
    pub payload: rmpv::Value,
}

impl Telemetry {
    /// Look up a string-keyed payload field.
    pub fn field(&self, key: &str) -> Option<&rmpv::Value> {
        self.payload
            .as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }
}

/// A decoded message, tagged by the stream it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Feedback(Telemetry),
    State(Telemetry),
}

impl InboundMessage {
    pub fn channel(&self) -> Channel {
        match self {
            InboundMessage::Feedback(_) => Channel::Feedback,
            InboundMessage::State(_) => Channel::State,
        }
    }

    pub fn telemetry(&self) -> &Telemetry {
        match self {
            InboundMessage::Feedback(t) | InboundMessage::State(t) => t,
        }
    }

    pub fn into_telemetry(self) -> Telemetry {
        match self {
            InboundMessage::Feedback(t) | InboundMessage::State(t) => t,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_convert() {
        assert_eq!(MessageType::try_from(1).unwrap(), MessageType::Feedback);
        assert_eq!(MessageType::try_from(10).unwrap(), MessageType::CalculatedState);
        assert_eq!(MessageType::try_from(31).unwrap(), MessageType::Velocity);
    }

    #[test]
    fn unknown_code_is_an_error() {
        assert_eq!(
            MessageType::try_from(99),
            Err(DecodeError::UnknownKind(99))
        );
    }

    #[test]
    fn only_feedback_and_state_route_to_channels() {
        assert_eq!(MessageType::Feedback.channel(), Some(Channel::Feedback));
        assert_eq!(MessageType::State.channel(), Some(Channel::State));
        assert_eq!(MessageType::CalculatedState.channel(), Some(Channel::State));
        assert_eq!(MessageType::Velocity.channel(), None);
    }

    #[test]
    fn field_lookup_skips_non_string_keys() {
        let telemetry = Telemetry {
            type_code: 2,
            publisher: None,
            payload: rmpv::Value::Map(vec![
                (rmpv::Value::from(1), rmpv::Value::from("one")),
                (rmpv::Value::from("seq"), rmpv::Value::from(4)),
            ]),
        };
        assert_eq!(telemetry.field("seq").and_then(rmpv::Value::as_i64), Some(4));
        assert_eq!(telemetry.field("1"), None);

        let scalar = Telemetry {
            payload: rmpv::Value::Nil,
            ..telemetry
        };
        assert_eq!(scalar.field("seq"), None);
    }
}
