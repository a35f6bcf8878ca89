//! MessagePack envelope codec.
//!
//! Every message on the wire is a MessagePack map:
//!
//! ```text
//! {
//!     "type":           int,     // see MessageType
//!     "name_publisher": string,
//!     "payload":        any,     // layout owned by the robot API
//! }
//! ```
//!
//! Inbound payloads are kept as [`rmpv::Value`], so binary fields and
//! integer map keys decode like any other payload.
//!
//! Outbound commands are encoded from [`Command`]; inbound frames are decoded
//! into [`InboundMessage`]. Decoding never allocates beyond what the input
//! length allows, and frames above the configured limit are rejected before
//! any parsing.

pub mod frame;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::command::{Command, TrajPoint};
use crate::error::{DecodeError, EncodeError};
use crate::message::{Channel, InboundMessage, MessageType, Telemetry};

pub use frame::{FrameCodec, FrameFormat, MsgPackFrameCodec};

/// Default upper bound for a single frame (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

// ── Wire structs ─────────────────────────────────────────────────

#[derive(Serialize)]
struct Envelope<'a, P> {
    #[serde(rename = "type")]
    kind: i64,
    name_publisher: &'a str,
    payload: P,
}

#[derive(Serialize)]
struct JointValues<'a> {
    joint_values: &'a [f64],
}

#[derive(Serialize)]
struct JointTrajectory<'a> {
    joint_traj_points: &'a [TrajPoint],
}

#[derive(Serialize)]
struct JoypadInput<'a> {
    buttons: &'a [i32],
    axes: &'a [f64],
}

/// First decoding pass: only the discriminator, the payload is skipped.
#[derive(Deserialize)]
struct Header {
    #[serde(rename = "type")]
    kind: i64,
}

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    kind: i64,
    #[serde(default)]
    name_publisher: Option<String>,
    #[serde(default = "nil")]
    payload: rmpv::Value,
}

fn nil() -> rmpv::Value {
    rmpv::Value::Nil
}

// ── MessageCodec ─────────────────────────────────────────────────

/// Encodes commands and decodes inbound envelopes.
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_frame_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl MessageCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode a command into one MessagePack envelope.
    pub fn encode(&self, command: &Command) -> Result<Bytes, EncodeError> {
        let kind = command.message_type() as i64;
        let name_publisher = command.publisher();

        let bytes = match command {
            Command::Velocity { values, .. }
            | Command::Position { values, .. }
            | Command::Effort { values, .. } => {
                ensure_finite("joint_values", values)?;
                to_vec(&Envelope {
                    kind,
                    name_publisher,
                    payload: JointValues {
                        joint_values: values,
                    },
                })?
            }
            Command::Trajectory { points, .. } => {
                for point in points {
                    ensure_finite("positions", &point.positions)?;
                    ensure_finite("velocities", &point.velocities)?;
                    ensure_finite("accelerations", &point.accelerations)?;
                    ensure_finite("effort", &point.effort)?;
                }
                to_vec(&Envelope {
                    kind,
                    name_publisher,
                    payload: JointTrajectory {
                        joint_traj_points: points,
                    },
                })?
            }
            Command::Joypad { buttons, axes } => {
                ensure_finite("axes", axes)?;
                to_vec(&Envelope {
                    kind,
                    name_publisher,
                    payload: JoypadInput { buttons, axes },
                })?
            }
        };

        if bytes.len() > self.max_frame_size {
            return Err(EncodeError::Serialize(format!(
                "encoded command is {} bytes (max {})",
                bytes.len(),
                self.max_frame_size
            )));
        }
        Ok(Bytes::from(bytes))
    }

    /// Decode one inbound frame.
    pub fn decode(&self, bytes: &[u8]) -> Result<InboundMessage, DecodeError> {
        if bytes.len() > self.max_frame_size {
            return Err(DecodeError::Malformed(format!(
                "frame is {} bytes (max {})",
                bytes.len(),
                self.max_frame_size
            )));
        }

        let header: Header = rmp_serde::from_slice(bytes)?;
        let channel = match MessageType::try_from(header.kind)?.channel() {
            Some(channel) => channel,
            None => return Err(DecodeError::UnknownKind(header.kind)),
        };

        let envelope: InboundEnvelope = rmp_serde::from_slice(bytes)?;
        let telemetry = Telemetry {
            type_code: envelope.kind,
            publisher: envelope.name_publisher,
            payload: envelope.payload,
        };

        Ok(match channel {
            Channel::Feedback => InboundMessage::Feedback(telemetry),
            Channel::State => InboundMessage::State(telemetry),
        })
    }
}

/// Encode an inbound message the way a peer would send it.
///
/// Used by tests and local peer simulations; the client itself never sends
/// feedback or state.
pub fn encode_inbound(message: &InboundMessage) -> Result<Bytes, EncodeError> {
    let telemetry = message.telemetry();
    let bytes = to_vec(&Envelope {
        kind: telemetry.type_code,
        name_publisher: telemetry.publisher.as_deref().unwrap_or_default(),
        payload: &telemetry.payload,
    })?;
    Ok(Bytes::from(bytes))
}

fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

fn ensure_finite(field: &'static str, values: &[f64]) -> Result<(), EncodeError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(EncodeError::NonFinite { field })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmpv::Value;
    use serde_json::json;

    fn raw_envelope(kind: i64, payload: serde_json::Value) -> Vec<u8> {
        rmp_serde::to_vec_named(&json!({
            "type": kind,
            "name_publisher": "arm",
            "payload": payload,
        }))
        .unwrap()
    }

    /// Envelope with an arbitrary MessagePack payload, as a peer's
    /// `msgpack.packb` would write it.
    fn raw_value_envelope(kind: i64, payload: Value) -> Vec<u8> {
        let envelope = Value::Map(vec![
            (Value::from("type"), Value::from(kind)),
            (Value::from("name_publisher"), Value::from("arm")),
            (Value::from("payload"), payload),
        ]);
        let mut out = Vec::new();
        rmpv::encode::write_value(&mut out, &envelope).unwrap();
        out
    }

    #[test]
    fn velocity_encodes_as_named_map() {
        let codec = MessageCodec::default();
        let cmd = Command::Velocity {
            values: vec![1.0, 2.0, 3.0],
            name: "velocity_publisher".into(),
        };
        let bytes = codec.encode(&cmd).unwrap();

        let value: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], 31);
        assert_eq!(value["name_publisher"], "velocity_publisher");
        assert_eq!(value["payload"]["joint_values"], json!([1.0, 2.0, 3.0]));
    }

    #[test]
    fn trajectory_carries_all_point_fields() {
        let codec = MessageCodec::default();
        let cmd = Command::Trajectory {
            points: vec![TrajPoint::new(vec![0.5], vec![0.1], vec![]).at(1, 250)],
            name: "traj".into(),
        };
        let bytes = codec.encode(&cmd).unwrap();

        let value: serde_json::Value = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], 20);
        let point = &value["payload"]["joint_traj_points"][0];
        assert_eq!(point["positions"], json!([0.5]));
        assert_eq!(point["accelerations"], json!([]));
        assert_eq!(point["seconds"], 1);
        assert_eq!(point["nanoseconds"], 250);
    }

    #[test]
    fn joypad_payload() {
        let codec = MessageCodec::default();
        let cmd = Command::Joypad {
            buttons: vec![1, 0, 1],
            axes: vec![-0.5, 0.25],
        };
        let value: serde_json::Value =
            rmp_serde::from_slice(&codec.encode(&cmd).unwrap()).unwrap();
        assert_eq!(value["type"], 40);
        assert_eq!(value["payload"]["buttons"], json!([1, 0, 1]));
        assert_eq!(value["payload"]["axes"], json!([-0.5, 0.25]));
    }

    #[test]
    fn empty_sequences_are_allowed() {
        let codec = MessageCodec::default();
        let cmd = Command::Effort {
            values: vec![],
            name: "effort".into(),
        };
        assert!(codec.encode(&cmd).is_ok());
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let codec = MessageCodec::default();
        let cmd = Command::Position {
            values: vec![1.0, f64::NAN],
            name: "pos".into(),
        };
        assert_eq!(
            codec.encode(&cmd),
            Err(EncodeError::NonFinite {
                field: "joint_values"
            })
        );
    }

    #[test]
    fn decode_routes_by_type() {
        let codec = MessageCodec::default();

        let fb = codec
            .decode(&raw_envelope(1, json!({"status": "ok"})))
            .unwrap();
        assert_eq!(fb.channel(), Channel::Feedback);
        assert_eq!(fb.telemetry().payload["status"].as_str(), Some("ok"));
        assert_eq!(fb.telemetry().publisher.as_deref(), Some("arm"));

        let st = codec.decode(&raw_envelope(2, json!({"q": [0.0]}))).unwrap();
        assert_eq!(st.channel(), Channel::State);

        let calc = codec.decode(&raw_envelope(10, json!({}))).unwrap();
        assert_eq!(calc.channel(), Channel::State);
        assert_eq!(calc.telemetry().type_code, 10);
    }

    #[test]
    fn integer_keyed_payload_is_kept() {
        let codec = MessageCodec::default();
        let payload = Value::Map(vec![(Value::from(1), Value::from(0.5))]);

        let st = codec.decode(&raw_value_envelope(2, payload.clone())).unwrap();
        assert_eq!(st.channel(), Channel::State);
        assert_eq!(st.telemetry().payload, payload);
    }

    #[test]
    fn binary_payload_is_kept() {
        let codec = MessageCodec::default();
        let payload = Value::Binary(vec![0xde, 0xad]);

        let st = codec.decode(&raw_value_envelope(2, payload)).unwrap();
        assert_eq!(st.channel(), Channel::State);
        assert_eq!(st.telemetry().payload.as_slice(), Some(&[0xde, 0xad][..]));

        let nested = Value::Map(vec![(Value::from("image"), Value::Binary(vec![1, 2, 3]))]);
        let fb = codec.decode(&raw_value_envelope(1, nested)).unwrap();
        assert_eq!(fb.channel(), Channel::Feedback);
        assert_eq!(
            fb.telemetry().field("image").and_then(Value::as_slice),
            Some(&[1, 2, 3][..])
        );
    }

    #[test]
    fn missing_payload_decodes_as_nil() {
        let codec = MessageCodec::default();
        let bytes = rmp_serde::to_vec_named(&json!({ "type": 1 })).unwrap();
        let fb = codec.decode(&bytes).unwrap();
        assert_eq!(fb.telemetry().payload, Value::Nil);
        assert_eq!(fb.telemetry().publisher, None);
    }

    #[test]
    fn unknown_kind_is_reported() {
        let codec = MessageCodec::default();
        assert_eq!(
            codec.decode(&raw_envelope(77, json!({}))),
            Err(DecodeError::UnknownKind(77))
        );
        // A command type echoed back is not an inbound kind either.
        assert_eq!(
            codec.decode(&raw_envelope(31, json!({}))),
            Err(DecodeError::UnknownKind(31))
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = MessageCodec::default();
        assert!(matches!(
            codec.decode(&[0xc1]),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            codec.decode(b"\x05"),
            Err(DecodeError::Malformed(_))
        ));
        // A map that declares far more entries than the input holds.
        assert!(matches!(
            codec.decode(&[0xdf, 0xff, 0xff, 0xff, 0xff]),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected_before_parsing() {
        let codec = MessageCodec::new(8);
        let bytes = raw_envelope(1, json!({"long": "xxxxxxxxxxxxxxxx"}));
        assert!(matches!(
            codec.decode(&bytes),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn inbound_round_trip() {
        let codec = MessageCodec::default();
        let original = InboundMessage::State(Telemetry {
            type_code: 2,
            publisher: Some("joint_states".into()),
            payload: Value::Map(vec![
                (
                    Value::from("position"),
                    Value::Array(vec![Value::from(0.5), Value::from(-1.25)]),
                ),
                (Value::from(3), Value::Binary(vec![7, 7])),
            ]),
        });
        let bytes = encode_inbound(&original).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), original);
    }
}
