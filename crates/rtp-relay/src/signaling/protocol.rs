//! Signaling message formats
//!
//! Every message is a JSON object with a `type` discriminator. Inbound
//! messages are parsed leniently: anything that is not a well-formed
//! `answer`, `request` or `ready` is reported as an [`IgnoreReason`] and
//! dropped by the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Control message received from the remote peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Remote description for the current session
    Answer { sdp: String },
    /// Remote asks for the current offer again
    Request,
    /// Remote is ready and wants the current offer
    Ready,
}

/// Why an inbound message was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Not a JSON object
    Malformed,
    /// No string `type` field
    MissingType,
    /// `answer` without a string `sdp` field
    MissingSdp,
    /// Unhandled discriminator, including inbound `offer`
    Unknown(String),
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::Malformed => write!(f, "malformed payload"),
            IgnoreReason::MissingType => write!(f, "missing type field"),
            IgnoreReason::MissingSdp => write!(f, "answer without sdp"),
            IgnoreReason::Unknown(kind) => write!(f, "unhandled type '{}'", kind),
        }
    }
}

/// Parse one inbound text frame
pub fn parse_inbound(text: &str) -> Result<InboundMessage, IgnoreReason> {
    let value: Value = serde_json::from_str(text).map_err(|_| IgnoreReason::Malformed)?;
    let object = value.as_object().ok_or(IgnoreReason::Malformed)?;

    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(IgnoreReason::MissingType)?;

    match kind {
        "answer" => object
            .get("sdp")
            .and_then(Value::as_str)
            .map(|sdp| InboundMessage::Answer {
                sdp: sdp.to_string(),
            })
            .ok_or(IgnoreReason::MissingSdp),
        "request" => Ok(InboundMessage::Request),
        "ready" => Ok(InboundMessage::Ready),
        other => Err(IgnoreReason::Unknown(other.to_string())),
    }
}

/// Control message sent to the remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    /// Local offer addressed to the remote peer
    Offer { id: String, sdp: String },
}

impl OutboundMessage {
    pub fn offer(remote_id: impl Into<String>, sdp: impl Into<String>) -> Self {
        OutboundMessage::Offer {
            id: remote_id.into(),
            sdp: sdp.into(),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
