//! Wire format: one JSON envelope per line.
//!
//! ```text
//! {"type":"TX","from":"127.0.0.1:6001","body":{...}}
//! ```
//!
//! `type` selects the body schema. Unknown kinds are surfaced as
//! [`Inbound::Unknown`] so a newer peer cannot knock an older one offline.

use crate::error::DecodeError;
use proco_core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const KIND_PING: &str = "PING";
pub const KIND_PONG: &str = "PONG";
pub const KIND_PEER_LIST: &str = "PEER_LIST";
pub const KIND_TX: &str = "TX";
pub const KIND_BLOCK: &str = "BLOCK";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Ping,
    Pong,
    PeerList(Vec<String>),
    Tx(Transaction),
    Block(Block),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ping => KIND_PING,
            Message::Pong => KIND_PONG,
            Message::PeerList(_) => KIND_PEER_LIST,
            Message::Tx(_) => KIND_TX,
            Message::Block(_) => KIND_BLOCK,
        }
    }

    pub fn to_envelope(&self, from: &str) -> Result<Envelope, serde_json::Error> {
        let body = match self {
            Message::Ping | Message::Pong => None,
            Message::PeerList(peers) => Some(serde_json::to_value(peers)?),
            Message::Tx(tx) => Some(serde_json::to_value(tx)?),
            Message::Block(block) => Some(serde_json::to_value(block)?),
        };
        Ok(Envelope {
            kind: self.kind().to_string(),
            from: from.to_string(),
            body,
        })
    }
}

/// A decoded line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Known { from: String, message: Message },
    Unknown { from: String, kind: String },
}

fn body<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    body: Option<Value>,
) -> Result<T, DecodeError> {
    let value = body.ok_or(DecodeError::MissingBody(kind))?;
    serde_json::from_value(value).map_err(|source| DecodeError::Body { kind, source })
}

pub fn decode(envelope: Envelope) -> Result<Inbound, DecodeError> {
    let Envelope { kind, from, body: raw } = envelope;
    let message = match kind.as_str() {
        KIND_PING => Message::Ping,
        KIND_PONG => Message::Pong,
        KIND_PEER_LIST => Message::PeerList(body(KIND_PEER_LIST, raw)?),
        KIND_TX => Message::Tx(body(KIND_TX, raw)?),
        KIND_BLOCK => Message::Block(body(KIND_BLOCK, raw)?),
        _ => return Ok(Inbound::Unknown { from, kind }),
    };
    Ok(Inbound::Known { from, message })
}

/// Parses one line, with or without its trailing newline.
pub fn decode_line(line: &[u8]) -> Result<Inbound, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(line.trim_ascii_end())?;
    decode(envelope)
}

/// Serializes `message` as a newline-terminated line stamped with `from`.
pub fn encode_line(message: &Message, from: &str) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(&message.to_envelope(from)?)?;
    line.push(b'\n');
    Ok(line)
}
