//! Payload encodings handed to the save hook and read back on restore.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Session payload: string keys mapped to JSON-shaped values.
pub type Payload = HashMap<String, serde_json::Value>;

/// How a payload is serialized for persistence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadCodec {
    /// Plain JSON text.
    #[default]
    Json,
    /// Compact binary MessagePack.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl PayloadCodec {
    /// Encode the full payload.
    pub fn encode(&self, payload: &Payload) -> Result<Vec<u8>> {
        match self {
            PayloadCodec::Json => {
                serde_json::to_vec(payload).map_err(|e| Error::Codec(e.to_string()))
            }
            PayloadCodec::MessagePack => {
                rmp_serde::to_vec(payload).map_err(|e| Error::Codec(e.to_string()))
            }
        }
    }

    /// Decode a payload previously produced by [`encode`](Self::encode).
    pub fn decode(&self, bytes: &[u8]) -> Result<Payload> {
        match self {
            PayloadCodec::Json => {
                serde_json::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))
            }
            PayloadCodec::MessagePack => {
                rmp_serde::from_slice(bytes).map_err(|e| Error::Codec(e.to_string()))
            }
        }
    }
}

impl std::fmt::Display for PayloadCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadCodec::Json => write!(f, "json"),
            PayloadCodec::MessagePack => write!(f, "msgpack"),
        }
    }
}
