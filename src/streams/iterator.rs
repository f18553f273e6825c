//! Shard iterator codec.
//!
//! Iterators are self-describing: a URL-safe base64 blob encoding the
//! stream and the last-consumed sequence number. Positions that have been
//! pruned away are served from the earliest surviving record.

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PdbError, Result};

/// The single logical shard every stream exposes.
pub const SHARD_ID: &str = "shardId-000000000001";

/// Reading policy for a new iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShardIteratorType {
    TrimHorizon,
    Latest,
    AtSequenceNumber,
    AfterSequenceNumber,
}

/// Decoded iterator state: read records with `sequence_no > after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardIterator {
    #[serde(rename = "s")]
    pub stream_id: String,
    #[serde(rename = "a")]
    pub after: i64,
}

impl ShardIterator {
    pub fn encode(&self) -> String {
        let json = serde_json::to_string(self).expect("iterator state serializes");
        BASE64_URL_SAFE_NO_PAD.encode(json.as_bytes())
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(token.as_bytes())
            .map_err(|_| PdbError::validation("malformed shard iterator"))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| PdbError::validation("malformed shard iterator"))
    }
}
