// Copyright (c) 2026 Meridian
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Signed announcement envelopes.
//!
//! Three announcement kinds share the same outer shape: the inner envelope is
//! serialized to canonical packed bytes, signed with the node's Ed25519 key,
//! and wrapped together with identity, hex signature, nanosecond timestamp
//! and kind tag. Only the envelope bytes are covered by the signature.

use crate::core::identity::{self, IdentityError};
use crate::core::timeid::TimeId;
use crate::core::types::{
    decode_canonical_limited, encode_canonical, CodecError, MAX_ENVELOPE_BYTES,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Announce errors.
#[derive(Debug, Error)]
pub enum AnnounceError {
    /// Encoding or decoding the envelope bytes failed.
    #[error("codec")]
    Codec,
    /// The signature does not verify over the envelope bytes.
    #[error("signature invalid")]
    SignatureInvalid,
}

impl From<CodecError> for AnnounceError {
    fn from(_: CodecError) -> Self {
        AnnounceError::Codec
    }
}

impl From<IdentityError> for AnnounceError {
    fn from(_: IdentityError) -> Self {
        AnnounceError::SignatureInvalid
    }
}

/// Kind tag of an announce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnounceKind {
    /// Unrecognized kind (never emitted).
    Unknown,
    /// Liveness beat tick.
    BeatTick,
    /// Aggregated liveness beat info.
    BeatInfo,
    /// Record version update.
    RecordUpdate,
}

impl AnnounceKind {
    /// Pub/sub topic name for this kind.
    pub fn topic(&self) -> &'static str {
        match self {
            AnnounceKind::BeatTick => "beat-tick",
            AnnounceKind::BeatInfo => "beat-info",
            AnnounceKind::RecordUpdate => "record-update",
            AnnounceKind::Unknown => "unknown",
        }
    }

    /// Reverse mapping from a topic name.
    pub fn from_topic(topic: &str) -> Self {
        match topic {
            "beat-tick" => AnnounceKind::BeatTick,
            "beat-info" => AnnounceKind::BeatInfo,
            "record-update" => AnnounceKind::RecordUpdate,
            _ => AnnounceKind::Unknown,
        }
    }
}

/// Authenticated envelope carried over pub/sub and stored in version chains.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announce {
    /// Fresh TimeID of the announce itself.
    pub id: String,
    /// Sender node ID (embeds the verification key).
    pub node_id: String,
    /// Hex-encoded 64-byte Ed25519 signature over `envelope`.
    pub signature: String,
    /// Wall-clock nanoseconds at build time.
    pub timestamp: i64,
    /// Kind tag; selects the envelope schema.
    pub kind: AnnounceKind,
    /// Canonical packed bytes of the inner envelope.
    pub envelope: Vec<u8>,
}

impl Announce {
    /// Wrap freshly signed envelope bytes into an announce.
    pub fn new_signed(
        kind: AnnounceKind,
        envelope: Vec<u8>,
        node_id: &str,
        signature: &[u8],
    ) -> Self {
        Self {
            id: TimeId::mint().to_string(),
            node_id: node_id.to_string(),
            signature: hex::encode(signature),
            timestamp: now_nanos(),
            kind,
            envelope,
        }
    }

    /// Verify the signature over the envelope bytes against the key embedded
    /// in `node_id`.
    pub fn verify(&self) -> Result<(), AnnounceError> {
        let sig = hex::decode(&self.signature).map_err(|_| AnnounceError::SignatureInvalid)?;
        match identity::verify_node_signature(&self.node_id, &sig, &self.envelope) {
            Ok(true) => Ok(()),
            _ => Err(AnnounceError::SignatureInvalid),
        }
    }
}

/// Wall clock in nanoseconds since the UNIX epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Inner envelope of a record update announce.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeRecordUpdate {
    /// Record TimeID.
    pub id: String,
    /// Content address of the announced version.
    pub version: String,
    /// Content address of the predecessor, empty for the first version.
    pub version_prev: String,
}

/// Inner envelope of a beat tick announce.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeBeatTick {
    /// Fresh TimeID of the tick.
    pub id: String,
    /// Session the tick belongs to.
    pub session: String,
}

/// Inner envelope of a beat info announce.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeBeatInfo {
    /// Fresh TimeID of the info.
    pub id: String,
    /// Session the info belongs to.
    pub session: String,
    /// Reward address claimed by the sender.
    pub ethereum_addr: String,
    /// Seconds of uptime claimed for this session.
    pub uptime_secs: u64,
    /// Inbound events processed so far.
    pub inbound_work: u64,
    /// Outbound events published so far.
    pub outbound_work: u64,
}

macro_rules! packed_envelope {
    ($t:ty) => {
        impl $t {
            /// Serialize to canonical packed bytes (the signed form).
            pub fn pack(&self) -> Result<Vec<u8>, AnnounceError> {
                Ok(encode_canonical(self)?)
            }

            /// Decode from canonical packed bytes.
            pub fn unpack(bytes: &[u8]) -> Result<Self, AnnounceError> {
                Ok(decode_canonical_limited(bytes, MAX_ENVELOPE_BYTES)?)
            }
        }
    };
}

packed_envelope!(EnvelopeRecordUpdate);
packed_envelope!(EnvelopeBeatTick);
packed_envelope!(EnvelopeBeatInfo);

impl EnvelopeRecordUpdate {
    /// Total order over record-update envelopes.
    ///
    /// Both IDs are TimeIDs when well-formed, so this is timestamp-then-
    /// entropy order. The fallback chain keeps the order total even for
    /// malformed input: a parsed ID beats an unparsed one, and two unparsed
    /// IDs fall back to byte-lexicographic comparison.
    pub fn compare(&self, other: &EnvelopeRecordUpdate) -> Ordering {
        if self.id == other.id {
            return Ordering::Equal;
        }
        if self.id.is_empty() {
            return Ordering::Less;
        }
        if other.id.is_empty() {
            return Ordering::Greater;
        }
        match (TimeId::parse(&self.id), TimeId::parse(&other.id)) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            (Ok(_), Err(_)) => Ordering::Greater,
            (Err(_), Ok(_)) => Ordering::Less,
            (Err(_), Err(_)) => self.id.as_bytes().cmp(other.id.as_bytes()),
        }
    }
}
