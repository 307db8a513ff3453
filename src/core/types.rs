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

//! Canonical encoding helpers and node configuration.
//!
//! Canonical packed bytes are what envelope signatures cover and what the
//! indexed KV store persists, so the encoding must be deterministic:
//! fixed-width integers, no trailing bytes on decode.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use thiserror::Error;

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serializing the value to canonical bytes failed.
    #[error("serialization")]
    Serialize,
    /// Deserializing the value from canonical bytes failed.
    #[error("deserialization")]
    Deserialize,
    /// The encoded size exceeded the configured limit.
    #[error("size limit exceeded")]
    TooLarge,
}

/// Hard cap for a single packed envelope.
pub const MAX_ENVELOPE_BYTES: usize = 4 * 1024;
/// Hard cap for a single packed record (bounded by the version chain cap).
pub const MAX_RECORD_BYTES: usize = 1024 * 1024;

/// Canonical bincode options (deterministic).
fn bincode_opts() -> impl Options {
    // Fixint encoding provides a stable integer representation.
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules. Requires deterministic container ordering
/// (use BTreeMap/BTreeSet).
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts()
        .serialize(v)
        .map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap.
pub fn decode_canonical_limited<T: DeserializeOwned>(
    bytes: &[u8],
    max: usize,
) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

/// Decode one value from a reader carrying back-to-back packed values.
///
/// The packed form is self-delimiting, so no extra framing is needed; `None`
/// is returned on a clean end of stream.
pub fn decode_canonical_next<T: DeserializeOwned, R: Read>(
    rd: &mut R,
    max: usize,
) -> Result<Option<T>, CodecError> {
    let mut probe = [0u8; 1];
    match rd.read(&mut probe) {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(_) => return Err(CodecError::Deserialize),
    }
    let chained = (&probe[..]).chain(rd);
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(max as u64)
        .deserialize_from(chained)
        .map(Some)
        .map_err(|_| CodecError::Deserialize)
}

/// Node configuration root.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node settings.
    #[serde(default)]
    pub node: NodeSettings,
    /// HTTP endpoints.
    #[serde(default)]
    pub http: HttpConfig,
    /// Authority source settings.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Record store settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Beat task settings.
    #[serde(default)]
    pub beat: BeatConfig,
    /// Known peers for the private tunnel: node ID -> base URL.
    #[serde(default)]
    pub peers: BTreeMap<String, String>,
}

/// Node settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Human-readable name.
    pub name: String,
    /// Data directory (KV store, objects, identity key).
    pub data_dir: String,
    /// Network environment tag, e.g. "main" or "test".
    #[serde(default)]
    pub env: String,
    /// Ethereum-style reward address; beats run only when set.
    #[serde(default)]
    pub eth_addr: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: "meridian".to_string(),
            data_dir: "./data".to_string(),
            env: "test".to_string(),
            eth_addr: String::new(),
        }
    }
}

/// HTTP config.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Public API listen address, e.g. 0.0.0.0:33780.
    pub public_listen: String,
    /// Private peer surface listen address.
    pub private_listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            public_listen: "0.0.0.0:33780".to_string(),
            private_listen: "127.0.0.1:33700".to_string(),
        }
    }
}

/// Authority source configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// DNS-text source domains.
    #[serde(default)]
    pub domains: Vec<String>,
    /// URL-text source endpoints.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Fixed `key:tag[,tag]` lines for private overlays without DNS.
    #[serde(default)]
    pub static_entries: Vec<String>,
    /// Refresh interval in seconds.
    pub refresh_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            urls: Vec::new(),
            static_entries: Vec::new(),
            refresh_secs: 60,
        }
    }
}

/// Record store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Versions kept pinned per record (current + predecessors).
    pub keep_versions: usize,
    /// Version-chain GC interval in seconds.
    pub gc_interval_secs: u64,
    /// Startup sync deadline in seconds.
    pub sync_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            keep_versions: 3,
            gc_interval_secs: 600,
            sync_timeout_secs: 120,
        }
    }
}

/// Beat task configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeatConfig {
    /// Beat tick period in seconds.
    pub tick_secs: u64,
    /// Beat info period in seconds.
    pub info_secs: u64,
    /// Report commit period in seconds.
    pub report_secs: u64,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            tick_secs: 600,
            info_secs: 3600,
            report_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_roundtrip_rejects_trailing() {
        let v = vec![1u64, 2, 3];
        let mut bytes = encode_canonical(&v).unwrap();
        let back: Vec<u64> = decode_canonical_limited(&bytes, 1024).unwrap();
        assert_eq!(back, v);
        bytes.push(0);
        assert!(decode_canonical_limited::<Vec<u64>>(&bytes, 1024).is_err());
    }

    #[test]
    fn stream_decode_is_self_delimiting() {
        let a = ("one".to_string(), 1u64);
        let b = ("two".to_string(), 2u64);
        let mut buf = encode_canonical(&a).unwrap();
        buf.extend(encode_canonical(&b).unwrap());
        let mut rd = std::io::Cursor::new(buf);
        let x: (String, u64) = decode_canonical_next(&mut rd, 1024).unwrap().unwrap();
        let y: (String, u64) = decode_canonical_next(&mut rd, 1024).unwrap().unwrap();
        assert_eq!(x, a);
        assert_eq!(y, b);
        assert!(decode_canonical_next::<(String, u64), _>(&mut rd, 1024)
            .unwrap()
            .is_none());
    }
}
