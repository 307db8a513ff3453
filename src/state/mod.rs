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

//! Bucketed, transactional key/value state with optional per-key TTL.
//!
//! Keys are `(bucket: u16, key: [26]byte)` encoded big-endian. The fixed key
//! width matches the TimeID length, so a forward scan over one bucket is a
//! single prefix seek.

use std::time::Duration;
use thiserror::Error;

mod store;

pub use store::{Store, StoreOptions};

/// State store errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// The key has no live value.
    #[error("not found")]
    NotFound,
    /// Storage engine I/O failure.
    #[error("storage i/o: {0}")]
    Io(String),
    /// A transactional precondition did not hold.
    #[error("tx conflict")]
    Conflict,
    /// Stored bytes failed to decode.
    #[error("codec")]
    Codec,
}

/// 16-bit bucket namespace identifier.
pub type BucketId = u16;

/// Record index bucket.
pub const BUCKET_RECORDS: BucketId = 0x10;
/// Beat tick rows (TTL ~4 h).
pub const BUCKET_BEAT_TICKS: BucketId = 0x11;
/// Beat info rows (TTL ~31 d).
pub const BUCKET_BEAT_INFOS: BucketId = 0x12;
/// Path -> record ID secondary index.
pub const BUCKET_PATHS: BucketId = 0x13;

/// Width of the value part of a key.
pub const KEY_LEN: usize = 26;

/// A bucketed key with an optional TTL for writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Key {
    /// Bucket namespace.
    pub bucket: BucketId,
    /// Fixed-width key bytes (zero padded).
    pub key: [u8; KEY_LEN],
    /// TTL applied on the next write through this key, if any.
    pub ttl: Option<Duration>,
}

impl Key {
    /// Build a key from raw bytes; longer input is truncated, shorter input
    /// zero-padded.
    pub fn new(bucket: BucketId, key: &[u8]) -> Self {
        let mut k = [0u8; KEY_LEN];
        let n = key.len().min(KEY_LEN);
        k[..n].copy_from_slice(&key[..n]);
        Self {
            bucket,
            key: k,
            ttl: None,
        }
    }

    /// Attach a TTL for writes through this key.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Big-endian wire form: 2 bucket bytes then the 26 key bytes.
    pub fn encode(&self) -> [u8; 2 + KEY_LEN] {
        let mut out = [0u8; 2 + KEY_LEN];
        out[..2].copy_from_slice(&self.bucket.to_be_bytes());
        out[2..].copy_from_slice(&self.key);
        out
    }

    /// Parse the wire form back into a key (TTL is not part of the wire).
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() != 2 + KEY_LEN {
            return None;
        }
        let bucket = u16::from_be_bytes([buf[0], buf[1]]);
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&buf[2..]);
        Some(Self {
            bucket,
            key,
            ttl: None,
        })
    }
}

/// Outcome of a modify closure.
#[derive(Clone, Debug)]
pub enum Modify {
    /// Leave the stored value untouched; not an error.
    Keep,
    /// Replace the stored value with these bytes.
    Put(Vec<u8>),
}

/// Flow control for range callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scan {
    /// Keep iterating.
    Continue,
    /// Break out of the range; not an error.
    Stop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_encoding_is_bucket_prefixed() {
        let k = Key::new(BUCKET_RECORDS, b"01ARZ3NDEKTSV4RRFFQ69G5FAV");
        let enc = k.encode();
        assert_eq!(&enc[..2], &[0x00, 0x10]);
        assert_eq!(&enc[2..], b"01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(Key::decode(&enc).unwrap(), Key::new(BUCKET_RECORDS, &enc[2..]));
    }

    #[test]
    fn short_keys_are_zero_padded() {
        let k = Key::new(BUCKET_PATHS, b"abc");
        assert_eq!(&k.key[..3], b"abc");
        assert!(k.key[3..].iter().all(|&b| b == 0));
    }
}
