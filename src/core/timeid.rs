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
#![deny(missing_docs)]

//! Time-ordered record identifiers.
//!
//! A TimeID is the 26-character Crockford base32 form of a 48-bit millisecond
//! timestamp plus 80 bits of entropy. Lexicographic order equals time order,
//! with entropy as the tiebreaker inside one millisecond. Minting is
//! monotonic within the process so that two IDs minted back-to-back never
//! compare equal or inverted.

use std::fmt;
use std::sync::{Mutex, OnceLock};
use thiserror::Error;
use ulid::Ulid;

/// TimeID parse error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeIdError {
    /// The text form could not be parsed as a valid TimeID.
    #[error("invalid time id")]
    Invalid,
}

/// Length of the canonical text form.
pub const TIME_ID_LEN: usize = 26;

/// A 26-character monotonic, timestamp-prefixed lexicographic identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeId(Ulid);

fn generator() -> &'static Mutex<ulid::Generator> {
    static GEN: OnceLock<Mutex<ulid::Generator>> = OnceLock::new();
    GEN.get_or_init(|| Mutex::new(ulid::Generator::new()))
}

impl TimeId {
    /// Mint a fresh identifier (monotonic within the process).
    pub fn mint() -> Self {
        let minted = generator()
            .lock()
            .ok()
            .and_then(|mut g| g.generate().ok());
        // Random-entropy overflow within one millisecond is the only failure
        // mode; a plain non-monotonic ID is still unique then.
        Self(minted.unwrap_or_else(Ulid::new))
    }

    /// Parse the canonical 26-character form.
    ///
    /// A zero timestamp is rejected: such strings are valid base32 but can
    /// never have been minted, and path resolution relies on that.
    pub fn parse(s: &str) -> Result<Self, TimeIdError> {
        if s.len() != TIME_ID_LEN {
            return Err(TimeIdError::Invalid);
        }
        let u = Ulid::from_string(s).map_err(|_| TimeIdError::Invalid)?;
        if u.timestamp_ms() == 0 {
            return Err(TimeIdError::Invalid);
        }
        Ok(Self(u))
    }

    /// Millisecond timestamp prefix.
    pub fn timestamp_ms(&self) -> u64 {
        self.0.timestamp_ms()
    }

    /// Canonical 26-byte key form for the indexed KV store.
    pub fn key_bytes(&self) -> [u8; TIME_ID_LEN] {
        let mut out = [0u8; TIME_ID_LEN];
        out.copy_from_slice(self.0.to_string().as_bytes());
        out
    }
}

impl fmt::Display for TimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_ordered() {
        let a = TimeId::mint();
        let b = TimeId::mint();
        assert!(a < b);
        assert!(a.to_string() < b.to_string());
    }

    #[test]
    fn parse_roundtrip() {
        let id = TimeId::mint();
        let s = id.to_string();
        assert_eq!(s.len(), TIME_ID_LEN);
        assert_eq!(TimeId::parse(&s).unwrap(), id);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(TimeId::parse("").is_err());
        assert!(TimeId::parse("/a/b.txt").is_err());
        assert!(TimeId::parse("not-a-time-id-but-26-chars").is_err());
        // Valid base32 with a zero timestamp prefix is not a mintable ID.
        assert!(TimeId::parse("00000000000000000000000000").is_err());
    }

    #[test]
    fn timestamp_is_recent() {
        let id = TimeId::mint();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert!(id.timestamp_ms() <= now + 1000);
        assert!(id.timestamp_ms() + 60_000 > now);
    }
}
