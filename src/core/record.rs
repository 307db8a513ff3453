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

//! The versioned record data model.

use crate::core::announce::{Announce, AnnounceError, EnvelopeRecordUpdate};
use crate::core::types::{
    decode_canonical_limited, encode_canonical, CodecError, MAX_RECORD_BYTES,
};
use serde::{Deserialize, Serialize};

/// One immutable version of a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVersion {
    /// Content address returned by the object store for this version.
    pub version: String,
    /// The signed announce that introduced this version.
    pub announce: Announce,
}

/// A named, versioned record.
///
/// `current` plus `previous` form a singly linked chain through each
/// announce's `version_prev`; `previous` is ordered oldest first and may be
/// capped, but never reordered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// TimeID, immutable for the record's lifetime.
    pub id: String,
    /// User-visible key.
    pub path: String,
    /// Nanosecond timestamp of the first version.
    pub created_at: i64,
    /// Head version.
    pub current: RecordVersion,
    /// Prior versions, oldest first.
    pub previous: Vec<RecordVersion>,
}

impl Record {
    /// Serialize to canonical packed bytes (the stored and exported form).
    pub fn pack(&self) -> Result<Vec<u8>, CodecError> {
        encode_canonical(self)
    }

    /// Decode from canonical packed bytes.
    pub fn unpack(bytes: &[u8]) -> Result<Self, CodecError> {
        decode_canonical_limited(bytes, MAX_RECORD_BYTES)
    }

    /// Decode the record-update envelope of the current version.
    pub fn current_envelope(&self) -> Result<EnvelopeRecordUpdate, AnnounceError> {
        EnvelopeRecordUpdate::unpack(&self.current.announce.envelope)
    }

    /// Verify the announce signatures of the current and all prior versions.
    pub fn validate(&self) -> Result<(), AnnounceError> {
        self.current.announce.verify()?;
        for v in &self.previous {
            v.announce.verify()?;
        }
        Ok(())
    }
}

/// Per-version metadata stored in the object store alongside body bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Record TimeID.
    pub id: String,
    /// Record path at write time.
    pub path: String,
    /// Nanosecond timestamp of the version write.
    pub created_at: i64,
    /// Content address of this version.
    pub version: String,
    /// Content address of the predecessor version, empty for the first.
    #[serde(default)]
    pub version_previous: String,
    /// Tombstone marker; a deleted version carries no body.
    #[serde(default)]
    pub is_deleted: bool,
    /// Body size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Caller-supplied metadata (JSON text).
    #[serde(default)]
    pub user_meta: String,
}

/// Cap a version list to its `max` newest entries.
///
/// `previous` is ordered oldest first, so the retained set is the tail of the
/// list in its original order; the dropped head (the oldest versions) is
/// returned for unpinning.
pub fn cap_versions(
    previous: Vec<RecordVersion>,
    max: usize,
) -> (Vec<RecordVersion>, Vec<String>) {
    if previous.len() <= max {
        return (previous, Vec::new());
    }
    let cut = previous.len() - max;
    let mut dropped = Vec::with_capacity(cut);
    let mut kept = Vec::with_capacity(max);
    for (i, v) in previous.into_iter().enumerate() {
        if i < cut {
            dropped.push(v.version);
        } else {
            kept.push(v);
        }
    }
    (kept, dropped)
}
