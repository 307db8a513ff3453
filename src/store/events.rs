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

//! Events carried by the inbound and outbound pipelines.

use crate::core::announce::{Announce, AnnounceKind};
use serde::{Deserialize, Serialize};

/// Kind of a pipeline event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Unrecognized event.
    Unknown,
    /// Liveness beat tick.
    BeatTick,
    /// Aggregated liveness beat info.
    BeatInfo,
    /// Record version update.
    RecordUpdate,
    /// Pipeline shutdown sentinel; drains workers.
    StopAnnounce,
}

impl EventKind {
    /// Pub/sub topic name.
    pub fn topic(&self) -> &'static str {
        match self {
            EventKind::BeatTick => "beat-tick",
            EventKind::BeatInfo => "beat-info",
            EventKind::RecordUpdate => "record-update",
            EventKind::StopAnnounce => "stop-announce",
            EventKind::Unknown => "unknown",
        }
    }

    /// Reverse mapping from a topic name.
    pub fn from_topic(topic: &str) -> Self {
        match topic {
            "beat-tick" => EventKind::BeatTick,
            "beat-info" => EventKind::BeatInfo,
            "record-update" => EventKind::RecordUpdate,
            _ => EventKind::Unknown,
        }
    }
}

impl From<AnnounceKind> for EventKind {
    fn from(kind: AnnounceKind) -> Self {
        match kind {
            AnnounceKind::BeatTick => EventKind::BeatTick,
            AnnounceKind::BeatInfo => EventKind::BeatInfo,
            AnnounceKind::RecordUpdate => EventKind::RecordUpdate,
            AnnounceKind::Unknown => EventKind::Unknown,
        }
    }
}

/// A serializable event announcement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventAnnounce {
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The signed announce; meaningless for sentinels.
    pub announce: Announce,
}

impl EventAnnounce {
    /// The pipeline shutdown sentinel.
    pub fn stop() -> Self {
        Self {
            kind: EventKind::StopAnnounce,
            announce: Announce {
                id: String::new(),
                node_id: String::new(),
                signature: String::new(),
                timestamp: 0,
                kind: AnnounceKind::Unknown,
                envelope: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_roundtrip() {
        for kind in [
            EventKind::BeatTick,
            EventKind::BeatInfo,
            EventKind::RecordUpdate,
        ] {
            assert_eq!(EventKind::from_topic(kind.topic()), kind);
        }
        assert_eq!(EventKind::from_topic("nonsense"), EventKind::Unknown);
        // The sentinel never rides a topic.
        assert_eq!(
            EventKind::from_topic(EventKind::StopAnnounce.topic()),
            EventKind::Unknown
        );
    }
}
