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

//! Liveness beats and aggregated uptime reports.
//!
//! A node with a configured reward address emits a signed beat tick on a
//! short period and a beat info (uptime plus work counters) on a longer one.
//! A node holding the write permission additionally aggregates accepted beat
//! infos by reward address and commits one report record per address.

use super::{EventAnnounce, EventKind, RecordStore, StoreError, WriteOptions};
use crate::core::announce::{
    Announce, AnnounceKind, EnvelopeBeatInfo, EnvelopeBeatTick,
};
use crate::core::timeid::TimeId;
use crate::core::types::{decode_canonical_limited, MAX_RECORD_BYTES};
use crate::objectstore::ObjectStore;
use crate::state::{Scan, BUCKET_BEAT_INFOS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Aggregated beat report for one reward address.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BeatReport {
    /// Session summaries behind this address.
    pub sessions: Vec<BeatSessionReport>,
}

/// One session's summary inside a beat report.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeatSessionReport {
    /// Session TimeID.
    #[serde(rename = "session_id")]
    pub session_id: String,
    /// Reward address the session reported.
    #[serde(rename = "eth_addr")]
    pub ethereum_addr: String,
    /// Whole hours of uptime.
    #[serde(rename = "uptime_hours")]
    pub uptime_hours: u64,
    /// Inbound events processed.
    #[serde(rename = "in_work")]
    pub inbound_work: u64,
    /// Outbound events published.
    #[serde(rename = "out_work")]
    pub outbound_work: u64,
}

impl<F: ObjectStore> RecordStore<F> {
    fn new_beat_tick_announce(&self, session: &str) -> Result<Announce, StoreError> {
        let env = EnvelopeBeatTick {
            id: TimeId::mint().to_string(),
            session: session.to_string(),
        };
        let packed = env.pack()?;
        let sig = self.fs.sign(&packed).map_err(StoreError::Object)?;
        Ok(Announce::new_signed(
            AnnounceKind::BeatTick,
            packed,
            &self.node_id,
            &sig,
        ))
    }

    fn new_beat_info_announce(
        &self,
        session: &str,
        eth_addr: &str,
        uptime_secs: u64,
    ) -> Result<Announce, StoreError> {
        let env = EnvelopeBeatInfo {
            id: TimeId::mint().to_string(),
            session: session.to_string(),
            ethereum_addr: eth_addr.to_string(),
            uptime_secs,
            inbound_work: self.inbound_work(),
            outbound_work: self.outbound_work(),
        };
        let packed = env.pack()?;
        let sig = self.fs.sign(&packed).map_err(StoreError::Object)?;
        Ok(Announce::new_signed(
            AnnounceKind::BeatInfo,
            packed,
            &self.node_id,
            &sig,
        ))
    }

    /// Emit beat ticks every `tick_dur` and beat infos every `info_dur`.
    ///
    /// Runs until the task is aborted; started only when the node has a
    /// reward address configured.
    pub async fn send_beats(&self, tick_dur: Duration, info_dur: Duration, eth_addr: String, session: String) {
        let mut tick_timer = tokio::time::interval(tick_dur);
        let mut info_timer = tokio::time::interval(info_dur);
        // interval fires immediately once; skip that leading edge.
        tick_timer.tick().await;
        info_timer.tick().await;
        loop {
            tokio::select! {
                _ = tick_timer.tick() => {
                    match self.new_beat_tick_announce(&session) {
                        Ok(announce) => {
                            self.emit_event(EventAnnounce { kind: EventKind::BeatTick, announce }).await;
                        }
                        Err(e) => warn!(err = %e, "failed to build beat tick"),
                    }
                }
                _ = info_timer.tick() => {
                    match self.new_beat_info_announce(&session, &eth_addr, self.uptime_secs()) {
                        Ok(announce) => {
                            self.emit_event(EventAnnounce { kind: EventKind::BeatInfo, announce }).await;
                        }
                        Err(e) => warn!(err = %e, "failed to build beat info"),
                    }
                }
            }
        }
    }

    /// Group accepted beat infos by reward address.
    pub fn collect_beat_reports(&self) -> Result<BTreeMap<String, BeatReport>, StoreError> {
        let mut reports: BTreeMap<String, BeatReport> = BTreeMap::new();
        self.ss.range_peek(BUCKET_BEAT_INFOS, |_, bytes| {
            let info: EnvelopeBeatInfo = match decode_canonical_limited(bytes, MAX_RECORD_BYTES) {
                Ok(i) => i,
                Err(_) => return Ok(Scan::Continue),
            };
            if info.ethereum_addr.is_empty() {
                return Ok(Scan::Continue);
            }
            reports
                .entry(info.ethereum_addr.clone())
                .or_default()
                .sessions
                .push(BeatSessionReport {
                    session_id: info.session.clone(),
                    ethereum_addr: info.ethereum_addr.clone(),
                    uptime_hours: info.uptime_secs / 3600,
                    inbound_work: info.inbound_work,
                    outbound_work: info.outbound_work,
                });
            Ok(Scan::Continue)
        })?;
        Ok(reports)
    }

    /// Commit one report record per reward address, create-or-update at
    /// `/beat_reports/<addr>.json`. Requires the write permission.
    pub async fn commit_beat_reports_once(&self) -> Result<(), StoreError> {
        if !self.publish_allowed(&self.node_id) {
            debug!("skipping beat report commit, node lacks write permission");
            return Ok(());
        }
        let reports = self.collect_beat_reports()?;
        for (addr, report) in reports {
            let body = serde_json::to_vec(&report).map_err(|_| StoreError::Codec)?;
            let path = format!("/beat_reports/{addr}.json");
            let opts = WriteOptions {
                size: body.len() as u64,
                user_meta: String::new(),
            };
            let res = match self.create_record(&path, &body, opts.clone()).await {
                Err(StoreError::RecordExists) => self.update_record(&path, &body, opts).await,
                other => other,
            };
            if let Err(e) = res {
                warn!(path = %path, err = %e, "failed to write beat report to store");
            }
        }
        Ok(())
    }

    /// Commit beat reports every `dur` until the task is aborted.
    pub async fn commit_beat_reports(&self, dur: Duration) {
        let mut timer = tokio::time::interval(dur);
        timer.tick().await;
        loop {
            timer.tick().await;
            if let Err(e) = self.commit_beat_reports_once().await {
                warn!(err = %e, "beat report commit failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_json_field_names() {
        let report = BeatReport {
            sessions: vec![BeatSessionReport {
                session_id: "s".into(),
                ethereum_addr: "0xabc".into(),
                uptime_hours: 2,
                inbound_work: 3,
                outbound_work: 4,
            }],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"sessions\""));
        assert!(json.contains("\"session_id\":\"s\""));
        assert!(json.contains("\"eth_addr\":\"0xabc\""));
        assert!(json.contains("\"uptime_hours\":2"));
        assert!(json.contains("\"in_work\":3"));
        assert!(json.contains("\"out_work\":4"));
    }
}
