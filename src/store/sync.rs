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

// Startup synchronization: discover authorized alive peers, stream their
// record exports, merge what is newer than local state.

use super::{RecordStore, StoreError, StoreState, MergeOutcome};
use crate::authority::Permission;
use crate::core::record::Record;
use crate::core::types::{decode_canonical_next, MAX_RECORD_BYTES};
use crate::objectstore::ObjectStore;
use crate::state::{Key, Modify, StateError, BUCKET_RECORDS};
use std::cmp::Ordering;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Peers pulled from concurrently during one sync.
const SYNC_FANOUT: usize = 2;
/// Rounds of alive-peer discovery before giving up.
const ALIVE_RETRIES: usize = 3;
/// Pause between discovery rounds.
const ALIVE_RETRY_DELAY: Duration = Duration::from_secs(5);

impl<F: ObjectStore> RecordStore<F> {
    /// Run startup synchronization with a hard deadline.
    ///
    /// Happy path transitions `inactive -> syncing -> active`; a deadline hit
    /// goes back to `inactive` and surfaces [`StoreError::NotSynced`].
    pub async fn sync(&self, timeout: Duration) -> Result<(), StoreError> {
        let mut candidates = Vec::new();
        for (key, entry) in self.auth.entries() {
            debug!(key = %key, "sync candidate");
            if key == self.node_id {
                continue;
            }
            if entry.has_permissions(&[Permission::Sync]) {
                candidates.push(key);
            }
        }
        candidates.sort();
        if candidates.is_empty() {
            warn!("no sync candidates found");
            self.set_state(StoreState::Active);
            return Ok(());
        }
        debug!(count = candidates.len(), "found sync candidates");

        self.set_state(StoreState::Syncing);
        match tokio::time::timeout(timeout, self.sync_inner(&candidates)).await {
            Ok(res) => {
                self.set_state(StoreState::Active);
                res
            }
            Err(_) => {
                self.set_state(StoreState::Inactive);
                Err(StoreError::NotSynced)
            }
        }
    }

    async fn sync_inner(&self, candidates: &[String]) -> Result<(), StoreError> {
        let mut alive = self.alive_nodes(candidates).await;
        if alive.is_empty() {
            for _ in 0..ALIVE_RETRIES {
                debug!("retrying to find alive candidates in 5s");
                tokio::time::sleep(ALIVE_RETRY_DELAY).await;
                alive = self.alive_nodes(candidates).await;
                if !alive.is_empty() {
                    break;
                }
            }
        }
        self.metrics.sync_peers_alive.set(alive.len() as i64);
        if alive.is_empty() {
            warn!("no alive sync candidates found");
            return Ok(());
        }
        debug!(count = alive.len(), "found alive sync candidates");
        alive.truncate(SYNC_FANOUT);

        info!(peers = ?alive, "sync started");
        let pulls = alive.iter().map(|peer| self.pull_records(peer.clone()));
        for outcome in futures::future::join_all(pulls).await {
            match outcome {
                Ok(imported) => {
                    debug!(imported, "peer stream merged");
                }
                Err(e) => warn!(err = %e, "failed to pull node records"),
            }
        }
        debug!("sync end");
        Ok(())
    }

    /// Ping every candidate concurrently; a peer is alive iff it answers 200
    /// within the per-call deadline.
    pub(crate) async fn alive_nodes(&self, candidates: &[String]) -> Vec<String> {
        let probes = candidates.iter().map(|node_id| {
            let node_id = node_id.clone();
            async move {
                self.outbound_work_probe();
                match self.fs.ping(&node_id).await {
                    Ok(_) => Some(node_id),
                    Err(e) => {
                        debug!(node = %node_id, err = %e, "ping failed");
                        None
                    }
                }
            }
        });
        futures::future::join_all(probes)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    fn outbound_work_probe(&self) {
        self.outbound_work
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    async fn pull_records(&self, peer: String) -> Result<usize, StoreError> {
        self.outbound_work_probe();
        let bytes = self
            .fs
            .fetch_records(&peer)
            .await
            .map_err(StoreError::Object)?;
        let mut rd = std::io::Cursor::new(bytes);
        let mut imported = 0usize;
        loop {
            let record: Option<Record> = decode_canonical_next(&mut rd, MAX_RECORD_BYTES)
                .map_err(|_| StoreError::Codec)?;
            let Some(record) = record else { break };
            if self.merge_remote_record(record)? == MergeOutcome::Imported {
                imported += 1;
                self.metrics.records_synced_total.inc();
            }
        }
        Ok(imported)
    }

    /// Merge one record received from a peer.
    ///
    /// Every version's signature must verify and the current announce's
    /// sender must hold the write permission; the local copy is replaced only
    /// by a strictly newer envelope, or an equal envelope with a longer
    /// chain.
    pub(crate) fn merge_remote_record(
        &self,
        record: Record,
    ) -> Result<MergeOutcome, StoreError> {
        if let Err(e) = record.validate() {
            debug!(id = %record.id, err = %e, "failed to validate record in sync");
            self.metrics.announce_invalid_total.inc();
            return Ok(MergeOutcome::Skipped);
        }
        let owner = &record.current.announce.node_id;
        if !self.publish_allowed(owner) {
            debug!(owner = %owner, "publish not allowed for author of the announce in sync");
            return Ok(MergeOutcome::Skipped);
        }

        let rk = Key::new(BUCKET_RECORDS, record.id.as_bytes());
        let pk = Self::path_key(&record.path);
        let bytes = record.pack()?;
        let mut outcome = MergeOutcome::Skipped;
        self.ss.update_two(&rk, &pk, |rec_slot, path_slot| {
            let Some(existing) = rec_slot else {
                debug!(id = %record.id, "new record imported");
                outcome = MergeOutcome::Imported;
                return Ok((
                    Modify::Put(bytes.clone()),
                    Self::path_index_add(path_slot, &record.path, &record.id)?,
                ));
            };
            let local = Self::decode_record(existing)?;
            let incoming_env = record.current_envelope().map_err(|_| StateError::Codec);
            let local_env = local.current_envelope().map_err(|_| StateError::Codec);
            let (incoming_env, local_env) = match (incoming_env, local_env) {
                (Ok(a), Ok(b)) => (a, b),
                _ => {
                    debug!(id = %record.id, "failed to decode record update envelope in sync");
                    return Ok((Modify::Keep, Modify::Keep));
                }
            };
            if incoming_env.id != local_env.id {
                warn!(
                    next = %incoming_env.id,
                    prev = %local_env.id,
                    "announce envelope record ID mismatch"
                );
                return Ok((Modify::Keep, Modify::Keep));
            }
            match incoming_env.compare(&local_env) {
                Ordering::Greater => {
                    debug!(id = %record.id, "record imported, newer version");
                    outcome = MergeOutcome::Imported;
                    Ok((
                        Modify::Put(bytes.clone()),
                        Self::path_index_add(path_slot, &record.path, &record.id)?,
                    ))
                }
                Ordering::Equal if record.previous.len() > local.previous.len() => {
                    debug!(id = %record.id, "record imported, version chain longer");
                    outcome = MergeOutcome::Imported;
                    Ok((
                        Modify::Put(bytes.clone()),
                        Self::path_index_add(path_slot, &record.path, &record.id)?,
                    ))
                }
                _ => Ok((Modify::Keep, Modify::Keep)),
            }
        })?;
        Ok(outcome)
    }
}
