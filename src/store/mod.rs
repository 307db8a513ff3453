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

//! The versioned record store.
//!
//! Coordinates CRUD over the object store and the indexed KV state, drives
//! the inbound/outbound event pipelines, enforces the authority model, pins
//! the newest versions of every record and caps version chains.

use crate::authority::{Authority, Permission};
use crate::core::announce::{Announce, AnnounceError, AnnounceKind, EnvelopeRecordUpdate};
use crate::core::record::{cap_versions, Record, RecordVersion};
use crate::core::timeid::TimeId;
use crate::core::types::{decode_canonical_limited, encode_canonical, CodecError, MAX_RECORD_BYTES};
use crate::monitoring::metrics::Metrics;
use crate::objectstore::{Message, MessageHandler, ObjectError, ObjectRef, ObjectStore, PutSpec};
use crate::state::{
    Key, Modify, Scan, StateError, Store, BUCKET_BEAT_INFOS, BUCKET_BEAT_TICKS, BUCKET_PATHS,
    BUCKET_RECORDS, KEY_LEN,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub mod beat;
pub mod events;
mod sync;

pub use beat::{BeatReport, BeatSessionReport};
pub use events::{EventAnnounce, EventKind};

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The node lacks the permission the operation requires.
    #[error("node is not authorized to create records")]
    NotAuthorized,
    /// A record under the path already exists.
    #[error("record exists")]
    RecordExists,
    /// No record under the path or ID.
    #[error("record not found")]
    RecordNotFound,
    /// Startup sync timed out without fresh data.
    #[error("not synced")]
    NotSynced,
    /// Positive version offsets are not served.
    #[error("positive version offsets are not supported")]
    VersionOffset,
    /// The pub/sub transport does not verify signatures on delivery.
    #[error("pubsub strict signature verification is disabled")]
    PubsubNotStrict,
    /// Indexed state failure.
    #[error("state: {0}")]
    State(#[from] StateError),
    /// Object store failure.
    #[error("object store: {0}")]
    Object(ObjectError),
    /// Announce build or verification failure.
    #[error("announce: {0}")]
    Announce(#[from] AnnounceError),
    /// Canonical codec failure.
    #[error("codec")]
    Codec,
}

impl From<CodecError> for StoreError {
    fn from(_: CodecError) -> Self {
        StoreError::Codec
    }
}

/// Outcome of merging a record pulled from a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The received record replaced (or created) the local copy.
    Imported,
    /// The local copy was newer or the record failed validation.
    Skipped,
}

/// Store lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreState {
    /// Not yet synced; workers hold back.
    Inactive,
    /// Startup sync in flight.
    Syncing,
    /// Serving; workers process events.
    Active,
}

/// Options for create/update writes.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    /// Declared body size.
    pub size: u64,
    /// Caller-supplied metadata (JSON text).
    pub user_meta: String,
}

/// Options for reads.
#[derive(Clone, Debug, Default)]
pub struct ReadOptions {
    /// Exact version to read instead of the current one.
    pub version: Option<String>,
    /// Steps to walk back along predecessor pointers (negative only).
    pub version_offset: i64,
    /// Skip the body, metadata only.
    pub no_content: bool,
}

/// A record returned from a write.
#[derive(Clone, Debug)]
pub struct StoredRecord {
    /// The persisted record.
    pub record: Record,
    /// The object version the operation touched.
    pub object: ObjectRef,
}

/// A record returned from a read.
#[derive(Clone, Debug)]
pub struct ReadRecord {
    /// The persisted record when the index holds it.
    pub record: Option<Record>,
    /// The resolved object version.
    pub object: ObjectRef,
    /// Body bytes unless `no_content` was set or the version is a tombstone.
    pub body: Option<Vec<u8>>,
    /// The resolved version is a tombstone.
    pub deleted: bool,
}

/// Record store tuning.
#[derive(Clone, Debug)]
pub struct RecordStoreOptions {
    /// Worker count per pipeline.
    pub workers: usize,
    /// Pipeline channel capacity.
    pub queue: usize,
    /// Versions kept pinned per record (current + predecessors).
    pub keep_versions: usize,
}

impl Default for RecordStoreOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            queue: 1024,
            keep_versions: 3,
        }
    }
}

const BEAT_TICK_TTL: Duration = Duration::from_secs(4 * 3600);
const BEAT_INFO_TTL: Duration = Duration::from_secs(31 * 24 * 3600);
/// Ticks a beat info must be backed by before it is accepted.
const BEAT_INFO_MIN_TICKS: usize = 3;
const MAX_ETH_ADDR_LEN: usize = 64;

/// The record store.
pub struct RecordStore<F: ObjectStore> {
    fs: Arc<F>,
    ss: Store,
    auth: Arc<Authority>,
    metrics: Arc<Metrics>,
    node_id: String,

    state_tx: watch::Sender<StoreState>,
    inbound_tx: mpsc::Sender<EventAnnounce>,
    outbound_tx: mpsc::Sender<EventAnnounce>,
    inbound_work: AtomicU64,
    outbound_work: AtomicU64,

    keep_versions: usize,
    workers: usize,
    started_at: Instant,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl<F: ObjectStore> RecordStore<F> {
    /// Open the record store, spawn the pipelines and subscribe to the
    /// announcement topics.
    ///
    /// Fails when the pub/sub transport does not enforce signature
    /// verification; running without it would let anyone impersonate any
    /// writer.
    pub fn open(
        fs: Arc<F>,
        ss: Store,
        auth: Arc<Authority>,
        metrics: Arc<Metrics>,
        opts: RecordStoreOptions,
    ) -> Result<Arc<Self>, StoreError> {
        if !fs.strict_verification() {
            return Err(StoreError::PubsubNotStrict);
        }

        let node_id = fs.node_id();
        let (state_tx, _) = watch::channel(StoreState::Inactive);
        let (inbound_tx, inbound_rx) = mpsc::channel(opts.queue);
        let (outbound_tx, outbound_rx) = mpsc::channel(opts.queue);

        let store = Arc::new(Self {
            fs,
            ss,
            auth,
            metrics,
            node_id,
            state_tx,
            inbound_tx,
            outbound_tx,
            inbound_work: AtomicU64::new(0),
            outbound_work: AtomicU64::new(0),
            keep_versions: opts.keep_versions,
            workers: opts.workers,
            started_at: Instant::now(),
            handles: Mutex::new(Vec::new()),
        });

        store.spawn_inbound(inbound_rx);
        store.spawn_outbound(outbound_rx);
        store.subscribe_topics()?;
        Ok(store)
    }

    fn spawn_inbound(self: &Arc<Self>, rx: mpsc::Receiver<EventAnnounce>) {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for _ in 0..self.workers {
            let store = Arc::clone(self);
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(async move {
                store.wait_active().await;
                loop {
                    let ev = { rx.lock().await.recv().await };
                    let Some(ev) = ev else { break };
                    if ev.kind == EventKind::StopAnnounce {
                        break;
                    }
                    match store.handle_event(&ev) {
                        Ok(()) => {
                            store.inbound_work.fetch_add(1, Ordering::Relaxed);
                            store.metrics.events_inbound_total.inc();
                        }
                        Err(e) => warn!(err = %e, "error handling event"),
                    }
                }
            }));
        }
    }

    fn spawn_outbound(self: &Arc<Self>, rx: mpsc::Receiver<EventAnnounce>) {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        for _ in 0..self.workers {
            let store = Arc::clone(self);
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(async move {
                store.wait_active().await;
                loop {
                    let ev = { rx.lock().await.recv().await };
                    let Some(ev) = ev else { break };
                    if ev.kind == EventKind::StopAnnounce {
                        break;
                    }
                    match store.emit_to_pubsub(&ev) {
                        Ok(()) => {
                            store.outbound_work.fetch_add(1, Ordering::Relaxed);
                            store.metrics.events_outbound_total.inc();
                        }
                        Err(e) => warn!(err = %e, "error emitting event"),
                    }
                }
            }));
        }
    }

    fn subscribe_topics(self: &Arc<Self>) -> Result<(), StoreError> {
        let topics = [
            EventKind::RecordUpdate.topic(),
            EventKind::BeatInfo.topic(),
            EventKind::BeatTick.topic(),
        ];
        let inbound_tx = self.inbound_tx.clone();
        let own_id = self.node_id.clone();
        let auth = Arc::clone(&self.auth);
        let metrics = Arc::clone(&self.metrics);
        let handler: MessageHandler = Arc::new(move |m: Message| {
            if m.from == own_id {
                return;
            }
            let kind = EventKind::from_topic(&m.topic);
            if kind == EventKind::Unknown {
                return;
            }
            if kind == EventKind::RecordUpdate
                && !auth.has_permissions(&m.from, &[Permission::Write])
            {
                debug!(from = %m.from, "ignoring record update from unauthorized node");
                metrics.events_dropped_total.inc();
                return;
            }
            let announce: Announce = match decode_canonical_limited(&m.data, MAX_RECORD_BYTES) {
                Ok(a) => a,
                Err(_) => {
                    warn!(from = %m.from, topic = %m.topic, "failed to decode announce payload");
                    metrics.events_dropped_total.inc();
                    return;
                }
            };
            let ev = EventAnnounce { kind, announce };
            let tx = inbound_tx.clone();
            let metrics = Arc::clone(&metrics);
            // Delivery happens on runtime threads; a task preserves channel
            // backpressure without blocking the bus.
            tokio::spawn(async move {
                if tx.send(ev).await.is_err() {
                    metrics.events_dropped_total.inc();
                }
            });
        });
        self.fs
            .subscribe(&topics, handler)
            .map_err(StoreError::Object)
    }

    /// This node's ID.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The object store collaborator.
    pub fn object_store(&self) -> &Arc<F> {
        &self.fs
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        *self.state_tx.borrow()
    }

    /// True once the store reached the active state.
    pub fn is_ready(&self) -> bool {
        self.state() == StoreState::Active
    }

    /// Force the active state; used when an enclosing shutdown cancels sync.
    pub fn activate(&self) {
        self.set_state(StoreState::Active);
    }

    fn set_state(&self, state: StoreState) {
        self.state_tx.send_replace(state);
    }

    async fn wait_active(&self) {
        let mut rx = self.state_tx.subscribe();
        while *rx.borrow() != StoreState::Active {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Inbound events processed so far.
    pub fn inbound_work(&self) -> u64 {
        self.inbound_work.load(Ordering::Relaxed)
    }

    /// Outbound events published so far.
    pub fn outbound_work(&self) -> u64 {
        self.outbound_work.load(Ordering::Relaxed)
    }

    /// Seconds since the store was opened.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn publish_allowed(&self, node_id: &str) -> bool {
        self.auth.has_permissions(node_id, &[Permission::Write])
    }

    /// Enqueue an event received from outside; never processes inline.
    pub async fn receive_event(&self, event: EventAnnounce) {
        if event.kind == EventKind::StopAnnounce {
            return;
        }
        if self.inbound_tx.send(event).await.is_err() {
            self.metrics.events_dropped_total.inc();
        }
    }

    /// Enqueue an event for publication; never publishes inline.
    pub async fn emit_event(&self, event: EventAnnounce) {
        if event.kind == EventKind::StopAnnounce {
            return;
        }
        if self.outbound_tx.send(event).await.is_err() {
            self.metrics.events_dropped_total.inc();
        }
    }

    fn emit_to_pubsub(&self, ev: &EventAnnounce) -> Result<(), StoreError> {
        let bytes = encode_canonical(&ev.announce)?;
        self.fs
            .publish(ev.kind.topic(), &bytes)
            .map_err(StoreError::Object)
    }

    /// Drain both pipelines and wait for the workers to exit.
    pub async fn close(&self) {
        // Workers gate on the active state; release any that never saw it
        // before filling the queues with sentinels.
        self.activate();
        for _ in 0..self.workers {
            let _ = self.inbound_tx.send(EventAnnounce::stop()).await;
            let _ = self.outbound_tx.send(EventAnnounce::stop()).await;
        }
        let handles: Vec<_> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for h in handles {
            let _ = h.await;
        }
    }

    // --- announce builders ---

    fn new_record_update_announce(
        &self,
        id: &str,
        version: &str,
        version_prev: &str,
    ) -> Result<Announce, StoreError> {
        let env = EnvelopeRecordUpdate {
            id: id.to_string(),
            version: version.to_string(),
            version_prev: version_prev.to_string(),
        };
        let packed = env.pack()?;
        let sig = self.fs.sign(&packed).map_err(StoreError::Object)?;
        Ok(Announce::new_signed(
            AnnounceKind::RecordUpdate,
            packed,
            &self.node_id,
            &sig,
        ))
    }

    // --- path resolution ---

    fn path_key(path: &str) -> Key {
        let digest = ring::digest::digest(&ring::digest::SHA256, path.as_bytes());
        Key::new(BUCKET_PATHS, &digest.as_ref()[..KEY_LEN])
    }

    /// Resolve a path (or an explicit version) to a record ID.
    ///
    /// A path that parses as a valid TimeID is treated as the record ID
    /// directly. Otherwise the secondary path index answers; it is kept in
    /// the same transaction as every record mutation.
    fn find_record_id(&self, path: &str, version: Option<&str>) -> Result<String, StoreError> {
        if let Some(ver) = version {
            if !ver.is_empty() {
                if let Ok(r) = self.fs.head_object(ver) {
                    if !r.id.is_empty() {
                        return Ok(r.id);
                    }
                }
            }
        }
        if TimeId::parse(path).is_ok() {
            return Ok(path.to_string());
        }
        let pk = Self::path_key(path);
        let found = self.ss.view(&pk, |bytes| {
            let entries: Vec<(String, String)> =
                decode_canonical_limited(bytes, MAX_RECORD_BYTES)
                    .map_err(|_| StateError::Codec)?;
            Ok(entries
                .into_iter()
                .find(|(p, _)| p == path)
                .map(|(_, id)| id))
        });
        match found {
            Ok(Some(id)) => Ok(id),
            Ok(None) | Err(StateError::NotFound) => Err(StoreError::RecordNotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn path_index_add(
        existing: Option<&[u8]>,
        path: &str,
        id: &str,
    ) -> Result<Modify, StateError> {
        let mut entries: Vec<(String, String)> = match existing {
            Some(bytes) => decode_canonical_limited(bytes, MAX_RECORD_BYTES)
                .map_err(|_| StateError::Codec)?,
            None => Vec::new(),
        };
        if entries.iter().any(|(p, i)| p == path && i == id) {
            return Ok(Modify::Keep);
        }
        entries.retain(|(p, _)| p != path);
        entries.push((path.to_string(), id.to_string()));
        let bytes = encode_canonical(&entries).map_err(|_| StateError::Codec)?;
        Ok(Modify::Put(bytes))
    }

    fn decode_record(bytes: &[u8]) -> Result<Record, StateError> {
        Record::unpack(bytes).map_err(|_| StateError::Codec)
    }

    // --- CRUD ---

    /// Create a record under `path`. Fails with [`StoreError::RecordExists`]
    /// when the path is taken.
    pub async fn create_record(
        &self,
        path: &str,
        body: &[u8],
        opts: WriteOptions,
    ) -> Result<StoredRecord, StoreError> {
        if !self.publish_allowed(&self.node_id) {
            return Err(StoreError::NotAuthorized);
        }
        self.create_inner(path, body, opts).await
    }

    async fn create_inner(
        &self,
        path: &str,
        body: &[u8],
        opts: WriteOptions,
    ) -> Result<StoredRecord, StoreError> {
        match self.find_record_id(path, None) {
            Ok(_) => return Err(StoreError::RecordExists),
            Err(StoreError::RecordNotFound) => {}
            Err(e) => return Err(e),
        }

        let id = TimeId::mint().to_string();
        let spec = PutSpec {
            id: id.clone(),
            path: path.to_string(),
            size: opts.size,
            version_previous: String::new(),
            user_meta: opts.user_meta,
        };
        let object = self.fs.put_object(&spec, body).map_err(StoreError::Object)?;
        info!(id = %id, path = %path, size = object.size, "object written on create");

        let announce = self.new_record_update_announce(&id, &object.version, "")?;
        let record = Record {
            id: id.clone(),
            path: path.to_string(),
            created_at: announce.timestamp,
            current: RecordVersion {
                version: object.version.clone(),
                announce: announce.clone(),
            },
            previous: Vec::new(),
        };
        let bytes = record.pack()?;

        let rk = Key::new(BUCKET_RECORDS, id.as_bytes());
        let pk = Self::path_key(path);
        self.ss
            .update_two(&rk, &pk, |rec_slot, path_slot| {
                if rec_slot.is_some() {
                    return Err(StateError::Conflict);
                }
                Ok((
                    Modify::Put(bytes.clone()),
                    Self::path_index_add(path_slot, path, &id)?,
                ))
            })
            .map_err(|e| match e {
                StateError::Conflict => StoreError::RecordExists,
                e => e.into(),
            })?;

        if let Err(e) = self.fs.pin_newest(&object, self.keep_versions) {
            warn!(err = %e, version = %object.version, "failed to pin created version");
        }
        self.emit_event(EventAnnounce {
            kind: EventKind::RecordUpdate,
            announce,
        })
        .await;
        Ok(StoredRecord { record, object })
    }

    /// Append a new version to the record under `path`.
    pub async fn update_record(
        &self,
        path: &str,
        body: &[u8],
        opts: WriteOptions,
    ) -> Result<StoredRecord, StoreError> {
        if !self.publish_allowed(&self.node_id) {
            return Err(StoreError::NotAuthorized);
        }
        self.update_inner(path, body, opts).await
    }

    async fn update_inner(
        &self,
        path: &str,
        body: &[u8],
        opts: WriteOptions,
    ) -> Result<StoredRecord, StoreError> {
        let id = self.find_record_id(path, None)?;
        let rk = Key::new(BUCKET_RECORDS, id.as_bytes());

        let head = self.ss.view(&rk, |bytes| {
            let rec = Self::decode_record(bytes)?;
            Ok((rec.path.clone(), rec.current.version.clone()))
        });
        let (rec_path, head_version) = match head {
            Ok(v) => v,
            Err(StateError::NotFound) => return Err(StoreError::RecordNotFound),
            Err(e) => return Err(e.into()),
        };

        let spec = PutSpec {
            id: id.clone(),
            path: rec_path,
            size: opts.size,
            version_previous: head_version.clone(),
            user_meta: opts.user_meta,
        };
        let object = self.fs.put_object(&spec, body).map_err(StoreError::Object)?;
        info!(id = %id, path = %path, size = object.size, "object written on update");

        let announce = self.new_record_update_announce(&id, &object.version, &head_version)?;
        let mut stored: Option<Record> = None;
        // The path never changes on update, so the index needs no touch.
        self.ss
            .update(&rk, |rec_slot| {
                let Some(bytes) = rec_slot else {
                    return Err(StateError::NotFound);
                };
                let mut rec = Self::decode_record(bytes)?;
                // The head moved underneath us; the object written against
                // the old head must not enter the chain.
                if rec.current.version != head_version {
                    return Err(StateError::Conflict);
                }
                let old = std::mem::replace(
                    &mut rec.current,
                    RecordVersion {
                        version: object.version.clone(),
                        announce: announce.clone(),
                    },
                );
                rec.previous.push(old);
                let bytes = rec.pack().map_err(|_| StateError::Codec)?;
                stored = Some(rec);
                Ok(Modify::Put(bytes))
            })
            .map_err(|e| match e {
                StateError::NotFound => StoreError::RecordNotFound,
                e => e.into(),
            })?;

        if let Err(e) = self.fs.pin_newest(&object, self.keep_versions) {
            warn!(err = %e, version = %object.version, "failed to pin updated version");
        }
        self.emit_event(EventAnnounce {
            kind: EventKind::RecordUpdate,
            announce,
        })
        .await;
        let record = stored.ok_or(StoreError::RecordNotFound)?;
        Ok(StoredRecord { record, object })
    }

    /// Write a tombstone version for the record under `path`.
    ///
    /// Deleting an already-deleted record is a no-op returning the current
    /// tombstone.
    pub async fn delete_record(&self, path: &str) -> Result<StoredRecord, StoreError> {
        if !self.publish_allowed(&self.node_id) {
            return Err(StoreError::NotAuthorized);
        }
        self.delete_inner(path).await
    }

    async fn delete_inner(&self, path: &str) -> Result<StoredRecord, StoreError> {
        let id = self.find_record_id(path, None)?;
        let rk = Key::new(BUCKET_RECORDS, id.as_bytes());

        let current = self.ss.view(&rk, |bytes| Self::decode_record(bytes));
        let record = match current {
            Ok(rec) => rec,
            Err(StateError::NotFound) => return Err(StoreError::RecordNotFound),
            Err(e) => return Err(e.into()),
        };

        let head = match self.fs.head_object(&record.current.version) {
            Ok(r) => r,
            Err(ObjectError::NotFound) => return Err(StoreError::RecordNotFound),
            Err(e) => return Err(StoreError::Object(e)),
        };
        if head.meta.as_ref().map(|m| m.is_deleted).unwrap_or(false) {
            return Ok(StoredRecord {
                record,
                object: head,
            });
        }

        let head_version = record.current.version.clone();
        let spec = PutSpec {
            id: id.clone(),
            path: record.path.clone(),
            size: 0,
            version_previous: head_version.clone(),
            user_meta: String::new(),
        };
        let object = self.fs.delete_object(&spec).map_err(StoreError::Object)?;

        let announce = self.new_record_update_announce(&id, &object.version, &head_version)?;
        let mut stored: Option<Record> = None;
        self.ss
            .update(&rk, |rec_slot| {
                let Some(bytes) = rec_slot else {
                    return Err(StateError::NotFound);
                };
                let mut rec = Self::decode_record(bytes)?;
                if rec.current.version != head_version {
                    return Err(StateError::Conflict);
                }
                let old = std::mem::replace(
                    &mut rec.current,
                    RecordVersion {
                        version: object.version.clone(),
                        announce: announce.clone(),
                    },
                );
                rec.previous.push(old);
                let bytes = rec.pack().map_err(|_| StateError::Codec)?;
                stored = Some(rec);
                Ok(Modify::Put(bytes))
            })
            .map_err(|e| match e {
                StateError::NotFound => StoreError::RecordNotFound,
                e => e.into(),
            })?;

        if let Err(e) = self.fs.pin_newest(&object, self.keep_versions) {
            warn!(err = %e, version = %object.version, "failed to pin tombstone version");
        }
        self.emit_event(EventAnnounce {
            kind: EventKind::RecordUpdate,
            announce,
        })
        .await;
        let record = stored.ok_or(StoreError::RecordNotFound)?;
        Ok(StoredRecord { record, object })
    }

    /// Read a record by path (or ID), optionally at an exact version.
    ///
    /// A tombstone resolves with `deleted = true` so the surface can still
    /// serve the version's metadata alongside its 404.
    pub fn read_record(&self, path: &str, opts: ReadOptions) -> Result<ReadRecord, StoreError> {
        if opts.version_offset > 0 {
            return Err(StoreError::VersionOffset);
        }
        let id = self.find_record_id(path, opts.version.as_deref())?;
        let rk = Key::new(BUCKET_RECORDS, id.as_bytes());
        let record = match self.ss.view(&rk, |bytes| Self::decode_record(bytes)) {
            Ok(rec) => Some(rec),
            Err(StateError::NotFound) => None,
            Err(e) => return Err(e.into()),
        };

        let mut req_version = match (&opts.version, &record) {
            (Some(v), _) if !v.is_empty() => v.clone(),
            (_, Some(rec)) => rec.current.version.clone(),
            _ => return Err(StoreError::RecordNotFound),
        };

        // Negative offsets walk the predecessor chain.
        let mut remaining = opts.version_offset;
        while remaining < 0 {
            let head = match self.fs.head_object(&req_version) {
                Ok(r) => r,
                Err(ObjectError::NotFound) => return Err(StoreError::RecordNotFound),
                Err(e) => return Err(StoreError::Object(e)),
            };
            if head.version_previous.is_empty() {
                return Err(StoreError::RecordNotFound);
            }
            req_version = head.version_previous;
            remaining += 1;
        }

        if opts.no_content {
            let object = match self.fs.head_object(&req_version) {
                Ok(r) => r,
                Err(ObjectError::NotFound) => return Err(StoreError::RecordNotFound),
                Err(e) => return Err(StoreError::Object(e)),
            };
            let deleted = object.meta.as_ref().map(|m| m.is_deleted).unwrap_or(false);
            return Ok(ReadRecord {
                record,
                object,
                body: None,
                deleted,
            });
        }

        let obj = match self.fs.get_object(&req_version) {
            Ok(o) => o,
            Err(ObjectError::NotFound) => return Err(StoreError::RecordNotFound),
            Err(e) => return Err(StoreError::Object(e)),
        };
        let deleted = obj.meta.is_deleted;
        Ok(ReadRecord {
            record,
            object: ObjectRef::from_meta(obj.meta),
            body: if deleted { None } else { Some(obj.body) },
            deleted,
        })
    }

    /// Forward scan over all records; the callback returns [`Scan::Stop`] to
    /// break.
    pub fn walk_records(
        &self,
        mut f: impl FnMut(&str, &Record) -> Scan,
    ) -> Result<(), StoreError> {
        self.ss.range_peek(BUCKET_RECORDS, |_, bytes| {
            let rec = Self::decode_record(bytes)?;
            Ok(f(&rec.path, &rec))
        })?;
        Ok(())
    }

    /// Export every record as back-to-back canonical packed bytes.
    pub fn export_records(&self) -> Result<Vec<u8>, StoreError> {
        let mut out = Vec::new();
        self.ss.range_peek(BUCKET_RECORDS, |_, bytes| {
            out.extend_from_slice(bytes);
            Ok(Scan::Continue)
        })?;
        Ok(out)
    }

    // --- inbound event processing ---

    /// Process one inbound event: verify, authorize, apply.
    ///
    /// Drops are not errors; the event is logged and the pipeline moves on.
    pub fn handle_event(&self, ev: &EventAnnounce) -> Result<(), StoreError> {
        let owner = ev.announce.node_id.clone();
        if owner == self.node_id {
            debug!(kind = ?ev.kind, "skipping own event");
            return Ok(());
        }
        let valid = match ev.announce.verify() {
            Ok(()) => true,
            Err(_) => {
                self.metrics.announce_invalid_total.inc();
                false
            }
        };
        match ev.kind {
            EventKind::RecordUpdate => {
                if !self.publish_allowed(&owner) {
                    warn!(owner = %owner, "skipping record update event from an unauthorized source");
                    return Ok(());
                }
                if !valid {
                    warn!(owner = %owner, "skipping record update event with bad signature");
                    return Ok(());
                }
                self.apply_record_update(ev)
            }
            EventKind::BeatTick => {
                if !valid {
                    warn!(owner = %owner, "skipping invalid beat tick event");
                    return Ok(());
                }
                self.apply_beat_tick(ev)
            }
            EventKind::BeatInfo => {
                if !valid {
                    warn!(owner = %owner, "skipping invalid beat info event");
                    return Ok(());
                }
                self.apply_beat_info(ev)
            }
            kind => {
                warn!(kind = ?kind, "skipping unknown event");
                Ok(())
            }
        }
    }

    fn apply_record_update(&self, ev: &EventAnnounce) -> Result<(), StoreError> {
        let update = match EnvelopeRecordUpdate::unpack(&ev.announce.envelope) {
            Ok(u) => u,
            Err(e) => {
                warn!(err = %e, "failed to unpack record update envelope");
                return Ok(());
            }
        };
        let head = match self.fs.head_object(&update.version) {
            Ok(r) => r,
            Err(ObjectError::NotFound) => {
                // The block may arrive later; drop and let a future announce
                // retry.
                warn!(version = %update.version, "object announced but not found locally");
                self.metrics.events_dropped_total.inc();
                return Ok(());
            }
            Err(e) => {
                warn!(err = %e, version = %update.version, "failed to resolve announced object");
                return Ok(());
            }
        };

        let rec_id = head.id.clone();
        let rec_path = head.path.clone();
        let rk = Key::new(BUCKET_RECORDS, rec_id.as_bytes());
        let pk = Self::path_key(&rec_path);
        let announce = ev.announce.clone();
        let version = head.version.clone();
        self.ss.update_two(&rk, &pk, |rec_slot, path_slot| {
            let new_version = RecordVersion {
                version: version.clone(),
                announce: announce.clone(),
            };
            let rec = match rec_slot {
                None => Record {
                    id: rec_id.clone(),
                    path: rec_path.clone(),
                    created_at: announce.timestamp,
                    current: new_version,
                    previous: Vec::new(),
                },
                Some(bytes) => {
                    let mut rec = Self::decode_record(bytes)?;
                    // Redelivered announce for the version already at head.
                    if rec.current.version == new_version.version {
                        return Ok((Modify::Keep, Modify::Keep));
                    }
                    let old = std::mem::replace(&mut rec.current, new_version);
                    rec.previous.push(old);
                    rec
                }
            };
            let bytes = rec.pack().map_err(|_| StateError::Codec)?;
            Ok((
                Modify::Put(bytes),
                Self::path_index_add(path_slot, &rec_path, &rec_id)?,
            ))
        })?;

        if let Err(e) = self.fs.pin_newest(&head, self.keep_versions) {
            warn!(err = %e, version = %head.version, "failed to pin announced version");
        }
        Ok(())
    }

    fn apply_beat_tick(&self, ev: &EventAnnounce) -> Result<(), StoreError> {
        let tick = match crate::core::announce::EnvelopeBeatTick::unpack(&ev.announce.envelope) {
            Ok(t) => t,
            Err(e) => {
                warn!(err = %e, "failed to unpack beat tick");
                return Ok(());
            }
        };
        let bytes = encode_canonical(&tick)?;
        let k = Key::new(BUCKET_BEAT_TICKS, tick.id.as_bytes()).with_ttl(BEAT_TICK_TTL);
        self.ss.update(&k, |existing| {
            if existing.is_some() {
                return Ok(Modify::Keep);
            }
            Ok(Modify::Put(bytes.clone()))
        })?;
        Ok(())
    }

    fn apply_beat_info(&self, ev: &EventAnnounce) -> Result<(), StoreError> {
        let info = match crate::core::announce::EnvelopeBeatInfo::unpack(&ev.announce.envelope) {
            Ok(i) => i,
            Err(e) => {
                warn!(err = %e, "failed to unpack beat info");
                return Ok(());
            }
        };
        let id = match TimeId::parse(&info.id) {
            Ok(id) => id,
            Err(_) => {
                warn!(id = %info.id, "failed to parse beat info timestamp");
                return Ok(());
            }
        };
        let addr_len = info.ethereum_addr.len();
        if addr_len == 0 || addr_len > MAX_ETH_ADDR_LEN {
            warn!(len = addr_len, "skipping beat with incorrect eth address length");
            return Ok(());
        }

        // Ticks before the claimed uptime window started do not count.
        let lower_bound = id
            .timestamp_ms()
            .saturating_sub(info.uptime_secs.saturating_mul(1000));
        let mut ticks = 0usize;
        self.ss.range_peek(BUCKET_BEAT_TICKS, |_, bytes| {
            let tick: crate::core::announce::EnvelopeBeatTick =
                match decode_canonical_limited(bytes, MAX_RECORD_BYTES) {
                    Ok(t) => t,
                    Err(_) => return Ok(Scan::Continue),
                };
            let Ok(tick_id) = TimeId::parse(&tick.id) else {
                return Ok(Scan::Continue);
            };
            if tick_id.timestamp_ms() >= lower_bound && tick.session == info.session {
                ticks += 1;
            }
            Ok(Scan::Continue)
        })?;
        if ticks < BEAT_INFO_MIN_TICKS {
            debug!(session = %info.session, ticks, "beat info lacks backing ticks");
            return Ok(());
        }

        let bytes = encode_canonical(&info)?;
        let k = Key::new(BUCKET_BEAT_INFOS, info.session.as_bytes()).with_ttl(BEAT_INFO_TTL);
        self.ss.update(&k, |existing| {
            let Some(existing) = existing else {
                return Ok(Modify::Put(bytes.clone()));
            };
            let prior: crate::core::announce::EnvelopeBeatInfo =
                decode_canonical_limited(existing, MAX_RECORD_BYTES)
                    .map_err(|_| StateError::Codec)?;
            // Only a strictly growing uptime under the same address updates
            // the row.
            if info.uptime_secs <= prior.uptime_secs {
                return Ok(Modify::Keep);
            }
            if info.ethereum_addr != prior.ethereum_addr {
                return Ok(Modify::Keep);
            }
            Ok(Modify::Put(bytes.clone()))
        })?;
        Ok(())
    }

    // --- pin / GC ---

    /// Cap every record's version chain at `keep_versions` previous entries,
    /// unpinning the dropped head of each chain. Idempotent.
    pub fn gc(&self) -> Result<(), StoreError> {
        let keep = self.keep_versions;
        self.ss.range_modify(BUCKET_RECORDS, |_, bytes| {
            let rec = Self::decode_record(bytes)?;
            if rec.previous.len() <= keep {
                return Ok((Modify::Keep, Scan::Continue));
            }
            let mut rec = rec;
            let (kept, removed) = cap_versions(std::mem::take(&mut rec.previous), keep);
            rec.previous = kept;
            for version in removed {
                if let Err(e) = self.fs.unpin_object(&version) {
                    debug!(version = %version, err = %e, "failed to unpin during GC");
                }
            }
            let bytes = rec.pack().map_err(|_| StateError::Codec)?;
            Ok((Modify::Put(bytes), Scan::Continue))
        })?;
        Ok(())
    }
}
