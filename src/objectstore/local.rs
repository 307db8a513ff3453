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

//! Disk-backed object store for private overlay nodes.
//!
//! Objects live under `<data_dir>/objects/<addr>/` as a `meta` entry plus an
//! optional `content` entry; the content address is the SHA-256 over the
//! canonical meta bytes and the body. Pub/sub is a process-local bus whose
//! delivery path verifies announce signatures, and the peer tunnel speaks
//! plain HTTP against configured peer addresses.

use super::{Message, MessageHandler, Object, ObjectError, ObjectRef, ObjectStore, PutSpec};
use crate::core::announce::{now_nanos, Announce};
use crate::core::identity::{self, NodeIdentity};
use crate::core::record::ObjectMeta;
use crate::core::types::{decode_canonical_limited, encode_canonical, MAX_RECORD_BYTES};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

const PING_DEADLINE: Duration = Duration::from_secs(15);

fn io_err(e: std::io::Error) -> ObjectError {
    ObjectError::Io(e.to_string())
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), ObjectError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");
    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(io_err)?;
        f.write_all(bytes).map_err(io_err)?;
        let _ = f.sync_all();
    }
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

#[derive(Default)]
struct Bus {
    subs: RwLock<HashMap<String, Vec<MessageHandler>>>,
}

impl Bus {
    fn subscribe(&self, topics: &[&str], handler: MessageHandler) {
        let Ok(mut subs) = self.subs.write() else {
            return;
        };
        for topic in topics {
            subs.entry(topic.to_string())
                .or_default()
                .push(handler.clone());
        }
    }

    /// Deliver to every subscriber of `topic` after verifying the announce
    /// signature. Unverifiable payloads never reach a handler.
    fn deliver(&self, from: &str, topic: &str, data: &[u8]) {
        let ann: Announce = match decode_canonical_limited(data, MAX_RECORD_BYTES) {
            Ok(a) => a,
            Err(_) => {
                warn!(topic = %topic, "dropping undecodable pubsub payload");
                return;
            }
        };
        if ann.verify().is_err() {
            warn!(topic = %topic, from = %from, "dropping pubsub payload with bad signature");
            return;
        }
        let Ok(subs) = self.subs.read() else { return };
        if let Some(handlers) = subs.get(topic) {
            for h in handlers {
                h(Message {
                    from: from.to_string(),
                    topic: topic.to_string(),
                    data: data.to_vec(),
                });
            }
        }
    }
}

/// Node-local object store, pub/sub bus and peer tunnel.
pub struct LocalStore {
    dir: PathBuf,
    identity: NodeIdentity,
    pins: Mutex<HashSet<String>>,
    bus: Bus,
    peers: RwLock<BTreeMap<String, String>>,
    http: reqwest::Client,
}

impl LocalStore {
    /// Open the store under `data_dir`; `peers` maps node IDs to the base
    /// URLs of their private surfaces.
    pub fn open(data_dir: &str, peers: BTreeMap<String, String>) -> Result<Self, ObjectError> {
        let dir = PathBuf::from(data_dir);
        fs::create_dir_all(dir.join("objects")).map_err(io_err)?;
        let identity =
            NodeIdentity::open(data_dir).map_err(|e| ObjectError::Io(e.to_string()))?;
        let pins = Self::load_pins(&dir)?;
        Ok(Self {
            dir,
            identity,
            pins: Mutex::new(pins),
            bus: Bus::default(),
            peers: RwLock::new(peers),
            http: reqwest::Client::new(),
        })
    }

    /// Register or replace a peer address after open.
    pub fn add_peer(&self, node_id: &str, base_url: &str) {
        if let Ok(mut peers) = self.peers.write() {
            peers.insert(node_id.to_string(), base_url.to_string());
        }
    }

    fn load_pins(dir: &Path) -> Result<HashSet<String>, ObjectError> {
        let path = dir.join("pins");
        if !path.exists() {
            return Ok(HashSet::new());
        }
        let raw = fs::read_to_string(&path).map_err(io_err)?;
        Ok(raw
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn save_pins(&self, pins: &HashSet<String>) -> Result<(), ObjectError> {
        let mut sorted: Vec<&String> = pins.iter().collect();
        sorted.sort();
        let mut out = String::new();
        for p in sorted {
            out.push_str(p);
            out.push('\n');
        }
        atomic_write(&self.dir.join("pins"), out.as_bytes())
    }

    fn object_dir(&self, version: &str) -> PathBuf {
        self.dir.join("objects").join(version)
    }

    fn read_meta(&self, version: &str) -> Result<ObjectMeta, ObjectError> {
        let path = self.object_dir(version).join("meta");
        if !path.exists() {
            return Err(ObjectError::NotFound);
        }
        let bytes = fs::read(&path).map_err(io_err)?;
        decode_canonical_limited(&bytes, MAX_RECORD_BYTES).map_err(|_| ObjectError::Codec)
    }

    fn write_version(
        &self,
        spec: &PutSpec,
        body: Option<&[u8]>,
    ) -> Result<ObjectRef, ObjectError> {
        let mut meta = ObjectMeta {
            id: spec.id.clone(),
            path: spec.path.clone(),
            created_at: now_nanos(),
            version: String::new(),
            version_previous: spec.version_previous.clone(),
            is_deleted: body.is_none(),
            size: body.map(|b| b.len() as u64).unwrap_or(0),
            user_meta: spec.user_meta.clone(),
        };

        // The address covers the meta bytes before the address itself is
        // filled in, plus the body.
        let meta_bytes = encode_canonical(&meta).map_err(|_| ObjectError::Codec)?;
        let mut ctx = ring::digest::Context::new(&ring::digest::SHA256);
        ctx.update(&meta_bytes);
        if let Some(body) = body {
            ctx.update(body);
        }
        let addr = hex::encode(ctx.finish().as_ref());
        meta.version = addr.clone();

        let dir = self.object_dir(&addr);
        let final_meta = encode_canonical(&meta).map_err(|_| ObjectError::Codec)?;
        atomic_write(&dir.join("meta"), &final_meta)?;
        if let Some(body) = body {
            atomic_write(&dir.join("content"), body)?;
        }
        debug!(version = %addr, path = %meta.path, deleted = meta.is_deleted, "object written");
        Ok(ObjectRef::from_meta(meta))
    }

    fn peer_url(&self, node_id: &str, suffix: &str) -> Result<String, ObjectError> {
        let peers = self
            .peers
            .read()
            .map_err(|_| ObjectError::Peer("peer table poisoned".to_string()))?;
        let base = peers
            .get(node_id)
            .ok_or_else(|| ObjectError::Peer(format!("unknown peer {node_id}")))?;
        Ok(format!("{}{}", base.trim_end_matches('/'), suffix))
    }
}

impl ObjectStore for LocalStore {
    fn node_id(&self) -> String {
        self.identity.node_id().to_string()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, ObjectError> {
        Ok(self.identity.sign(data))
    }

    fn verify(&self, node_id: &str, signature: &[u8], data: &[u8]) -> Result<bool, ObjectError> {
        identity::verify_node_signature(node_id, signature, data)
            .map_err(|_| ObjectError::Crypto)
    }

    fn put_object(&self, spec: &PutSpec, body: &[u8]) -> Result<ObjectRef, ObjectError> {
        self.write_version(spec, Some(body))
    }

    fn delete_object(&self, spec: &PutSpec) -> Result<ObjectRef, ObjectError> {
        self.write_version(spec, None)
    }

    fn get_object(&self, version: &str) -> Result<Object, ObjectError> {
        let meta = self.read_meta(version)?;
        let body = if meta.is_deleted {
            Vec::new()
        } else {
            fs::read(self.object_dir(version).join("content")).map_err(io_err)?
        };
        Ok(Object { meta, body })
    }

    fn head_object(&self, version: &str) -> Result<ObjectRef, ObjectError> {
        Ok(ObjectRef::from_meta(self.read_meta(version)?))
    }

    fn list_objects(&self) -> Result<Vec<ObjectRef>, ObjectError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(self.dir.join("objects")).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let name = entry.file_name().to_string_lossy().to_string();
            match self.read_meta(&name) {
                Ok(meta) => out.push(ObjectRef::from_meta(meta)),
                Err(ObjectError::NotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    fn pin_object(&self, version: &str) -> Result<(), ObjectError> {
        let mut pins = self
            .pins
            .lock()
            .map_err(|_| ObjectError::Io("pin set poisoned".to_string()))?;
        if pins.insert(version.to_string()) {
            self.save_pins(&pins)?;
        }
        Ok(())
    }

    fn unpin_object(&self, version: &str) -> Result<(), ObjectError> {
        let mut pins = self
            .pins
            .lock()
            .map_err(|_| ObjectError::Io("pin set poisoned".to_string()))?;
        if pins.remove(version) {
            self.save_pins(&pins)?;
        }
        Ok(())
    }

    fn is_pinned(&self, version: &str) -> Result<bool, ObjectError> {
        let pins = self
            .pins
            .lock()
            .map_err(|_| ObjectError::Io("pin set poisoned".to_string()))?;
        Ok(pins.contains(version))
    }

    fn publish(&self, topic: &str, data: &[u8]) -> Result<(), ObjectError> {
        self.bus.deliver(self.identity.node_id(), topic, data);
        Ok(())
    }

    fn subscribe(&self, topics: &[&str], handler: MessageHandler) -> Result<(), ObjectError> {
        self.bus.subscribe(topics, handler);
        Ok(())
    }

    fn strict_verification(&self) -> bool {
        true
    }

    async fn ping(&self, node_id: &str) -> Result<String, ObjectError> {
        let url = self.peer_url(node_id, "/private/v1/ping")?;
        let resp = self
            .http
            .get(&url)
            .timeout(PING_DEADLINE)
            .send()
            .await
            .map_err(|e| ObjectError::Peer(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ObjectError::Peer(format!("ping status {}", resp.status())));
        }
        resp.text().await.map_err(|e| ObjectError::Peer(e.to_string()))
    }

    async fn fetch_records(&self, node_id: &str) -> Result<Vec<u8>, ObjectError> {
        let url = self.peer_url(node_id, "/private/v1/records")?;
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ObjectError::Peer(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ObjectError::Peer(format!(
                "records status {}",
                resp.status()
            )));
        }
        Ok(resp
            .bytes()
            .await
            .map_err(|e| ObjectError::Peer(e.to_string()))?
            .to_vec())
    }

    async fn push_announce(&self, node_id: &str, event_json: &[u8]) -> Result<(), ObjectError> {
        let url = self.peer_url(node_id, "/private/v1/announce")?;
        let resp = self
            .http
            .post(&url)
            .timeout(PING_DEADLINE)
            .header("content-type", "application/json")
            .body(event_json.to_vec())
            .send()
            .await
            .map_err(|e| ObjectError::Peer(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(ObjectError::Peer(format!(
                "announce status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
