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

//! The content-addressed object store collaborator.
//!
//! The record store never talks to the overlay network directly; everything
//! goes through this trait: identity and signing, content-addressed object
//! I/O, pinning, the announcement pub/sub bus and the private peer tunnel.
//! How blocks move between machines is the adapter's business.

use crate::core::record::ObjectMeta;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

mod local;

pub use local::LocalStore;

/// Object store errors.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// No object under the given content address.
    #[error("object not found")]
    NotFound,
    /// Backing storage failure.
    #[error("object i/o: {0}")]
    Io(String),
    /// Signing or verification failure.
    #[error("crypto")]
    Crypto,
    /// Stored bytes failed to decode.
    #[error("codec")]
    Codec,
    /// Pub/sub bus failure.
    #[error("pubsub: {0}")]
    Pubsub(String),
    /// Peer tunnel failure.
    #[error("peer: {0}")]
    Peer(String),
}

/// Reference to one object version.
#[derive(Clone, Debug, Default)]
pub struct ObjectRef {
    /// Record TimeID the object belongs to.
    pub id: String,
    /// Record path at write time.
    pub path: String,
    /// Body size in bytes.
    pub size: u64,
    /// Content address of this version.
    pub version: String,
    /// Content address of the predecessor version, empty for the first.
    pub version_previous: String,
    /// Full per-version metadata when the object has been resolved.
    pub meta: Option<ObjectMeta>,
}

impl ObjectRef {
    /// Build a reference from resolved metadata.
    pub fn from_meta(meta: ObjectMeta) -> Self {
        Self {
            id: meta.id.clone(),
            path: meta.path.clone(),
            size: meta.size,
            version: meta.version.clone(),
            version_previous: meta.version_previous.clone(),
            meta: Some(meta),
        }
    }
}

/// A resolved object: metadata plus body bytes (empty for tombstones).
#[derive(Clone, Debug)]
pub struct Object {
    /// Per-version metadata.
    pub meta: ObjectMeta,
    /// Body bytes.
    pub body: Vec<u8>,
}

/// What a new version write needs to know.
#[derive(Clone, Debug, Default)]
pub struct PutSpec {
    /// Record TimeID.
    pub id: String,
    /// Record path.
    pub path: String,
    /// Declared body size (the written size wins when they differ).
    pub size: u64,
    /// Content address of the predecessor version, empty for the first.
    pub version_previous: String,
    /// Caller-supplied metadata (JSON text).
    pub user_meta: String,
}

/// A message delivered from the pub/sub bus.
#[derive(Clone, Debug)]
pub struct Message {
    /// Sender node ID.
    pub from: String,
    /// Topic the message arrived on.
    pub topic: String,
    /// Raw payload (a packed announce).
    pub data: Vec<u8>,
}

/// Subscription callback.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// The external collaborator contract.
pub trait ObjectStore: Send + Sync + 'static {
    /// This node's ID (embeds the Ed25519 verification key).
    fn node_id(&self) -> String;

    /// Sign bytes with the node's private key.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, ObjectError>;

    /// Verify a signature against the key embedded in `node_id`.
    fn verify(&self, node_id: &str, signature: &[u8], data: &[u8]) -> Result<bool, ObjectError>;

    /// Write a new object version; returns the reference carrying the fresh
    /// content address.
    fn put_object(&self, spec: &PutSpec, body: &[u8]) -> Result<ObjectRef, ObjectError>;

    /// Write a tombstone version (no body).
    fn delete_object(&self, spec: &PutSpec) -> Result<ObjectRef, ObjectError>;

    /// Resolve metadata and body for a content address.
    fn get_object(&self, version: &str) -> Result<Object, ObjectError>;

    /// Resolve metadata only.
    fn head_object(&self, version: &str) -> Result<ObjectRef, ObjectError>;

    /// Enumerate locally held object versions.
    fn list_objects(&self) -> Result<Vec<ObjectRef>, ObjectError>;

    /// Pin a version against removal.
    fn pin_object(&self, version: &str) -> Result<(), ObjectError>;

    /// Release a pin; unpinned versions become eligible for removal.
    fn unpin_object(&self, version: &str) -> Result<(), ObjectError>;

    /// Observable pin state.
    fn is_pinned(&self, version: &str) -> Result<bool, ObjectError>;

    /// Pin the newest `depth` versions reachable from `head` and unpin the
    /// rest of the chain.
    ///
    /// The walk follows predecessor pointers and stops early once it reaches
    /// a version that is already unpinned: everything past it was unpinned by
    /// an earlier pass.
    fn pin_newest(&self, head: &ObjectRef, depth: usize) -> Result<(), ObjectError> {
        self.pin_object(&head.version)?;
        let mut pos = 1usize;
        let mut prev = head.version_previous.clone();
        while !prev.is_empty() {
            let resolved = match self.head_object(&prev) {
                Ok(r) => r,
                Err(ObjectError::NotFound) => break,
                Err(e) => return Err(e),
            };
            if pos >= depth {
                if !self.is_pinned(&prev)? {
                    break;
                }
                self.unpin_object(&prev)?;
            } else {
                self.pin_object(&prev)?;
            }
            prev = resolved.version_previous;
            pos += 1;
        }
        Ok(())
    }

    /// Publish bytes on a topic.
    fn publish(&self, topic: &str, data: &[u8]) -> Result<(), ObjectError>;

    /// Subscribe a handler to the given topics.
    ///
    /// Delivery MUST verify announce signatures before invoking the handler;
    /// [`ObjectStore::strict_verification`] reports whether that holds.
    fn subscribe(&self, topics: &[&str], handler: MessageHandler) -> Result<(), ObjectError>;

    /// Whether the transport enforces signature verification on delivery.
    fn strict_verification(&self) -> bool;

    /// Ping a peer over the private tunnel; resolves to the peer's node ID.
    fn ping(&self, node_id: &str) -> impl Future<Output = Result<String, ObjectError>> + Send;

    /// Pull the peer's full record export (back-to-back packed records).
    fn fetch_records(
        &self,
        node_id: &str,
    ) -> impl Future<Output = Result<Vec<u8>, ObjectError>> + Send;

    /// Hand an announce (JSON event) directly to a peer.
    fn push_announce(
        &self,
        node_id: &str,
        event_json: &[u8],
    ) -> impl Future<Output = Result<(), ObjectError>> + Send;
}
