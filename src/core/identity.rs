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

//! Node identity: Ed25519 keys and self-certifying node IDs.
//!
//! A node ID is the base58 form of an identity multihash over the node's
//! Ed25519 public key (`0x00 0x20 || key`), so the verification key is
//! recoverable from the ID itself. Verifiers must derive the key from the
//! ID and never accept one from a side channel.

use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Identity errors.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// An I/O operation failed.
    #[error("io")]
    Io,
    /// The key encoding was invalid.
    #[error("invalid key encoding")]
    InvalidKey,
    /// The node ID was invalid.
    #[error("invalid node id")]
    InvalidNodeId,
    /// Signature verification failed.
    #[error("bad signature")]
    BadSignature,
}

const MULTIHASH_IDENTITY: u8 = 0x00;
const ED25519_KEY_LEN: usize = 32;
const ED25519_SIG_LEN: usize = 64;

/// Derive the node ID string from raw Ed25519 public key bytes.
pub fn node_id_from_public_key(pk: &[u8; ED25519_KEY_LEN]) -> String {
    let mut mh = Vec::with_capacity(2 + ED25519_KEY_LEN);
    mh.push(MULTIHASH_IDENTITY);
    mh.push(ED25519_KEY_LEN as u8);
    mh.extend_from_slice(pk);
    bs58::encode(mh).into_string()
}

/// Recover the Ed25519 public key embedded in a node ID.
pub fn public_key_from_node_id(node_id: &str) -> Result<[u8; ED25519_KEY_LEN], IdentityError> {
    let raw = bs58::decode(node_id.trim())
        .into_vec()
        .map_err(|_| IdentityError::InvalidNodeId)?;
    if raw.len() != 2 + ED25519_KEY_LEN
        || raw[0] != MULTIHASH_IDENTITY
        || raw[1] as usize != ED25519_KEY_LEN
    {
        return Err(IdentityError::InvalidNodeId);
    }
    let mut out = [0u8; ED25519_KEY_LEN];
    out.copy_from_slice(&raw[2..]);
    Ok(out)
}

/// Verify an Ed25519 signature using the key recovered from `node_id`.
///
/// Returns `Ok(false)` for a well-formed but non-matching signature and an
/// error for malformed inputs.
pub fn verify_node_signature(
    node_id: &str,
    signature: &[u8],
    data: &[u8],
) -> Result<bool, IdentityError> {
    if signature.len() != ED25519_SIG_LEN {
        return Err(IdentityError::BadSignature);
    }
    let pk_bytes = public_key_from_node_id(node_id)?;
    let pk = UnparsedPublicKey::new(&ED25519, pk_bytes);
    Ok(pk.verify(data, signature).is_ok())
}

fn set_private_perms_best_effort(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

/// Atomic write to disk (best-effort fsync, then rename).
fn atomic_write_private(path: &Path, bytes: &[u8]) -> Result<(), IdentityError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|_| IdentityError::Io)?;
    }

    let mut tmp = path.to_path_buf();
    tmp.set_extension("tmp");

    {
        let mut f = fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp)
            .map_err(|_| IdentityError::Io)?;
        f.write_all(bytes).map_err(|_| IdentityError::Io)?;
        let _ = f.sync_all();
    }

    set_private_perms_best_effort(&tmp);
    fs::rename(&tmp, path).map_err(|_| IdentityError::Io)?;
    set_private_perms_best_effort(path);
    Ok(())
}

/// A node's signing identity backed by an Ed25519 PKCS#8 key file.
pub struct NodeIdentity {
    keypair: Ed25519KeyPair,
    node_id: String,
}

impl NodeIdentity {
    /// Load or create the identity key at `data_dir/node.key`.
    pub fn open(data_dir: &str) -> Result<Self, IdentityError> {
        let mut key_path = PathBuf::from(data_dir);
        key_path.push("node.key");
        Self::load_or_create(&key_path)
    }

    /// Load or create an Ed25519 PKCS#8 key file at the given path.
    pub fn load_or_create(path: &Path) -> Result<Self, IdentityError> {
        let keypair = if path.exists() {
            let bytes = fs::read(path).map_err(|_| IdentityError::Io)?;
            Ed25519KeyPair::from_pkcs8(&bytes).map_err(|_| IdentityError::InvalidKey)?
        } else {
            let rng = SystemRandom::new();
            let pkcs8 =
                Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| IdentityError::InvalidKey)?;
            atomic_write_private(path, pkcs8.as_ref())?;
            Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).map_err(|_| IdentityError::InvalidKey)?
        };

        let mut pk = [0u8; ED25519_KEY_LEN];
        pk.copy_from_slice(keypair.public_key().as_ref());
        let node_id = node_id_from_public_key(&pk);
        Ok(Self { keypair, node_id })
    }

    /// The node ID derived from this identity's public key.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Raw Ed25519 public key bytes.
    pub fn public_key(&self) -> [u8; ED25519_KEY_LEN] {
        let mut out = [0u8; ED25519_KEY_LEN];
        out.copy_from_slice(self.keypair.public_key().as_ref());
        out
    }

    /// Sign message bytes (64-byte Ed25519 signature).
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        self.keypair.sign(msg).as_ref().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_embeds_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let id = NodeIdentity::open(dir.path().to_str().unwrap()).unwrap();
        let recovered = public_key_from_node_id(id.node_id()).unwrap();
        assert_eq!(recovered, id.public_key());
    }

    #[test]
    fn identity_persists_across_open() {
        let dir = tempfile::tempdir().unwrap();
        let a = NodeIdentity::open(dir.path().to_str().unwrap()).unwrap();
        let b = NodeIdentity::open(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(a.node_id(), b.node_id());
    }

    #[test]
    fn sign_and_verify_via_node_id() {
        let dir = tempfile::tempdir().unwrap();
        let id = NodeIdentity::open(dir.path().to_str().unwrap()).unwrap();
        let sig = id.sign(b"payload");
        assert!(verify_node_signature(id.node_id(), &sig, b"payload").unwrap());
        assert!(!verify_node_signature(id.node_id(), &sig, b"other").unwrap());
    }

    #[test]
    fn malformed_node_id_is_an_error() {
        assert!(public_key_from_node_id("not base58 !!!").is_err());
        assert!(public_key_from_node_id("3yZe7d").is_err());
    }
}
