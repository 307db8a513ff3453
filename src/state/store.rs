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

//! sled-backed indexed store.
//!
//! Values carry an 8-byte big-endian expiry prefix (milliseconds since the
//! UNIX epoch, zero for no expiry). Expired entries read as missing and a
//! background sweep removes them on a fixed interval.

use super::{Key, Modify, Scan, StateError};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const EXPIRY_PREFIX: usize = 8;

/// Store tuning knobs.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Interval of the expired-entry sweep.
    pub compact_interval: Duration,
    /// Skip spawning the sweep worker (tests drive sweeps directly).
    pub no_sweeper: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            compact_interval: Duration::from_secs(300),
            no_sweeper: false,
        }
    }
}

/// Transactional bucketed store with per-key TTL.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    stop: Arc<AtomicBool>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn wrap_value(payload: &[u8], ttl: Option<Duration>) -> Vec<u8> {
    let expiry = match ttl {
        Some(ttl) => now_ms().saturating_add(ttl.as_millis() as u64),
        None => 0,
    };
    let mut out = Vec::with_capacity(EXPIRY_PREFIX + payload.len());
    out.extend_from_slice(&expiry.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn live_payload(value: &[u8]) -> Option<&[u8]> {
    if value.len() < EXPIRY_PREFIX {
        return None;
    }
    let mut raw = [0u8; EXPIRY_PREFIX];
    raw.copy_from_slice(&value[..EXPIRY_PREFIX]);
    let expiry = u64::from_be_bytes(raw);
    if expiry != 0 && expiry <= now_ms() {
        return None;
    }
    Some(&value[EXPIRY_PREFIX..])
}

fn expiry_of(value: &[u8]) -> u64 {
    if value.len() < EXPIRY_PREFIX {
        return 0;
    }
    let mut raw = [0u8; EXPIRY_PREFIX];
    raw.copy_from_slice(&value[..EXPIRY_PREFIX]);
    u64::from_be_bytes(raw)
}

fn io(e: sled::Error) -> StateError {
    StateError::Io(e.to_string())
}

impl Store {
    /// Open (or create) the store at `path` and start the sweep worker.
    ///
    /// An open failure is fatal to the caller: the node cannot run without
    /// its index.
    pub fn open(path: &str, opts: StoreOptions) -> Result<Self, StateError> {
        let db = sled::open(path).map_err(io)?;
        let store = Self {
            db,
            stop: Arc::new(AtomicBool::new(false)),
        };
        if !opts.no_sweeper {
            let worker = store.clone();
            let interval = opts.compact_interval;
            std::thread::spawn(move || worker.sweep_loop(interval));
        }
        Ok(store)
    }

    /// Read-only access to the live value under `k`.
    pub fn view<T>(
        &self,
        k: &Key,
        peek: impl FnOnce(&[u8]) -> Result<T, StateError>,
    ) -> Result<T, StateError> {
        let value = self.db.get(k.encode()).map_err(io)?;
        match value {
            None => Err(StateError::NotFound),
            Some(iv) => match live_payload(&iv) {
                None => Err(StateError::NotFound),
                Some(payload) => peek(payload),
            },
        }
    }

    /// Read-modify-write in one transaction.
    ///
    /// `modify` sees the live value (or `None`) and returns [`Modify::Keep`]
    /// to leave the entry untouched. The key's TTL applies to the written
    /// value.
    pub fn update<F>(&self, k: &Key, mut modify: F) -> Result<(), StateError>
    where
        F: FnMut(Option<&[u8]>) -> Result<Modify, StateError>,
    {
        let kb = k.encode();
        let ttl = k.ttl;
        // sled may retry the closure on conflict, hence the RefCell hop from
        // Fn to the caller's FnMut.
        let modify = RefCell::new(&mut modify);
        let res: Result<(), TransactionError<StateError>> = self.db.transaction(|tx| {
            let current = tx.get(kb)?;
            let live = current.as_deref().and_then(live_payload);
            let outcome =
                (modify.borrow_mut())(live).map_err(ConflictableTransactionError::Abort)?;
            if let Modify::Put(bytes) = outcome {
                tx.insert(&kb[..], wrap_value(&bytes, ttl))?;
            }
            Ok(())
        });
        translate(res)
    }

    /// Read-modify-write over two keys in one transaction.
    ///
    /// Used to keep a secondary index in step with its primary entry; each
    /// slot is modified (or kept) independently, the write is atomic.
    pub fn update_two<F>(&self, ka: &Key, kb: &Key, mut modify: F) -> Result<(), StateError>
    where
        F: FnMut(Option<&[u8]>, Option<&[u8]>) -> Result<(Modify, Modify), StateError>,
    {
        let ea = ka.encode();
        let eb = kb.encode();
        let ttl_a = ka.ttl;
        let ttl_b = kb.ttl;
        let modify = RefCell::new(&mut modify);
        let res: Result<(), TransactionError<StateError>> = self.db.transaction(|tx| {
            let cur_a = tx.get(ea)?;
            let cur_b = tx.get(eb)?;
            let live_a = cur_a.as_deref().and_then(live_payload);
            let live_b = cur_b.as_deref().and_then(live_payload);
            let (out_a, out_b) =
                (modify.borrow_mut())(live_a, live_b).map_err(ConflictableTransactionError::Abort)?;
            if let Modify::Put(bytes) = out_a {
                tx.insert(&ea[..], wrap_value(&bytes, ttl_a))?;
            }
            if let Modify::Put(bytes) = out_b {
                tx.insert(&eb[..], wrap_value(&bytes, ttl_b))?;
            }
            Ok(())
        });
        translate(res)
    }

    /// Forward iteration over the keys of one bucket.
    pub fn range_keys<F>(&self, bucket: u16, mut f: F) -> Result<(), StateError>
    where
        F: FnMut(&Key) -> Result<Scan, StateError>,
    {
        for item in self.db.scan_prefix(bucket.to_be_bytes()) {
            let (k, v) = item.map_err(io)?;
            if live_payload(&v).is_none() {
                continue;
            }
            let Some(key) = Key::decode(&k) else { continue };
            if f(&key)? == Scan::Stop {
                break;
            }
        }
        Ok(())
    }

    /// Forward iteration over `(key, value)` pairs of one bucket.
    pub fn range_peek<F>(&self, bucket: u16, mut f: F) -> Result<(), StateError>
    where
        F: FnMut(&Key, &[u8]) -> Result<Scan, StateError>,
    {
        for item in self.db.scan_prefix(bucket.to_be_bytes()) {
            let (k, v) = item.map_err(io)?;
            let Some(payload) = live_payload(&v) else {
                continue;
            };
            let Some(key) = Key::decode(&k) else { continue };
            if f(&key, payload)? == Scan::Stop {
                break;
            }
        }
        Ok(())
    }

    /// Forward iteration with write-back, one key at a time.
    ///
    /// Accepted modifications are written as they are produced; there is no
    /// cross-key atomicity. An entry's expiry survives the rewrite.
    pub fn range_modify<F>(&self, bucket: u16, mut f: F) -> Result<(), StateError>
    where
        F: FnMut(&Key, &[u8]) -> Result<(Modify, Scan), StateError>,
    {
        let mut keys = Vec::new();
        for item in self.db.scan_prefix(bucket.to_be_bytes()) {
            let (k, _) = item.map_err(io)?;
            keys.push(k);
        }
        for k in keys {
            let Some(value) = self.db.get(&k).map_err(io)? else {
                continue;
            };
            let Some(payload) = live_payload(&value) else {
                continue;
            };
            let Some(key) = Key::decode(&k) else { continue };
            let (outcome, flow) = f(&key, payload)?;
            if let Modify::Put(bytes) = outcome {
                let expiry = expiry_of(&value);
                let mut wrapped = Vec::with_capacity(EXPIRY_PREFIX + bytes.len());
                wrapped.extend_from_slice(&expiry.to_be_bytes());
                wrapped.extend_from_slice(&bytes);
                self.db.insert(&k, wrapped).map_err(io)?;
            }
            if flow == Scan::Stop {
                break;
            }
        }
        Ok(())
    }

    /// Remove the entry under `k`; removing a missing key is not an error.
    pub fn delete(&self, k: &Key) -> Result<(), StateError> {
        self.db.remove(k.encode()).map_err(io)?;
        Ok(())
    }

    /// Drop expired entries and flush. Safe to call at any time.
    pub fn sweep_expired(&self) -> Result<usize, StateError> {
        let mut expired = Vec::new();
        for item in self.db.iter() {
            let (k, v) = item.map_err(io)?;
            let expiry = expiry_of(&v);
            if expiry != 0 && expiry <= now_ms() {
                expired.push(k);
            }
        }
        let removed = expired.len();
        for k in expired {
            self.db.remove(k).map_err(io)?;
        }
        self.db.flush().map_err(io)?;
        Ok(removed)
    }

    fn sweep_loop(&self, interval: Duration) {
        loop {
            std::thread::sleep(interval);
            if self.stop.load(Ordering::Relaxed) {
                return;
            }
            match self.sweep_expired() {
                Ok(0) => {}
                Ok(n) => debug!(removed = n, "state sweep removed expired entries"),
                Err(e) => warn!(err = %e, "state sweep failed"),
            }
        }
    }

    /// Stop the sweep worker and flush outstanding writes.
    pub fn close(&self) -> Result<(), StateError> {
        self.stop.store(true, Ordering::Relaxed);
        self.db.flush().map_err(io)?;
        Ok(())
    }
}

fn translate(res: Result<(), TransactionError<StateError>>) -> Result<(), StateError> {
    match res {
        Ok(()) => Ok(()),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BUCKET_BEAT_TICKS, BUCKET_RECORDS};

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(
            dir.path().to_str().unwrap(),
            StoreOptions {
                no_sweeper: true,
                ..Default::default()
            },
        )
        .unwrap();
        (dir, store)
    }

    #[test]
    fn update_then_view() {
        let (_dir, store) = open_store();
        let k = Key::new(BUCKET_RECORDS, b"01ARZ3NDEKTSV4RRFFQ69G5FAV");
        store
            .update(&k, |old| {
                assert!(old.is_none());
                Ok(Modify::Put(b"hello".to_vec()))
            })
            .unwrap();
        let got = store.view(&k, |v| Ok(v.to_vec())).unwrap();
        assert_eq!(got, b"hello");
    }

    #[test]
    fn keep_leaves_value_untouched() {
        let (_dir, store) = open_store();
        let k = Key::new(BUCKET_RECORDS, b"key-1");
        store.update(&k, |_| Ok(Modify::Put(b"a".to_vec()))).unwrap();
        store.update(&k, |_| Ok(Modify::Keep)).unwrap();
        let got = store.view(&k, |v| Ok(v.to_vec())).unwrap();
        assert_eq!(got, b"a");
    }

    #[test]
    fn missing_key_is_not_found() {
        let (_dir, store) = open_store();
        let k = Key::new(BUCKET_RECORDS, b"nope");
        assert!(matches!(
            store.view(&k, |_| Ok(())),
            Err(StateError::NotFound)
        ));
        store.delete(&k).unwrap();
    }

    #[test]
    fn expired_entries_read_as_missing_and_sweep() {
        let (_dir, store) = open_store();
        let k = Key::new(BUCKET_BEAT_TICKS, b"tick-1").with_ttl(Duration::from_millis(1));
        store.update(&k, |_| Ok(Modify::Put(b"x".to_vec()))).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(matches!(
            store.view(&k, |_| Ok(())),
            Err(StateError::NotFound)
        ));
        assert_eq!(store.sweep_expired().unwrap(), 1);
    }

    #[test]
    fn range_is_bucket_scoped_and_ordered() {
        let (_dir, store) = open_store();
        for (bucket, key) in [
            (BUCKET_RECORDS, b"b".as_slice()),
            (BUCKET_RECORDS, b"a".as_slice()),
            (BUCKET_BEAT_TICKS, b"zz".as_slice()),
        ] {
            store
                .update(&Key::new(bucket, key), |_| Ok(Modify::Put(key.to_vec())))
                .unwrap();
        }
        let mut seen = Vec::new();
        store
            .range_peek(BUCKET_RECORDS, |_, v| {
                seen.push(v.to_vec());
                Ok(Scan::Continue)
            })
            .unwrap();
        assert_eq!(seen, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn range_stop_breaks_early() {
        let (_dir, store) = open_store();
        for key in [b"a", b"b", b"c"] {
            store
                .update(&Key::new(BUCKET_RECORDS, key), |_| {
                    Ok(Modify::Put(key.to_vec()))
                })
                .unwrap();
        }
        let mut n = 0;
        store
            .range_peek(BUCKET_RECORDS, |_, _| {
                n += 1;
                Ok(Scan::Stop)
            })
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn range_modify_rewrites_in_place() {
        let (_dir, store) = open_store();
        for key in [b"a", b"b"] {
            store
                .update(&Key::new(BUCKET_RECORDS, key), |_| {
                    Ok(Modify::Put(key.to_vec()))
                })
                .unwrap();
        }
        store
            .range_modify(BUCKET_RECORDS, |_, v| {
                let mut out = v.to_vec();
                out.push(b'!');
                Ok((Modify::Put(out), Scan::Continue))
            })
            .unwrap();
        let got = store
            .view(&Key::new(BUCKET_RECORDS, b"a"), |v| Ok(v.to_vec()))
            .unwrap();
        assert_eq!(got, b"a!");
    }

    #[test]
    fn update_two_is_atomic_across_keys() {
        let (_dir, store) = open_store();
        let ka = Key::new(BUCKET_RECORDS, b"primary");
        let kb = Key::new(crate::state::BUCKET_PATHS, b"index");
        store
            .update_two(&ka, &kb, |a, b| {
                assert!(a.is_none() && b.is_none());
                Ok((Modify::Put(b"rec".to_vec()), Modify::Put(b"idx".to_vec())))
            })
            .unwrap();
        assert_eq!(store.view(&ka, |v| Ok(v.to_vec())).unwrap(), b"rec");
        assert_eq!(store.view(&kb, |v| Ok(v.to_vec())).unwrap(), b"idx");
    }
}
