#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use meridian::authority::Authority;
use meridian::core::announce::EnvelopeRecordUpdate;
use meridian::monitoring::metrics::Metrics;
use meridian::objectstore::{LocalStore, ObjectStore};
use meridian::state::{Store, StoreOptions};
use meridian::store::{
    ReadOptions, RecordStore, RecordStoreOptions, StoreError, WriteOptions,
};

struct Node {
    _tmp: tempfile::TempDir,
    fs: Arc<LocalStore>,
    store: Arc<RecordStore<LocalStore>>,
}

async fn start_node(grant_write: bool) -> Node {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = tmp.path().to_str().unwrap().to_string();
    let fs = Arc::new(LocalStore::open(&dir, BTreeMap::new()).expect("object store"));
    let mut lines = Vec::new();
    if grant_write {
        lines.push(format!("{}:write,sync", fs.node_id()));
    }
    let auth = Authority::fixed(lines);
    let state = Store::open(
        &format!("{dir}/state"),
        StoreOptions {
            no_sweeper: true,
            ..Default::default()
        },
    )
    .expect("state store");
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let store = RecordStore::open(
        Arc::clone(&fs),
        state,
        auth,
        metrics,
        RecordStoreOptions::default(),
    )
    .expect("record store");
    store.sync(Duration::from_secs(5)).await.expect("sync");
    assert!(store.is_ready());
    Node {
        _tmp: tmp,
        fs,
        store,
    }
}

#[tokio::test]
async fn create_then_read_roundtrip() {
    let node = start_node(true).await;
    let stored = node
        .store
        .create_record(
            "/a/b.txt",
            b"hello",
            WriteOptions {
                size: 5,
                ..Default::default()
            },
        )
        .await
        .expect("create");

    let meta = stored.object.meta.clone().expect("meta");
    assert_eq!(meta.path, "/a/b.txt");
    assert_eq!(meta.size, 5);
    assert_eq!(meta.version_previous, "");
    assert!(!meta.is_deleted);
    assert_eq!(meta.id, stored.record.id);
    stored.record.validate().expect("signatures");

    let read = node
        .store
        .read_record("/a/b.txt", ReadOptions::default())
        .expect("read");
    assert_eq!(read.body.as_deref(), Some(b"hello".as_slice()));
    assert_eq!(read.object.meta.unwrap().id, stored.record.id);
    assert!(!read.deleted);
}

#[tokio::test]
async fn create_twice_fails_with_record_exists() {
    let node = start_node(true).await;
    node.store
        .create_record("/dup", b"x", WriteOptions::default())
        .await
        .expect("create");
    let err = node
        .store
        .create_record("/dup", b"y", WriteOptions::default())
        .await
        .expect_err("second create must fail");
    assert!(matches!(err, StoreError::RecordExists));
}

#[tokio::test]
async fn unauthorized_node_cannot_write() {
    let node = start_node(false).await;
    let err = node
        .store
        .create_record("/x", b"x", WriteOptions::default())
        .await
        .expect_err("write without permission");
    assert!(matches!(err, StoreError::NotAuthorized));
    assert!(err.to_string().contains("not authorized"));
}

#[tokio::test]
async fn update_chain_is_ordered_oldest_first() {
    let node = start_node(true).await;
    let created = node
        .store
        .create_record("/doc", b"v1", WriteOptions::default())
        .await
        .expect("create");
    let up1 = node
        .store
        .update_record("/doc", b"v2", WriteOptions::default())
        .await
        .expect("update 1");
    let up2 = node
        .store
        .update_record("/doc", b"v3", WriteOptions::default())
        .await
        .expect("update 2");

    assert_eq!(up2.record.previous.len(), 2);
    assert_eq!(up2.record.previous[0].version, created.object.version);
    assert_eq!(up2.record.previous[1].version, up1.object.version);
    assert_eq!(up2.record.current.version, up2.object.version);

    // The chain links through version_prev in reverse order.
    let env = up2.record.current_envelope().expect("envelope");
    assert_eq!(env.version_prev, up1.object.version);
    let env1 =
        EnvelopeRecordUpdate::unpack(&up2.record.previous[1].announce.envelope).expect("env1");
    assert_eq!(env1.version_prev, created.object.version);
    let env0 =
        EnvelopeRecordUpdate::unpack(&up2.record.previous[0].announce.envelope).expect("env0");
    assert_eq!(env0.version_prev, "");

    up2.record.validate().expect("all signatures verify");

    // Meta of the second update points back at the first.
    assert_eq!(
        up2.object.meta.unwrap().version_previous,
        up1.object.version
    );
}

#[tokio::test]
async fn delete_writes_a_tombstone_and_is_idempotent() {
    let node = start_node(true).await;
    node.store
        .create_record("/gone", b"data", WriteOptions::default())
        .await
        .expect("create");

    let first = node.store.delete_record("/gone").await.expect("delete");
    let meta = first.object.meta.clone().expect("meta");
    assert!(meta.is_deleted);
    assert_eq!(first.record.previous.len(), 1);

    let second = node.store.delete_record("/gone").await.expect("redelete");
    let meta2 = second.object.meta.clone().expect("meta");
    assert!(meta2.is_deleted);
    assert_eq!(meta2.version, meta.version);
    assert_eq!(second.record.previous.len(), 1);

    let read = node
        .store
        .read_record("/gone", ReadOptions::default())
        .expect("tombstone read resolves");
    assert!(read.deleted);
    assert!(read.body.is_none());
}

#[tokio::test]
async fn record_id_is_resolvable_as_path() {
    let node = start_node(true).await;
    let stored = node
        .store
        .create_record("/named", b"n", WriteOptions::default())
        .await
        .expect("create");
    let read = node
        .store
        .read_record(&stored.record.id, ReadOptions::default())
        .expect("read by id");
    assert_eq!(read.record.unwrap().path, "/named");
}

#[tokio::test]
async fn gc_caps_chains_and_unpins_the_oldest() {
    let node = start_node(true).await;
    let mut versions = Vec::new();
    let created = node
        .store
        .create_record("/capped", b"v0", WriteOptions::default())
        .await
        .expect("create");
    versions.push(created.object.version.clone());
    for i in 1..=5 {
        let up = node
            .store
            .update_record("/capped", format!("v{i}").as_bytes(), WriteOptions::default())
            .await
            .expect("update");
        versions.push(up.object.version.clone());
    }
    // versions = [v0 .. v5], current = v5, previous = [v0..v4]

    node.store.gc().expect("gc");

    let read = node
        .store
        .read_record("/capped", ReadOptions::default())
        .expect("read");
    let record = read.record.expect("record");
    assert_eq!(record.previous.len(), 3);
    let kept: Vec<_> = record.previous.iter().map(|v| v.version.clone()).collect();
    assert_eq!(kept, versions[2..5].to_vec());

    // The newest three stay pinned, everything older is released.
    for v in &versions[3..] {
        assert!(node.fs.is_pinned(v).unwrap(), "expected {v} pinned");
    }
    for v in &versions[..3] {
        assert!(!node.fs.is_pinned(v).unwrap(), "expected {v} unpinned");
    }

    // GC is idempotent.
    node.store.gc().expect("gc again");
    let read = node
        .store
        .read_record("/capped", ReadOptions::default())
        .expect("read");
    assert_eq!(read.record.unwrap().previous.len(), 3);
}

#[tokio::test]
async fn positive_version_offsets_are_rejected() {
    let node = start_node(true).await;
    node.store
        .create_record("/off", b"x", WriteOptions::default())
        .await
        .expect("create");
    let err = node
        .store
        .read_record(
            "/off",
            ReadOptions {
                version_offset: 1,
                ..Default::default()
            },
        )
        .expect_err("positive offsets unsupported");
    assert!(matches!(err, StoreError::VersionOffset));
}

#[tokio::test]
async fn negative_version_offset_walks_the_chain() {
    let node = start_node(true).await;
    node.store
        .create_record("/walk", b"old", WriteOptions::default())
        .await
        .expect("create");
    node.store
        .update_record("/walk", b"new", WriteOptions::default())
        .await
        .expect("update");
    let read = node
        .store
        .read_record(
            "/walk",
            ReadOptions {
                version_offset: -1,
                ..Default::default()
            },
        )
        .expect("walk back");
    assert_eq!(read.body.as_deref(), Some(b"old".as_slice()));
}
