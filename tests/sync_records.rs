#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meridian::api::{private, ApiContext};
use meridian::authority::Authority;
use meridian::core::timeid::TimeId;
use meridian::monitoring::metrics::Metrics;
use meridian::objectstore::{LocalStore, ObjectStore};
use meridian::state::{Scan, Store, StoreOptions};
use meridian::store::{RecordStore, RecordStoreOptions, StoreState, WriteOptions};

struct Node {
    _tmp: tempfile::TempDir,
    fs: Arc<LocalStore>,
    store: Arc<RecordStore<LocalStore>>,
}

/// `auth_for` receives the freshly minted node ID and yields the authority
/// lines the node should run under.
async fn start_node(
    auth_for: impl Fn(&str) -> Vec<String>,
    peers: BTreeMap<String, String>,
) -> Node {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = tmp.path().to_str().unwrap().to_string();
    let fs = Arc::new(LocalStore::open(&dir, peers).expect("object store"));
    let auth = Authority::fixed(auth_for(&fs.node_id()));
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
    Node {
        _tmp: tmp,
        fs,
        store,
    }
}

async fn serve_private(node: &Node) -> String {
    let ctx = ApiContext {
        store: Arc::clone(&node.store),
        session: TimeId::mint().to_string(),
        env: "test".to_string(),
        version: "test".to_string(),
        started_at: Instant::now(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, private::router(ctx)).await;
    });
    format!("http://{addr}")
}

fn record_paths(node: &Node) -> Vec<String> {
    let mut paths = Vec::new();
    node.store
        .walk_records(|path, _| {
            paths.push(path.to_string());
            Scan::Continue
        })
        .expect("walk");
    paths.sort();
    paths
}

#[tokio::test]
async fn empty_node_pulls_records_from_an_alive_peer() {
    // Node A holds the data and may both write and serve sync.
    let node_a = start_node(|id| vec![format!("{id}:write,sync")], BTreeMap::new()).await;
    let a_id = node_a.fs.node_id();
    node_a
        .store
        .sync(Duration::from_secs(5))
        .await
        .expect("sync a");
    node_a
        .store
        .create_record("/a/one.txt", b"one", WriteOptions::default())
        .await
        .expect("create one");
    node_a
        .store
        .create_record("/a/two.txt", b"two", WriteOptions::default())
        .await
        .expect("create two");
    let base = serve_private(&node_a).await;

    // Node B starts empty, knows A through its authority and peer table.
    let mut peers = BTreeMap::new();
    peers.insert(a_id.clone(), base);
    let a_for_b = a_id.clone();
    let node_b = start_node(move |_| vec![format!("{a_for_b}:write,sync")], peers).await;
    node_b
        .store
        .sync(Duration::from_secs(30))
        .await
        .expect("sync b");

    assert_eq!(node_b.store.state(), StoreState::Active);
    assert_eq!(record_paths(&node_b), vec!["/a/one.txt", "/a/two.txt"]);
    assert_eq!(record_paths(&node_b), record_paths(&node_a));

    // Imported records kept their provenance.
    node_b
        .store
        .walk_records(|_, record| {
            record.validate().expect("imported record verifies");
            assert_eq!(record.current.announce.node_id, a_id);
            Scan::Continue
        })
        .expect("walk");
}

#[tokio::test]
async fn records_from_non_writers_are_dropped_in_sync() {
    let node_a = start_node(|id| vec![format!("{id}:write,sync")], BTreeMap::new()).await;
    let a_id = node_a.fs.node_id();
    node_a
        .store
        .sync(Duration::from_secs(5))
        .await
        .expect("sync a");
    node_a
        .store
        .create_record("/leak", b"x", WriteOptions::default())
        .await
        .expect("create");
    let base = serve_private(&node_a).await;

    // B's authority grants A sync but not write: the stream is reachable yet
    // every record in it is from a non-writer.
    let mut peers = BTreeMap::new();
    peers.insert(a_id.clone(), base);
    let a_for_b = a_id.clone();
    let node_b = start_node(move |_| vec![format!("{a_for_b}:sync")], peers).await;
    node_b
        .store
        .sync(Duration::from_secs(30))
        .await
        .expect("sync b");

    assert_eq!(node_b.store.state(), StoreState::Active);
    assert!(record_paths(&node_b).is_empty());
}

#[tokio::test]
async fn newer_envelope_wins_on_merge() {
    let node_a = start_node(|id| vec![format!("{id}:write,sync")], BTreeMap::new()).await;
    let a_id = node_a.fs.node_id();
    node_a
        .store
        .sync(Duration::from_secs(5))
        .await
        .expect("sync a");
    node_a
        .store
        .create_record("/doc", b"v1", WriteOptions::default())
        .await
        .expect("create");
    let base = serve_private(&node_a).await;

    // B imports the first version of the record.
    let mut peers = BTreeMap::new();
    peers.insert(a_id.clone(), base);
    let a_for_b = a_id.clone();
    let node_b = start_node(move |_| vec![format!("{a_for_b}:write,sync")], peers).await;
    node_b
        .store
        .sync(Duration::from_secs(30))
        .await
        .expect("first sync");
    assert_eq!(record_paths(&node_b), vec!["/doc"]);

    // A moves on; a second pull must replace B's copy with the newer chain.
    node_a
        .store
        .update_record("/doc", b"v2", WriteOptions::default())
        .await
        .expect("update");
    node_b
        .store
        .sync(Duration::from_secs(30))
        .await
        .expect("second sync");

    let mut chains = Vec::new();
    node_b
        .store
        .walk_records(|_, record| {
            chains.push((record.previous.len(), record.current.version.clone()));
            Scan::Continue
        })
        .expect("walk");
    assert_eq!(chains.len(), 1);
    assert_eq!(chains[0].0, 1, "imported chain carries the old version");

    let mut a_current = Vec::new();
    node_a
        .store
        .walk_records(|_, record| {
            a_current.push(record.current.version.clone());
            Scan::Continue
        })
        .expect("walk a");
    assert_eq!(chains[0].1, a_current[0]);
}

#[tokio::test]
async fn pushed_announces_enter_the_inbound_pipeline() {
    use meridian::core::announce::{Announce, AnnounceKind, EnvelopeBeatTick};
    use meridian::store::{EventAnnounce, EventKind};

    let node_a = start_node(|id| vec![format!("{id}:write,sync")], BTreeMap::new()).await;
    let a_id = node_a.fs.node_id();
    node_a
        .store
        .sync(Duration::from_secs(5))
        .await
        .expect("sync a");
    let base = serve_private(&node_a).await;

    let node_b = start_node(|_| Vec::new(), BTreeMap::new()).await;
    node_b.fs.add_peer(&a_id, &base);
    node_b
        .store
        .sync(Duration::from_secs(5))
        .await
        .expect("sync b");

    // B hands A a signed beat tick over the tunnel.
    let env = EnvelopeBeatTick {
        id: TimeId::mint().to_string(),
        session: TimeId::mint().to_string(),
    };
    let packed = env.pack().expect("pack");
    let sig = node_b.fs.sign(&packed).expect("sign");
    let event = EventAnnounce {
        kind: EventKind::BeatTick,
        announce: Announce::new_signed(
            AnnounceKind::BeatTick,
            packed,
            &node_b.fs.node_id(),
            &sig,
        ),
    };
    let body = serde_json::to_vec(&event).expect("event json");

    let before = node_a.store.inbound_work();
    node_b
        .fs
        .push_announce(&a_id, &body)
        .await
        .expect("push announce");

    for _ in 0..500 {
        if node_a.store.inbound_work() > before {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(node_a.store.inbound_work() > before);
}

#[tokio::test]
async fn sync_without_candidates_goes_straight_to_active() {
    let node = start_node(|_| Vec::new(), BTreeMap::new()).await;
    node.store.sync(Duration::from_secs(5)).await.expect("sync");
    assert_eq!(node.store.state(), StoreState::Active);
}

#[tokio::test]
async fn sync_with_dead_peers_still_activates() {
    // The candidate exists in the authority but nothing answers its address;
    // discovery retries and then serves local state.
    let ghost = "ghost-node-id";
    let mut peers = BTreeMap::new();
    peers.insert(ghost.to_string(), "http://127.0.0.1:9".to_string());
    let node = start_node(|_| vec![format!("{ghost}:sync")], peers).await;
    node.store.sync(Duration::from_secs(60)).await.expect("sync");
    assert_eq!(node.store.state(), StoreState::Active);
}
