#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meridian::api::{public, ApiContext};
use meridian::authority::Authority;
use meridian::core::timeid::TimeId;
use meridian::monitoring::metrics::Metrics;
use meridian::objectstore::LocalStore;
use meridian::objectstore::ObjectStore;
use meridian::state::{Store, StoreOptions};
use meridian::store::{RecordStore, RecordStoreOptions};

struct Api {
    _tmp: tempfile::TempDir,
    base: String,
    client: reqwest::Client,
}

async fn start_api(grant_write: bool) -> Api {
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

    let ctx = ApiContext {
        store,
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
        let _ = axum::serve(listener, public::router(ctx)).await;
    });
    Api {
        _tmp: tmp,
        base: format!("http://{addr}"),
        client: reqwest::Client::new(),
    }
}

#[tokio::test]
async fn put_then_content_roundtrip() {
    let api = start_api(true).await;

    let resp = api
        .client
        .post(format!("{}/api/v1/put/a/b.txt", api.base))
        .body("hello")
        .send()
        .await
        .expect("put");
    assert_eq!(resp.status(), 200);
    let meta: serde_json::Value = resp.json().await.expect("meta json");
    assert_eq!(meta["path"], "/a/b.txt");
    assert_eq!(meta["size"], 5);
    assert_eq!(meta["versionPrevious"], "");
    let id = meta["id"].as_str().expect("id").to_string();
    TimeId::parse(&id).expect("id is a time id");
    let version = meta["version"].as_str().expect("version").to_string();

    let resp = api
        .client
        .get(format!("{}/api/v1/content/a/b.txt", api.base))
        .send()
        .await
        .expect("content");
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("X-Meta-Version")
            .and_then(|v| v.to_str().ok()),
        Some(version.as_str())
    );
    assert_eq!(
        resp.headers().get("X-Meta-ID").and_then(|v| v.to_str().ok()),
        Some(id.as_str())
    );
    assert_eq!(resp.text().await.expect("body"), "hello");
}

#[tokio::test]
async fn second_put_builds_a_version_chain() {
    let api = start_api(true).await;

    let first: serde_json::Value = api
        .client
        .post(format!("{}/api/v1/put/a/b.txt", api.base))
        .body("hello")
        .send()
        .await
        .expect("put 1")
        .json()
        .await
        .expect("json 1");
    let cid1 = first["version"].as_str().expect("cid1").to_string();

    let second: serde_json::Value = api
        .client
        .post(format!("{}/api/v1/put/a/b.txt", api.base))
        .body("hi")
        .send()
        .await
        .expect("put 2")
        .json()
        .await
        .expect("json 2");
    assert_eq!(second["versionPrevious"], cid1.as_str());
    let cid2 = second["version"].as_str().expect("cid2").to_string();

    let versions: serde_json::Value = api
        .client
        .get(format!("{}/api/v1/listVersions/a/b.txt", api.base))
        .send()
        .await
        .expect("listVersions")
        .json()
        .await
        .expect("versions json");
    assert_eq!(versions["id"], first["id"]);
    let list = versions["versions"].as_array().expect("versions array");
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["version"], cid2.as_str());
    assert_eq!(list[1]["version"], cid1.as_str());
}

#[tokio::test]
async fn delete_serves_tombstone_headers_then_404_content() {
    let api = start_api(true).await;

    let meta: serde_json::Value = api
        .client
        .post(format!("{}/api/v1/put/a/b.txt", api.base))
        .body("hello")
        .send()
        .await
        .expect("put")
        .json()
        .await
        .expect("json");
    let id = meta["id"].as_str().expect("id");

    let resp = api
        .client
        .post(format!("{}/api/v1/delete/{id}", api.base))
        .send()
        .await
        .expect("delete");
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()
            .get("X-Meta-Deleted")
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );

    let resp = api
        .client
        .get(format!("{}/api/v1/content/a/b.txt", api.base))
        .send()
        .await
        .expect("content");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn unauthorized_put_is_a_500_with_reason() {
    let api = start_api(false).await;
    let resp = api
        .client
        .post(format!("{}/api/v1/put/x", api.base))
        .body("data")
        .send()
        .await
        .expect("put");
    assert_eq!(resp.status(), 500);
    assert!(resp.text().await.expect("body").contains("not authorized"));
}

#[tokio::test]
async fn bad_user_meta_is_rejected() {
    let api = start_api(true).await;
    let resp = api
        .client
        .post(format!("{}/api/v1/put/x", api.base))
        .header("X-Meta-UserMeta", "{not json")
        .body("data")
        .send()
        .await
        .expect("put");
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn list_all_groups_dirs_and_files() {
    let api = start_api(true).await;
    for (path, body) in [
        ("a/one.txt", "1"),
        ("a/sub/two.txt", "2"),
        ("top.txt", "t"),
    ] {
        let resp = api
            .client
            .post(format!("{}/api/v1/put/{path}", api.base))
            .body(body.to_string())
            .send()
            .await
            .expect("put");
        assert_eq!(resp.status(), 200);
    }

    let root: serde_json::Value = api
        .client
        .get(format!("{}/api/v1/listAll/", api.base))
        .send()
        .await
        .expect("listAll root")
        .json()
        .await
        .expect("json");
    let dirs: Vec<&str> = root["Dirs"]
        .as_array()
        .expect("dirs")
        .iter()
        .filter_map(|d| d.as_str())
        .collect();
    assert_eq!(dirs, vec!["/a/"]);
    let files: Vec<&str> = root["Files"]
        .as_array()
        .expect("files")
        .iter()
        .filter_map(|f| f["path"].as_str())
        .collect();
    assert_eq!(files, vec!["/top.txt"]);

    let under_a: serde_json::Value = api
        .client
        .get(format!("{}/api/v1/listAll/a/", api.base))
        .send()
        .await
        .expect("listAll a")
        .json()
        .await
        .expect("json");
    let dirs: Vec<&str> = under_a["Dirs"]
        .as_array()
        .expect("dirs")
        .iter()
        .filter_map(|d| d.as_str())
        .collect();
    assert_eq!(dirs, vec!["/a/sub/"]);
    let files: Vec<&str> = under_a["Files"]
        .as_array()
        .expect("files")
        .iter()
        .filter_map(|f| f["path"].as_str())
        .collect();
    assert_eq!(files, vec!["/a/one.txt"]);

    let resp = api
        .client
        .get(format!("{}/api/v1/listAll/empty/prefix/", api.base))
        .send()
        .await
        .expect("listAll empty");
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn meta_endpoint_serves_tombstones_with_200() {
    let api = start_api(true).await;
    let meta: serde_json::Value = api
        .client
        .post(format!("{}/api/v1/put/gone.txt", api.base))
        .body("x")
        .send()
        .await
        .expect("put")
        .json()
        .await
        .expect("json");
    let id = meta["id"].as_str().expect("id");
    api.client
        .post(format!("{}/api/v1/delete/{id}", api.base))
        .send()
        .await
        .expect("delete");

    let resp = api
        .client
        .get(format!("{}/api/v1/meta/gone.txt", api.base))
        .send()
        .await
        .expect("meta");
    assert_eq!(resp.status(), 200);
    let meta: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(meta["isDeleted"], true);
}
