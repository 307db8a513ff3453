#![forbid(unsafe_code)]

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use meridian::authority::{Authority, Permission};

async fn serve_text(routes: Vec<(&'static str, &'static str)>) -> String {
    let mut router = Router::new();
    for (path, body) in routes {
        router = router.route(path, get(move || async move { body.to_string() }));
    }
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn url_source_parses_entries_and_ignores_unknown_tags() {
    let base = serve_text(vec![(
        "/auth",
        "node-a:write,sync\nnode-b:sync\nnode-c:sync,launch\nmalformed-line\n",
    )])
    .await;

    let auth = Authority::url(vec![format!("{base}/auth")], Duration::from_secs(3600));
    auth.refresh_once().await.expect("refresh");

    assert!(auth.has_permissions("node-a", &[Permission::Write, Permission::Sync]));
    assert!(auth.has_permissions("node-b", &[Permission::Sync]));
    assert!(!auth.has_permissions("node-b", &[Permission::Write]));
    // The unknown tag is dropped, the recognized one stays.
    assert!(auth.has_permissions("node-c", &[Permission::Sync]));
    assert!(!auth.has_permissions("nobody", &[Permission::Sync]));

    let entries = auth.entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries["node-a"].permissions.len(),
        2,
        "write and sync recorded"
    );
    auth.stop_updates();
}

#[tokio::test]
async fn promoted_source_is_adopted_with_majority() {
    // A single seen source promotes with majority(1, 1).
    let extra = serve_text(vec![("/extra", "node-x:write\n")]).await;
    let extra_url = format!("{extra}/extra");
    let primary_body: &'static str =
        Box::leak(format!("node-a:sync\npromote:{extra_url}\n").into_boxed_str());
    let primary = serve_text(vec![("/auth", primary_body)]).await;

    let auth = Authority::url(vec![format!("{primary}/auth")], Duration::from_secs(3600));
    auth.refresh_once().await.expect("refresh");

    assert!(auth.has_permissions("node-a", &[Permission::Sync]));
    assert!(
        auth.has_permissions("node-x", &[Permission::Write]),
        "promoted source entries must be adopted"
    );
    auth.stop_updates();
}

#[tokio::test]
async fn refresh_replaces_the_map_wholesale() {
    let base = serve_text(vec![("/auth", "node-a:sync\n")]).await;
    let auth = Authority::url(vec![format!("{base}/auth")], Duration::from_secs(3600));
    auth.refresh_once().await.expect("refresh");
    assert!(auth.has_permissions("node-a", &[Permission::Sync]));

    // A second refresh against the same content is a no-op for queries.
    auth.refresh_once().await.expect("refresh again");
    assert!(auth.has_permissions("node-a", &[Permission::Sync]));
    assert_eq!(auth.entries().len(), 1);
    auth.stop_updates();
}

#[tokio::test]
async fn unreachable_source_is_an_error() {
    let auth = Authority::url(
        vec!["http://127.0.0.1:9/auth".to_string()],
        Duration::from_secs(3600),
    );
    assert!(auth.refresh_once().await.is_err());
    assert!(auth.entries().is_empty());
    auth.stop_updates();
}
