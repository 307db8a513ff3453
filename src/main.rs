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

//! Meridian node entrypoint (systemd-friendly).
//! Opens the stores, refreshes authority, syncs from peers, serves HTTP.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use meridian::api::{private, public, ApiContext};
use meridian::authority::Authority;
use meridian::core::timeid::TimeId;
use meridian::core::types::NodeConfig;
use meridian::monitoring::metrics::Metrics;
use meridian::objectstore::{LocalStore, ObjectStore};
use meridian::state::{Store, StoreOptions};
use meridian::store::{RecordStore, RecordStoreOptions, StoreError};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_config() -> Result<NodeConfig> {
    let mut cfg = match std::env::var("MERIDIAN_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config at {path}"))?;
            toml::from_str(&raw).with_context(|| format!("failed to parse config at {path}"))?
        }
        Err(_) => NodeConfig::default(),
    };
    // Env overrides for the knobs that differ per deployment.
    cfg.node.data_dir = env("MERIDIAN_DATA_DIR", &cfg.node.data_dir);
    cfg.node.env = env("MERIDIAN_ENV", &cfg.node.env);
    cfg.node.eth_addr = env("MERIDIAN_ETH_ADDR", &cfg.node.eth_addr);
    cfg.http.public_listen = env("MERIDIAN_PUBLIC_LISTEN", &cfg.http.public_listen);
    cfg.http.private_listen = env("MERIDIAN_PRIVATE_LISTEN", &cfg.http.private_listen);
    Ok(cfg)
}

fn build_version() -> String {
    option_env!("VERGEN_GIT_DESCRIBE")
        .or(option_env!("VERGEN_BUILD_TIMESTAMP"))
        .unwrap_or(env!("CARGO_PKG_VERSION"))
        .to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    let cfg = load_config()?;
    let session = TimeId::mint().to_string();
    info!(data_dir = %cfg.node.data_dir, env = %cfg.node.env, session = %session, "meridian node starting");

    let state = Store::open(
        &format!("{}/state", cfg.node.data_dir),
        StoreOptions::default(),
    )
    .context("failed to open state store")?;

    let fs = Arc::new(
        LocalStore::open(&cfg.node.data_dir, cfg.peers.clone())
            .context("failed to open object store")?,
    );
    info!(node_id = %fs.node_id(), "node identity ready");

    let refresh = Duration::from_secs(cfg.auth.refresh_secs.max(1));
    let auth = if !cfg.auth.domains.is_empty() {
        Authority::dns(cfg.auth.domains.clone(), refresh)
    } else if !cfg.auth.urls.is_empty() {
        Authority::url(cfg.auth.urls.clone(), refresh)
    } else if !cfg.auth.static_entries.is_empty() {
        info!(entries = cfg.auth.static_entries.len(), "authority: static entries");
        Authority::fixed(cfg.auth.static_entries.clone())
    } else {
        warn!("no authority source configured; all writers will be rejected");
        Authority::fixed(Vec::new())
    };

    let metrics = Arc::new(Metrics::new().expect("metrics init failed"));
    let store = RecordStore::open(
        Arc::clone(&fs),
        state.clone(),
        Arc::clone(&auth),
        Arc::clone(&metrics),
        RecordStoreOptions {
            keep_versions: cfg.store.keep_versions,
            ..Default::default()
        },
    )
    .context("failed to open record store")?;

    let ctx = ApiContext {
        store: Arc::clone(&store),
        session: session.clone(),
        env: cfg.node.env.clone(),
        version: build_version(),
        started_at: Instant::now(),
    };

    // The private surface comes up before sync so that peers can already
    // pull records and ping this node.
    let private_listener = tokio::net::TcpListener::bind(&cfg.http.private_listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.private_listen))?;
    info!(addr = %cfg.http.private_listen, "private surface listening");
    let private_srv = tokio::spawn(axum::serve(private_listener, private::router(ctx.clone())).into_future());

    // Give the authority refresher a moment to fill the map before sync
    // enumerates candidates.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let sync_timeout = Duration::from_secs(cfg.store.sync_timeout_secs.max(1));
    match store.sync(sync_timeout).await {
        Ok(()) => info!("store synced"),
        Err(StoreError::NotSynced) => warn!("store sync timed out; serving stale state"),
        Err(e) => warn!(err = %e, "store sync failed"),
    }
    if !store.is_ready() {
        store.activate();
    }

    let public_listener = tokio::net::TcpListener::bind(&cfg.http.public_listen)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.public_listen))?;
    info!(addr = %cfg.http.public_listen, "public api listening");
    let public_srv = tokio::spawn(axum::serve(public_listener, public::router(ctx.clone())).into_future());

    // Version-chain GC on its interval.
    let gc_store = Arc::clone(&store);
    let gc_interval = Duration::from_secs(cfg.store.gc_interval_secs.max(1));
    let gc_task = tokio::spawn(async move {
        let mut timer = tokio::time::interval(gc_interval);
        timer.tick().await;
        loop {
            timer.tick().await;
            if let Err(e) = gc_store.gc() {
                warn!(err = %e, "record GC failed");
            }
        }
    });

    // Beats only when a reward address is configured.
    let mut beat_tasks = Vec::new();
    if !cfg.node.eth_addr.is_empty() {
        let beats = Arc::clone(&store);
        let tick = Duration::from_secs(cfg.beat.tick_secs.max(1));
        let info_dur = Duration::from_secs(cfg.beat.info_secs.max(1));
        let eth = cfg.node.eth_addr.clone();
        let sess = session.clone();
        beat_tasks.push(tokio::spawn(async move {
            beats.send_beats(tick, info_dur, eth, sess).await;
        }));
        let reports = Arc::clone(&store);
        let report_dur = Duration::from_secs(cfg.beat.report_secs.max(1));
        beat_tasks.push(tokio::spawn(async move {
            reports.commit_beat_reports(report_dur).await;
        }));
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");

    for t in beat_tasks {
        t.abort();
    }
    gc_task.abort();
    public_srv.abort();
    private_srv.abort();
    store.close().await;
    auth.stop_updates();
    state.close().ok();
    Ok(())
}
