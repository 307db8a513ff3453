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

// Public record API.
//
// Every route targets the record store; paths are URL-encoded logical record
// paths, IDs are 26-char TimeIDs.

use super::{apply_content_type, meta_headers, normalize_path, ApiContext};
use crate::core::record::ObjectMeta;
use crate::core::timeid::TimeId;
use crate::objectstore::ObjectStore;
use crate::state::Scan;
use crate::store::{ReadOptions, StoreError, WriteOptions};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Build the public API router.
pub fn router<F: ObjectStore>(ctx: ApiContext<F>) -> Router {
    Router::new()
        .route("/api/v1/put/*path", post(put_record::<F>))
        .route("/api/v1/delete/:id", post(delete_record::<F>))
        .route("/api/v1/content/*path", get(content::<F>))
        .route("/api/v1/meta/*path", get(meta::<F>))
        .route("/api/v1/listVersions/*path", get(list_versions::<F>))
        .route("/api/v1/listAll/", get(list_all_root::<F>))
        .route("/api/v1/listAll/*prefix", get(list_all::<F>))
        .route("/api/v1/ping", get(ping::<F>))
        .route("/api/v1/newID", get(new_id))
        .route("/api/v1/session", get(session::<F>))
        .route("/api/v1/env", get(env::<F>))
        .route("/api/v1/version", get(version::<F>))
        .route("/api/v1/stats", get(stats::<F>))
        .with_state(ctx)
}

#[derive(Deserialize, Default)]
struct VersionQuery {
    #[serde(default)]
    ver: Option<String>,
}

fn error_response(err: &StoreError) -> Response {
    match err {
        StoreError::RecordNotFound => StatusCode::NOT_FOUND.into_response(),
        StoreError::RecordExists => (
            StatusCode::BAD_REQUEST,
            format!("error: {err}"),
        )
            .into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, format!("error: {err}")).into_response(),
    }
}

async fn ping<F: ObjectStore>(State(ctx): State<ApiContext<F>>) -> String {
    ctx.store.node_id().to_string()
}

async fn new_id() -> String {
    TimeId::mint().to_string()
}

async fn session<F: ObjectStore>(State(ctx): State<ApiContext<F>>) -> String {
    ctx.session
}

async fn env<F: ObjectStore>(State(ctx): State<ApiContext<F>>) -> String {
    ctx.env
}

async fn version<F: ObjectStore>(State(ctx): State<ApiContext<F>>) -> String {
    ctx.version
}

#[derive(Serialize)]
struct Stats {
    uptime: String,
    state: String,
    inbound_work: u64,
    outbound_work: u64,
}

async fn stats<F: ObjectStore>(State(ctx): State<ApiContext<F>>) -> Json<Stats> {
    Json(Stats {
        uptime: format!("{:?}", ctx.started_at.elapsed()),
        state: format!("{:?}", ctx.store.state()),
        inbound_work: ctx.store.inbound_work(),
        outbound_work: ctx.store.outbound_work(),
    })
}

async fn put_record<F: ObjectStore>(
    State(ctx): State<ApiContext<F>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    let user_meta = headers
        .get("X-Meta-UserMeta")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !user_meta.is_empty()
        && serde_json::from_str::<serde_json::Value>(&user_meta).is_err()
    {
        return (
            StatusCode::BAD_REQUEST,
            format!("error: user meta json is not valid: {user_meta}"),
        )
            .into_response();
    }
    let path = normalize_path(&path);
    if path == "/" || path.ends_with('/') {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let opts = WriteOptions {
        size,
        user_meta,
    };
    let res = match ctx.store.create_record(&path, &body, opts.clone()).await {
        Err(StoreError::RecordExists) => {
            debug!(path = %path, "record exists, updating");
            ctx.store.update_record(&path, &body, opts).await
        }
        other => other,
    };
    match res {
        Ok(stored) => match stored.object.meta {
            Some(meta) => Json(meta).into_response(),
            None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        },
        Err(e) => {
            warn!(path = %path, err = %e, "put failed");
            error_response(&e)
        }
    }
}

async fn delete_record<F: ObjectStore>(
    State(ctx): State<ApiContext<F>>,
    Path(id): Path<String>,
) -> Response {
    match ctx.store.delete_record(&id).await {
        Ok(stored) => {
            let headers = stored
                .object
                .meta
                .as_ref()
                .map(meta_headers)
                .unwrap_or_default();
            (StatusCode::OK, headers).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn content<F: ObjectStore>(
    State(ctx): State<ApiContext<F>>,
    Path(path): Path<String>,
    Query(q): Query<VersionQuery>,
) -> Response {
    let path = normalize_path(&path);
    let read = ctx.store.read_record(
        &path,
        ReadOptions {
            version: q.ver.filter(|v| !v.is_empty()),
            ..Default::default()
        },
    );
    match read {
        Ok(r) if r.deleted => {
            let mut headers = r.object.meta.as_ref().map(meta_headers).unwrap_or_default();
            apply_content_type(&mut headers, &path);
            (StatusCode::NOT_FOUND, headers).into_response()
        }
        Ok(r) => {
            let mut headers = r.object.meta.as_ref().map(meta_headers).unwrap_or_default();
            apply_content_type(&mut headers, &path);
            let body = r.body.unwrap_or_default();
            (StatusCode::OK, headers, body).into_response()
        }
        Err(e) => error_response(&e),
    }
}

async fn meta<F: ObjectStore>(
    State(ctx): State<ApiContext<F>>,
    Path(path): Path<String>,
    Query(q): Query<VersionQuery>,
) -> Response {
    let path = normalize_path(&path);
    let read = ctx.store.read_record(
        &path,
        ReadOptions {
            version: q.ver.filter(|v| !v.is_empty()),
            no_content: true,
            ..Default::default()
        },
    );
    match read {
        // A tombstone still serves its metadata.
        Ok(r) => match r.object.meta {
            Some(meta) => Json(meta).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
        Err(e) => error_response(&e),
    }
}

#[derive(Serialize)]
struct ListVersionsResponse {
    id: String,
    versions: Vec<ObjectMeta>,
}

async fn list_versions<F: ObjectStore>(
    State(ctx): State<ApiContext<F>>,
    Path(path): Path<String>,
) -> Response {
    let path = normalize_path(&path);
    let read = match ctx.store.read_record(
        &path,
        ReadOptions {
            no_content: true,
            ..Default::default()
        },
    ) {
        Ok(r) => r,
        Err(e) => return error_response(&e),
    };
    let Some(record) = read.record else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let mut versions = Vec::with_capacity(1 + record.previous.len());
    if let Some(meta) = read.object.meta {
        versions.push(meta);
    }
    // Newest first: current, then predecessors in reverse chain order.
    for v in record.previous.iter().rev() {
        match ctx.store.read_record(
            "",
            ReadOptions {
                version: Some(v.version.clone()),
                no_content: true,
                ..Default::default()
            },
        ) {
            Ok(r) => {
                if let Some(meta) = r.object.meta {
                    versions.push(meta);
                }
            }
            Err(StoreError::RecordNotFound) => continue,
            Err(e) => {
                warn!(err = %e, "failed to read record version from store");
                continue;
            }
        }
    }
    Json(ListVersionsResponse {
        id: record.id,
        versions,
    })
    .into_response()
}

#[derive(Serialize)]
struct ListResponse {
    #[serde(rename = "Dirs")]
    dirs: Vec<String>,
    #[serde(rename = "Files")]
    files: Vec<ObjectMeta>,
}

async fn list_all_root<F: ObjectStore>(state: State<ApiContext<F>>) -> Response {
    list_all_inner(state, String::new()).await
}

async fn list_all<F: ObjectStore>(
    state: State<ApiContext<F>>,
    Path(prefix): Path<String>,
) -> Response {
    list_all_inner(state, prefix).await
}

async fn list_all_inner<F: ObjectStore>(
    State(ctx): State<ApiContext<F>>,
    prefix: String,
) -> Response {
    let mut prefix = normalize_path(&prefix);
    if !prefix.ends_with('/') {
        prefix.push('/');
    }

    let mut dirs = Vec::new();
    let mut heads: Vec<(String, String)> = Vec::new();
    let mut seen_dirs = HashSet::new();
    let walked = ctx.store.walk_records(|path, record| {
        if path.is_empty() || !path.starts_with(&prefix) {
            return Scan::Continue;
        }
        let rest = &path[prefix.len()..];
        let mut parts = rest.splitn(2, '/');
        let first = parts.next().unwrap_or("");
        if parts.next().is_some() {
            if seen_dirs.insert(first.to_string()) {
                dirs.push(format!("{prefix}{first}/"));
            }
            return Scan::Continue;
        }
        heads.push((path.to_string(), record.current.version.clone()));
        Scan::Continue
    });
    if let Err(e) = walked {
        return error_response(&e);
    }

    let mut files = Vec::new();
    for (path, version) in heads {
        match ctx.store.read_record(
            &path,
            ReadOptions {
                version: Some(version),
                no_content: true,
                ..Default::default()
            },
        ) {
            Ok(r) if r.deleted => continue,
            Ok(r) => {
                if let Some(meta) = r.object.meta {
                    files.push(meta);
                }
            }
            Err(StoreError::RecordNotFound) => continue,
            Err(e) => {
                warn!(path = %path, err = %e, "failed to fetch record");
                continue;
            }
        }
    }

    if dirs.is_empty() && files.is_empty() {
        return StatusCode::NOT_FOUND.into_response();
    }
    dirs.sort();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Json(ListResponse { dirs, files }).into_response()
}
