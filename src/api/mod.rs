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

//! HTTP surfaces: the public record API and the private peer tunnel.

use crate::core::record::ObjectMeta;
use crate::objectstore::ObjectStore;
use crate::store::RecordStore;
use axum::http::{header, HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::Instant;

/// Public record API routes.
pub mod public;

/// Private peer surface routes.
pub mod private;

/// Shared handler context.
pub struct ApiContext<F: ObjectStore> {
    /// The record store.
    pub store: Arc<RecordStore<F>>,
    /// Session TimeID minted at process start.
    pub session: String,
    /// Network environment tag.
    pub env: String,
    /// Build version string.
    pub version: String,
    /// Process start time.
    pub started_at: Instant,
}

impl<F: ObjectStore> Clone for ApiContext<F> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            session: self.session.clone(),
            env: self.env.clone(),
            version: self.version.clone(),
            started_at: self.started_at,
        }
    }
}

/// Meta headers served alongside record responses (bit-exact names).
pub fn meta_headers(meta: &ObjectMeta) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let put = |headers: &mut HeaderMap, name: &'static str, value: &str| {
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(name, v);
        }
    };
    put(&mut headers, "X-Meta-ID", &meta.id);
    put(&mut headers, "X-Meta-Version", &meta.version);
    if !meta.version_previous.is_empty() {
        put(&mut headers, "X-Meta-Previous", &meta.version_previous);
    }
    if !meta.path.is_empty() {
        put(&mut headers, "X-Meta-Path", &meta.path);
    }
    if !meta.user_meta.is_empty() {
        put(&mut headers, "X-Meta-UserMeta", &meta.user_meta);
    }
    if meta.is_deleted {
        put(&mut headers, "X-Meta-Deleted", "true");
    }
    headers
}

/// Best-effort content type from the path extension.
pub fn content_type_for(path: &str) -> Option<HeaderValue> {
    let ext = path.rsplit('.').next()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" | "log" | "conf" | "cfg" | "ini" => "text/plain; charset=utf-8",
        "json" => "application/json",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" => "text/javascript",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "yml" | "yaml" => "application/yaml",
        _ => return None,
    };
    HeaderValue::from_str(mime).ok()
}

/// Attach a content type when the extension yields one.
pub(crate) fn apply_content_type(headers: &mut HeaderMap, path: &str) {
    if let Some(ct) = content_type_for(path) {
        headers.insert(header::CONTENT_TYPE, ct);
    }
}

/// Ensure a leading slash on a wildcard-captured path.
pub(crate) fn normalize_path(raw: &str) -> String {
    if raw.starts_with('/') {
        raw.to_string()
    } else {
        format!("/{raw}")
    }
}
