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

// Private peer surface, reachable only over the node-to-node tunnel.

use super::ApiContext;
use crate::objectstore::ObjectStore;
use crate::store::EventAnnounce;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};

/// Build the private peer router.
pub fn router<F: ObjectStore>(ctx: ApiContext<F>) -> Router {
    Router::new()
        .route("/private/v1/ping", get(ping::<F>))
        .route("/private/v1/records", get(records::<F>))
        .route("/private/v1/announce", post(announce::<F>))
        .with_state(ctx)
}

async fn ping<F: ObjectStore>(State(ctx): State<ApiContext<F>>) -> String {
    ctx.store.node_id().to_string()
}

/// Stream of packed record structures; the serialization is self-delimiting,
/// no extra framing.
async fn records<F: ObjectStore>(State(ctx): State<ApiContext<F>>) -> Response {
    match ctx.store.export_records() {
        Ok(bytes) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            )],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn announce<F: ObjectStore>(
    State(ctx): State<ApiContext<F>>,
    Json(event): Json<EventAnnounce>,
) -> StatusCode {
    ctx.store.receive_event(event).await;
    StatusCode::OK
}
