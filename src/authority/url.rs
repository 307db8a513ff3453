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

//! URL-text authority source: the response body, one entry per line.

use super::AuthorityError;
use std::time::Duration;
use tracing::debug;

/// Body size cap; an authority list is tiny by construction.
const MAX_BODY_BYTES: usize = 2048;
/// Line count cap.
const MAX_LINES: usize = 2048;

/// Fetches authority lines from an HTTP(S) endpoint.
pub struct UrlFetcher {
    client: reqwest::Client,
}

impl UrlFetcher {
    /// Client with a short request deadline.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Lines of the body at `url`, bounded at 2 KiB / 2048 lines.
    pub async fn fetch(&self, url: &str) -> Result<Vec<String>, AuthorityError> {
        debug!(url = %url, "fetching authority records");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AuthorityError::Fetch(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AuthorityError::Fetch(format!("status {}", resp.status())));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| AuthorityError::Fetch(e.to_string()))?;
        let body = &body[..body.len().min(MAX_BODY_BYTES)];
        Ok(String::from_utf8_lossy(body)
            .lines()
            .take(MAX_LINES)
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect())
    }
}

impl Default for UrlFetcher {
    fn default() -> Self {
        Self::new()
    }
}
