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

//! DNS-text authority source: one TXT record per entry line.

use super::AuthorityError;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tracing::debug;

/// Fetches authority lines from TXT records of a domain.
pub struct DnsFetcher {
    resolver: TokioAsyncResolver,
}

impl DnsFetcher {
    /// Resolver against the system configuration, falling back to public
    /// recursors when `/etc/resolv.conf` is unusable.
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { resolver }
    }

    /// TXT records of `domain`, one line per record (segments joined).
    pub async fn fetch(&self, domain: &str) -> Result<Vec<String>, AuthorityError> {
        debug!(domain = %domain, "looking up authority TXT records");
        let lookup = self
            .resolver
            .txt_lookup(domain)
            .await
            .map_err(|e| AuthorityError::Fetch(e.to_string()))?;
        let mut lines = Vec::new();
        for record in lookup.iter() {
            let mut line = String::new();
            for segment in record.txt_data() {
                line.push_str(&String::from_utf8_lossy(segment));
            }
            if !line.is_empty() {
                lines.push(line);
            }
        }
        Ok(lines)
    }
}

impl Default for DnsFetcher {
    fn default() -> Self {
        Self::new()
    }
}
