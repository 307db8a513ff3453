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

//! Authority: which nodes may write or sync.
//!
//! The permission map is refreshed from an external text source on a timer.
//! Each source yields lines of the form `key:tag[,tag...]`; a line whose key
//! is `promote` nominates additional sources, adopted only with a majority of
//! the already-seen sources behind them. A refresh replaces the whole map, so
//! readers see either the old or the new state, never a torn mix.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

mod dns;
mod url;

pub use dns::DnsFetcher;
pub use url::UrlFetcher;

/// Authority errors.
#[derive(Debug, Error)]
pub enum AuthorityError {
    /// Source fetch failed; retried on the next (shortened) interval.
    #[error("source fetch: {0}")]
    Fetch(String),
}

/// A permission tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    /// May publish record updates and write locally.
    Write,
    /// May serve records to syncing peers.
    Sync,
}

impl Permission {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "write" => Some(Permission::Write),
            "sync" => Some(Permission::Sync),
            _ => None,
        }
    }
}

/// A node's permission entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Entry {
    /// Node ID the entry applies to.
    pub key: String,
    /// Granted permissions (sorted set).
    pub permissions: BTreeSet<Permission>,
}

impl Entry {
    /// True if this entry carries every requested permission.
    pub fn has_permissions(&self, perms: &[Permission]) -> bool {
        perms.iter().all(|p| self.permissions.contains(p))
    }
}

/// True if `n` of `total` already-seen sources form a promoting majority.
///
/// For up to two seen sources a single vote suffices; with three, two votes;
/// past three, three votes.
pub fn majority(n: usize, total: usize) -> bool {
    match total {
        0..=2 => n >= 1,
        3 => n >= 2,
        _ => n >= 3,
    }
}

/// Split a `key:tag[,tag...]` line. Returns `None` for malformed lines.
pub fn parse_line(line: &str) -> Option<(String, Vec<String>)> {
    let mut parts = line.splitn(2, ':');
    let key = parts.next()?.trim();
    let tags_raw = parts.next()?;
    if key.is_empty() {
        return None;
    }
    let tags = tags_raw
        .split(',')
        .map(|t| t.trim().to_string())
        .collect::<Vec<_>>();
    Some((key.to_string(), tags))
}

/// How a refresh cycle obtains lines for one target.
pub enum Fetcher {
    /// DNS TXT records per domain.
    Dns(DnsFetcher),
    /// HTTP body, line per entry (bounded).
    Url(UrlFetcher),
    /// Fixed lines from configuration (private overlays without DNS).
    Static(HashMap<String, Vec<String>>),
}

impl Fetcher {
    async fn fetch(&self, target: &str) -> Result<Vec<String>, AuthorityError> {
        match self {
            Fetcher::Dns(f) => f.fetch(target).await,
            Fetcher::Url(f) => f.fetch(target).await,
            Fetcher::Static(lines) => lines
                .get(target)
                .cloned()
                .ok_or_else(|| AuthorityError::Fetch(format!("unknown static target {target}"))),
        }
    }
}

/// Live permission map with a background refresher.
pub struct Authority {
    fetcher: Fetcher,
    // Promotions extend the target list across cycles.
    targets: Mutex<Vec<String>>,
    entries: RwLock<HashMap<String, Vec<Entry>>>,
    stop_tx: watch::Sender<bool>,
    interval: Duration,
}

impl Authority {
    /// Authority refreshed from DNS TXT records of `domains`.
    pub fn dns(domains: Vec<String>, interval: Duration) -> Arc<Self> {
        info!(?domains, "authority: dns source");
        Self::start(Fetcher::Dns(DnsFetcher::new()), domains, interval)
    }

    /// Authority refreshed from the bodies of `urls`.
    pub fn url(urls: Vec<String>, interval: Duration) -> Arc<Self> {
        info!(?urls, "authority: url source");
        Self::start(Fetcher::Url(UrlFetcher::new()), urls, interval)
    }

    /// Authority with a fixed entry list; parsed once, never refreshed.
    pub fn fixed(lines: Vec<String>) -> Arc<Self> {
        let mut sources = HashMap::new();
        sources.insert("static".to_string(), lines);
        let auth = Self::new(Fetcher::Static(sources), vec!["static".to_string()]);
        let auth = Arc::new(auth);
        auth.apply_refresh_blocking();
        auth
    }

    fn new(fetcher: Fetcher, targets: Vec<String>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            fetcher,
            targets: Mutex::new(targets),
            entries: RwLock::new(HashMap::new()),
            stop_tx,
            interval: Duration::from_secs(60),
        }
    }

    fn start(fetcher: Fetcher, targets: Vec<String>, interval: Duration) -> Arc<Self> {
        let mut auth = Self::new(fetcher, targets);
        auth.interval = interval;
        let auth = Arc::new(auth);
        let worker = Arc::clone(&auth);
        tokio::spawn(async move { worker.refresh_loop().await });
        auth
    }

    async fn refresh_loop(&self) {
        let mut stop_rx = self.stop_tx.subscribe();
        // First refresh immediately, then on the timer.
        let mut delay = Duration::from_millis(1);
        loop {
            tokio::select! {
                _ = stop_rx.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = match self.refresh_once().await {
                Ok(()) => self.interval,
                Err(e) => {
                    warn!(err = %e, "authority refresh failed");
                    self.interval.min(Duration::from_secs(60))
                }
            };
        }
    }

    /// Run one refresh cycle: fetch every target, honor promotions, swap the
    /// map wholesale.
    pub async fn refresh_once(&self) -> Result<(), AuthorityError> {
        let targets = self.targets.lock().map(|t| t.clone()).unwrap_or_default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut promoted: HashMap<String, usize> = HashMap::new();
        let mut fresh: HashMap<String, Vec<Entry>> = HashMap::new();
        let mut failures = 0usize;

        for target in &targets {
            if !self
                .collect_target(target, &mut seen, &mut promoted, &mut fresh)
                .await
            {
                failures += 1;
            }
        }

        // Promotion pass: adopt candidates with a majority of seen sources
        // behind them, then read them in the same cycle.
        let candidates: Vec<(String, usize)> = promoted.into_iter().collect();
        for (candidate, votes) in candidates {
            if seen.contains(&candidate) {
                continue;
            }
            if !majority(votes, seen.len()) {
                debug!(candidate = %candidate, votes, "promotion below majority");
                continue;
            }
            info!(candidate = %candidate, votes, "authority source promoted");
            if let Ok(mut t) = self.targets.lock() {
                if !t.contains(&candidate) {
                    t.push(candidate.clone());
                }
            }
            let mut ignored = HashMap::new();
            self.collect_target(&candidate, &mut seen, &mut ignored, &mut fresh)
                .await;
        }

        if let Ok(mut entries) = self.entries.write() {
            *entries = fresh;
        }

        if failures > 0 && failures == targets.len() {
            return Err(AuthorityError::Fetch("all sources failed".to_string()));
        }
        Ok(())
    }

    async fn collect_target(
        &self,
        target: &str,
        seen: &mut HashSet<String>,
        promoted: &mut HashMap<String, usize>,
        fresh: &mut HashMap<String, Vec<Entry>>,
    ) -> bool {
        if seen.contains(target) {
            return true;
        }
        let lines = match self.fetcher.fetch(target).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!(target = %target, err = %e, "failed to fetch authority records");
                return false;
            }
        };
        seen.insert(target.to_string());
        collect_lines(target, lines, promoted, fresh);
        true
    }

    // Static sources never await; run the parse inline at construction.
    fn apply_refresh_blocking(self: &Arc<Self>) {
        let Fetcher::Static(sources) = &self.fetcher else {
            return;
        };
        let mut fresh: HashMap<String, Vec<Entry>> = HashMap::new();
        let mut promoted = HashMap::new();
        for (target, lines) in sources {
            collect_lines(target, lines.clone(), &mut promoted, &mut fresh);
        }
        if let Ok(mut entries) = self.entries.write() {
            *entries = fresh;
        }
    }

    /// True if any entry under any source matches `key` and carries every
    /// requested permission.
    pub fn has_permissions(&self, key: &str, perms: &[Permission]) -> bool {
        let Ok(entries) = self.entries.read() else {
            return false;
        };
        entries
            .values()
            .flatten()
            .any(|e| e.key == key && e.has_permissions(perms))
    }

    /// Every permission granted to `key` across all sources.
    pub fn all_permissions(&self, key: &str) -> Vec<Permission> {
        let Ok(entries) = self.entries.read() else {
            return Vec::new();
        };
        let mut out: BTreeSet<Permission> = BTreeSet::new();
        for e in entries.values().flatten() {
            if e.key == key {
                out.extend(e.permissions.iter().copied());
            }
        }
        out.into_iter().collect()
    }

    /// Flattened snapshot; later sources overwrite earlier ones per key.
    pub fn entries(&self) -> HashMap<String, Entry> {
        let Ok(entries) = self.entries.read() else {
            return HashMap::new();
        };
        let mut sources: Vec<&String> = entries.keys().collect();
        sources.sort();
        let mut out = HashMap::new();
        for source in sources {
            for e in &entries[source] {
                out.insert(e.key.clone(), e.clone());
            }
        }
        out
    }

    /// Cancel the refresher.
    pub fn stop_updates(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Fold one source's lines into the per-source entry map and the promotion
/// tally. Malformed lines and unknown tags are logged and skipped.
fn collect_lines(
    target: &str,
    lines: Vec<String>,
    promoted: &mut HashMap<String, usize>,
    fresh: &mut HashMap<String, Vec<Entry>>,
) {
    for line in lines {
        let Some((key, tags)) = parse_line(&line) else {
            warn!(target = %target, line = %line, "malformed authority line");
            continue;
        };
        if key == "promote" {
            let mut seen_tags = HashSet::new();
            for tag in tags {
                if seen_tags.insert(tag.clone()) {
                    *promoted.entry(tag).or_insert(0) += 1;
                }
            }
            continue;
        }
        let mut entry = Entry {
            key,
            permissions: BTreeSet::new(),
        };
        for tag in tags {
            match Permission::parse(&tag) {
                Some(p) => {
                    entry.permissions.insert(p);
                }
                None => warn!(target = %target, tag = %tag, "unknown permission tag"),
            }
        }
        fresh.entry(target.to_string()).or_default().push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn majority_table() {
        assert!(majority(1, 0));
        assert!(majority(1, 1));
        assert!(majority(1, 2));
        assert!(!majority(0, 2));
        assert!(majority(2, 3));
        assert!(!majority(1, 3));
        assert!(majority(3, 4));
        assert!(!majority(2, 4));
        assert!(majority(3, 9));
    }

    #[test]
    fn parse_line_grammar() {
        let (key, tags) = parse_line("abc:write,sync").unwrap();
        assert_eq!(key, "abc");
        assert_eq!(tags, vec!["write", "sync"]);
        let (key, tags) = parse_line(" abc : sync ").unwrap();
        assert_eq!(key, "abc");
        assert_eq!(tags, vec!["sync"]);
        assert!(parse_line("no-colon-here").is_none());
        assert!(parse_line(":tags").is_none());
    }

    #[test]
    fn fixed_entries_and_queries() {
        let auth = Authority::fixed(vec![
            "node-a:write,sync".to_string(),
            "node-b:sync".to_string(),
            "node-c:sync,launch".to_string(),
        ]);
        assert!(auth.has_permissions("node-a", &[Permission::Write, Permission::Sync]));
        assert!(auth.has_permissions("node-b", &[Permission::Sync]));
        assert!(!auth.has_permissions("node-b", &[Permission::Write]));
        // Unknown tag is ignored, the recognized one survives.
        assert!(auth.has_permissions("node-c", &[Permission::Sync]));
        assert!(!auth.has_permissions("node-d", &[Permission::Sync]));
        assert_eq!(auth.entries().len(), 3);
        assert_eq!(
            auth.all_permissions("node-a"),
            vec![Permission::Write, Permission::Sync]
        );
    }
}
