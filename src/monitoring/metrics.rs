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

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A prometheus registry operation failed.
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Inbound events processed.
    pub events_inbound_total: IntCounter,
    /// Outbound events published.
    pub events_outbound_total: IntCounter,
    /// Events dropped before processing (unverifiable, unauthorized, overflow).
    pub events_dropped_total: IntCounter,
    /// Announces rejected for a bad signature.
    pub announce_invalid_total: IntCounter,
    /// Records imported during startup sync.
    pub records_synced_total: IntCounter,
    /// Alive peers seen by the last sync attempt.
    pub sync_peers_alive: IntGauge,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let events_inbound_total =
            IntCounter::new("meridian_events_inbound_total", "Inbound events processed")
                .map_err(|_| MetricsError::Prom)?;
        let events_outbound_total =
            IntCounter::new("meridian_events_outbound_total", "Outbound events published")
                .map_err(|_| MetricsError::Prom)?;
        let events_dropped_total =
            IntCounter::new("meridian_events_dropped_total", "Events dropped before processing")
                .map_err(|_| MetricsError::Prom)?;
        let announce_invalid_total = IntCounter::new(
            "meridian_announce_invalid_total",
            "Announces rejected for a bad signature",
        )
        .map_err(|_| MetricsError::Prom)?;
        let records_synced_total = IntCounter::new(
            "meridian_records_synced_total",
            "Records imported during startup sync",
        )
        .map_err(|_| MetricsError::Prom)?;
        let sync_peers_alive =
            IntGauge::new("meridian_sync_peers_alive", "Alive peers seen by last sync")
                .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(events_inbound_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(events_outbound_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(events_dropped_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(announce_invalid_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(records_synced_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(sync_peers_alive.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            events_inbound_total,
            events_outbound_total,
            events_dropped_total,
            announce_invalid_total,
            records_synced_total,
            sync_peers_alive,
        })
    }
}
