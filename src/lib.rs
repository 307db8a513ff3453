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

//! Meridian - peer-to-peer, content-addressed, versioned record store.
//!
//! Each node in a private overlay keeps a local index of named records whose
//! bodies live in a content-addressed object store, learns about updates from
//! peers through signed gossip, pulls missing history from authorized peers
//! on startup, and publishes its own writes under a cryptographic identity.
//!
//! This crate provides:
//! - Canonical types, time-ordered IDs and signed announce envelopes
//! - A bucketed transactional KV index with per-key TTL
//! - The authority model refreshed from DNS/URL text sources
//! - The record store: CRUD, version chains, pin/GC, event pipelines,
//!   startup sync and the beat subsystem
//! - Public and private HTTP surfaces

/// HTTP surfaces (public record API, private peer tunnel).
pub mod api;
/// Authority: node permission map and its refresher.
pub mod authority;
/// Core protocol primitives (types, IDs, identity, announces, records).
pub mod core;
/// Observability (metrics registry).
pub mod monitoring;
/// Content-addressed object store collaborator.
pub mod objectstore;
/// Bucketed transactional key/value state.
pub mod state;
/// The versioned record store.
pub mod store;
