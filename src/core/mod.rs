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

//! Core protocol primitives: canonical encoding, time-ordered IDs, node
//! identity, signed announces and the record data model.

/// Signed announce envelopes and their ordering.
pub mod announce;
/// Node identity: Ed25519 keys and multihash node IDs.
pub mod identity;
/// Versioned record data model.
pub mod record;
/// Monotonic, time-ordered record identifiers.
pub mod timeid;
/// Canonical codec and node configuration.
pub mod types;
