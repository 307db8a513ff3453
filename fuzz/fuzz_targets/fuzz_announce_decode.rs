// Copyright (c) 2026 Meridian
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;
use meridian::core::announce::{Announce, EnvelopeBeatInfo, EnvelopeBeatTick, EnvelopeRecordUpdate};
use meridian::core::types::{decode_canonical_limited, MAX_ENVELOPE_BYTES, MAX_RECORD_BYTES};

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary wire bytes must never panic; verification of
    // well-formed announces is covered by unit tests.
    if let Ok(ann) = decode_canonical_limited::<Announce>(data, MAX_RECORD_BYTES) {
        let _ = ann.verify();
    }
    let _ = EnvelopeRecordUpdate::unpack(&data[..data.len().min(MAX_ENVELOPE_BYTES)]);
    let _ = EnvelopeBeatTick::unpack(&data[..data.len().min(MAX_ENVELOPE_BYTES)]);
    let _ = EnvelopeBeatInfo::unpack(&data[..data.len().min(MAX_ENVELOPE_BYTES)]);
});
