// Copyright (c) 2026 Meridian
// Licensed under the Apache-2.0 License.

#![no_main]
#![forbid(unsafe_code)]

use libfuzzer_sys::fuzz_target;
use meridian::core::record::Record;

fuzz_target!(|data: &[u8]| {
    if let Ok(rec) = Record::unpack(data) {
        let _ = rec.validate();
        let _ = rec.current_envelope();
    }
});
