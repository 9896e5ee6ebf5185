/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Canonical JSON serialization for hashing and signing.
//!
//! Every byte that feeds a content hash or a signature payload goes through
//! [`to_canonical_string`]. The rules are fixed per [`CANONICALIZATION_VERSION`]:
//!
//! 1. Object keys are sorted by their UTF-16 code units (RFC 8785 ordering)
//! 2. No insignificant whitespace
//! 3. Integral floats with magnitude below 2^53 are written without a fraction
//! 4. Integers that fit in `i64`/`u64` are written exactly in decimal, at any
//!    magnitude. RFC 8785 would round values beyond 2^53 to the nearest
//!    double; version 1 does not, so producers in other languages must keep
//!    such integers exact (or send them as strings) to reproduce hashes
//! 5. Strings use the minimal JSON escaping produced by `serde_json`
//!
//! Changing any rule requires bumping the version so that records signed
//! under the old rules can still be re-serialized the way they were signed.

use serde::Serialize;
use serde_json::{Number, Value};
use std::fmt::Write as _;

/// Version of the canonicalization rules implemented by this module.
pub const CANONICALIZATION_VERSION: u32 = 1;

/// Largest integer magnitude that survives an IEEE-754 double round trip.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Serialize a JSON value into its canonical string form.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Serialize any `Serialize` type into its canonical string form.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(to_canonical_string(&value))
}

/// Returns true if records produced under `version` can be re-serialized here.
pub fn is_supported_version(version: u32) -> bool {
    version == CANONICALIZATION_VERSION
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(out, n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

fn write_number(out: &mut String, n: &Number) {
    // Exact at any magnitude (rule 4).
    if n.is_i64() || n.is_u64() {
        let _ = write!(out, "{n}");
        return;
    }

    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER => {
            // -0.0 collapses to 0
            let _ = write!(out, "{}", f as i64);
        }
        _ => {
            let _ = write!(out, "{n}");
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // Serializing a &str cannot fail.
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => out.push_str("\"\""),
    }
}
