//! Versioned envelope wrapping stored JSON.
//!
//! Three generations exist in storage. Only the current one is ever written:
//!
//! ```text
//! v8    {"_v": 8, "_ts": 1700000000000, "_is_chunked": true, "_chunk_ids": ["..."], "data": null}
//! v7.1  {"_ts": ..., "data": ..., "_is_chunked": ..., "_chunk_count": 3, "_use_versioned_keys": true}
//! v6    {"timestamp": ..., "is_chunked": ..., "count": 3, "data": ...}
//! ```
//!
//! Any other JSON object or array is a pre-envelope payload and decodes as
//! [`Envelope::Unversioned`] with logical timestamp 0.

use serde_json::{json, Map, Value};

use opsdesk_store::RecordId;

/// Version discriminant of the envelope currently written.
pub const CURRENT_VERSION: u64 = 8;

/// Envelope generation, decided before any variant-specific parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeVersion {
    V8,
    V71,
    V6,
    Unversioned,
}

impl EnvelopeVersion {
    /// Structural sniffing of the generation. `None` for unknown `_v` values.
    pub fn sniff(value: &Value) -> Option<Self> {
        let Some(obj) = value.as_object() else {
            return value.is_array().then_some(EnvelopeVersion::Unversioned);
        };
        if let Some(v) = obj.get("_v") {
            return (v.as_u64() == Some(CURRENT_VERSION)).then_some(EnvelopeVersion::V8);
        }
        if obj.contains_key("_ts") {
            return Some(EnvelopeVersion::V71);
        }
        if obj.contains_key("timestamp") && obj.contains_key("is_chunked") {
            return Some(EnvelopeVersion::V6);
        }
        Some(EnvelopeVersion::Unversioned)
    }

    pub fn label(&self) -> &'static str {
        match self {
            EnvelopeVersion::V8 => "v8",
            EnvelopeVersion::V71 => "v7.1",
            EnvelopeVersion::V6 => "v6",
            EnvelopeVersion::Unversioned => "unversioned",
        }
    }
}

impl std::fmt::Display for EnvelopeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Current envelope: chunks addressed by stored record ids.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentEnvelope {
    pub timestamp: i64,
    pub chunk_ids: Option<Vec<RecordId>>,
    pub data: Value,
}

/// v7.1 envelope: chunks addressed by key, optionally timestamped.
#[derive(Debug, Clone, PartialEq)]
pub struct Legacy71Envelope {
    pub timestamp: i64,
    pub chunked: bool,
    pub chunk_count: usize,
    pub versioned_keys: bool,
    pub data: Value,
}

/// v6 envelope: chunks addressed by `{key}_chunk_{i}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Legacy6Envelope {
    pub timestamp: i64,
    pub chunked: bool,
    pub count: usize,
    pub data: Value,
}

/// A decoded envelope of any generation.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Current(CurrentEnvelope),
    Legacy71(Legacy71Envelope),
    Legacy6(Legacy6Envelope),
    Unversioned(Value),
}

/// Where the payload of a chunked envelope lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkRefs {
    /// Payload is inline in `data`.
    Inline,
    /// Ordered chunk record ids.
    Ids(Vec<RecordId>),
    /// Chunks found by naming convention.
    Keyed(ChunkKeyPattern),
}

/// Naming convention of legacy chunk records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkKeyPattern {
    pub count: usize,
    /// `Some(ts)` for `{key}_{ts}_chunk_{i}`, `None` for `{key}_chunk_{i}`.
    pub versioned: Option<i64>,
}

impl ChunkKeyPattern {
    pub fn key_for(&self, logical_key: &str, index: usize) -> String {
        match self.versioned {
            Some(ts) => versioned_chunk_key(logical_key, ts, index),
            None => format!("{}_chunk_{}", logical_key, index),
        }
    }

    pub fn keys(&self, logical_key: &str) -> Vec<String> {
        (0..self.count).map(|i| self.key_for(logical_key, i)).collect()
    }
}

/// Diagnostic key written on every chunk record, v8 included.
pub fn versioned_chunk_key(logical_key: &str, timestamp: i64, index: usize) -> String {
    format!("{}_{}_chunk_{}", logical_key, timestamp, index)
}

impl Envelope {
    pub fn version(&self) -> EnvelopeVersion {
        match self {
            Envelope::Current(_) => EnvelopeVersion::V8,
            Envelope::Legacy71(_) => EnvelopeVersion::V71,
            Envelope::Legacy6(_) => EnvelopeVersion::V6,
            Envelope::Unversioned(_) => EnvelopeVersion::Unversioned,
        }
    }

    /// Logical timestamp; the only ordering authority between generations.
    pub fn timestamp(&self) -> i64 {
        match self {
            Envelope::Current(e) => e.timestamp,
            Envelope::Legacy71(e) => e.timestamp,
            Envelope::Legacy6(e) => e.timestamp,
            Envelope::Unversioned(_) => 0,
        }
    }

    pub fn is_chunked(&self) -> bool {
        !matches!(self.chunk_refs(), ChunkRefs::Inline)
    }

    pub fn chunk_refs(&self) -> ChunkRefs {
        match self {
            Envelope::Current(e) => match &e.chunk_ids {
                Some(ids) => ChunkRefs::Ids(ids.clone()),
                None => ChunkRefs::Inline,
            },
            Envelope::Legacy71(e) if e.chunked => ChunkRefs::Keyed(ChunkKeyPattern {
                count: e.chunk_count,
                versioned: e.versioned_keys.then_some(e.timestamp),
            }),
            Envelope::Legacy6(e) if e.chunked => ChunkRefs::Keyed(ChunkKeyPattern {
                count: e.count,
                versioned: None,
            }),
            _ => ChunkRefs::Inline,
        }
    }

    /// The inline payload; `None` when the payload lives in chunks.
    pub fn inline_data(&self) -> Option<&Value> {
        if self.is_chunked() {
            return None;
        }
        Some(match self {
            Envelope::Current(e) => &e.data,
            Envelope::Legacy71(e) => &e.data,
            Envelope::Legacy6(e) => &e.data,
            Envelope::Unversioned(v) => v,
        })
    }
}

/// Encode a current-generation envelope.
///
/// With `chunk_ids` the envelope is chunked and `data` is written as `null`.
pub fn encode(data: &Value, timestamp: i64, chunk_ids: Option<&[RecordId]>) -> String {
    let envelope = match chunk_ids {
        Some(ids) => json!({
            "_v": CURRENT_VERSION,
            "_ts": timestamp,
            "_is_chunked": true,
            "_chunk_ids": ids,
            "data": Value::Null,
        }),
        None => json!({
            "_v": CURRENT_VERSION,
            "_ts": timestamp,
            "_is_chunked": false,
            "_chunk_ids": Value::Null,
            "data": data,
        }),
    };
    envelope.to_string()
}

/// Decode stored text into an envelope. Never panics; `None` means the
/// candidate must be treated as absent.
pub fn decode(raw: &str) -> Option<Envelope> {
    let trimmed = raw.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    match EnvelopeVersion::sniff(&value)? {
        EnvelopeVersion::V8 => decode_v8(value.as_object()?).map(Envelope::Current),
        EnvelopeVersion::V71 => decode_v71(value.as_object()?).map(Envelope::Legacy71),
        EnvelopeVersion::V6 => decode_v6(value.as_object()?).map(Envelope::Legacy6),
        EnvelopeVersion::Unversioned => Some(Envelope::Unversioned(value)),
    }
}

fn decode_v8(obj: &Map<String, Value>) -> Option<CurrentEnvelope> {
    let timestamp = timestamp_field(obj.get("_ts")?)?;
    let chunked = obj.get("_is_chunked").and_then(Value::as_bool).unwrap_or(false);
    let chunk_ids = if chunked {
        let ids = obj
            .get("_chunk_ids")?
            .as_array()?
            .iter()
            .map(id_field)
            .collect::<Option<Vec<_>>>()?;
        if ids.is_empty() {
            return None;
        }
        Some(ids)
    } else {
        None
    };
    Some(CurrentEnvelope {
        timestamp,
        chunk_ids,
        data: obj.get("data").cloned().unwrap_or(Value::Null),
    })
}

fn decode_v71(obj: &Map<String, Value>) -> Option<Legacy71Envelope> {
    let timestamp = timestamp_field(obj.get("_ts")?)?;
    let chunked = obj.get("_is_chunked").and_then(Value::as_bool).unwrap_or(false);
    let chunk_count = count_field(obj.get("_chunk_count"));
    if chunked && chunk_count == 0 {
        return None;
    }
    Some(Legacy71Envelope {
        timestamp,
        chunked,
        chunk_count,
        versioned_keys: obj
            .get("_use_versioned_keys")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        data: obj.get("data").cloned().unwrap_or(Value::Null),
    })
}

fn decode_v6(obj: &Map<String, Value>) -> Option<Legacy6Envelope> {
    let timestamp = timestamp_field(obj.get("timestamp")?)?;
    let chunked = obj.get("is_chunked").and_then(Value::as_bool).unwrap_or(false);
    let count = count_field(obj.get("count"));
    if chunked && count == 0 {
        return None;
    }
    Some(Legacy6Envelope {
        timestamp,
        chunked,
        count,
        data: obj.get("data").cloned().unwrap_or(Value::Null),
    })
}

/// Largest accepted timestamp: the last millisecond of year 9999.
pub const MAX_TIMESTAMP: i64 = 253_402_300_799_999;

/// Integer, integral float or numeric-string timestamps in
/// `0..=MAX_TIMESTAMP` are accepted. Anything else makes the envelope
/// unreadable.
fn timestamp_field(value: &Value) -> Option<i64> {
    let ts = match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i,
            None => {
                let f = n.as_f64()?;
                if f.fract() != 0.0 || !(0.0..=MAX_TIMESTAMP as f64).contains(&f) {
                    return None;
                }
                f as i64
            }
        },
        Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };
    (0..=MAX_TIMESTAMP).contains(&ts).then_some(ts)
}

fn count_field(value: Option<&Value>) -> usize {
    value
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0) as usize
}

fn id_field(value: &Value) -> Option<RecordId> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_inline_then_decode() {
        let data = json!({"theme": "dark", "widgets": [1, 2, 3]});
        let raw = encode(&data, 42, None);
        let env = decode(&raw).unwrap();
        assert_eq!(env.version(), EnvelopeVersion::V8);
        assert_eq!(env.timestamp(), 42);
        assert!(!env.is_chunked());
        assert_eq!(env.inline_data(), Some(&data));
    }

    #[test]
    fn encode_chunked_nulls_data() {
        let ids = vec!["c0".to_string(), "c1".to_string()];
        let raw = encode(&json!({"ignored": true}), 7, Some(&ids));
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["_is_chunked"], json!(true));
        assert_eq!(parsed["data"], Value::Null);

        let env = decode(&raw).unwrap();
        assert_eq!(env.chunk_refs(), ChunkRefs::Ids(ids));
        assert!(env.inline_data().is_none());
    }

    #[test]
    fn decodes_v71_versioned_keys() {
        let raw = r#"{"_ts": 1700, "data": null, "_is_chunked": true, "_chunk_count": 3, "_use_versioned_keys": true}"#;
        let env = decode(raw).unwrap();
        assert_eq!(env.version(), EnvelopeVersion::V71);
        assert_eq!(env.timestamp(), 1700);
        match env.chunk_refs() {
            ChunkRefs::Keyed(p) => {
                assert_eq!(p.count, 3);
                assert_eq!(p.key_for("roles_config", 2), "roles_config_1700_chunk_2");
            }
            other => panic!("unexpected refs: {:?}", other),
        }
    }

    #[test]
    fn decodes_v71_inline() {
        let raw = r#"{"_ts": 5, "data": {"a": 1}, "_is_chunked": false}"#;
        let env = decode(raw).unwrap();
        assert_eq!(env.inline_data(), Some(&json!({"a": 1})));
    }

    #[test]
    fn decodes_v6_plain_keys() {
        let raw = r#"{"timestamp": 99, "is_chunked": true, "count": 2}"#;
        let env = decode(raw).unwrap();
        assert_eq!(env.version(), EnvelopeVersion::V6);
        match env.chunk_refs() {
            ChunkRefs::Keyed(p) => assert_eq!(p.keys("cfg"), vec!["cfg_chunk_0", "cfg_chunk_1"]),
            other => panic!("unexpected refs: {:?}", other),
        }
    }

    #[test]
    fn bare_json_is_unversioned_with_zero_timestamp() {
        let env = decode(r#"{"roles": {}}"#).unwrap();
        assert_eq!(env.version(), EnvelopeVersion::Unversioned);
        assert_eq!(env.timestamp(), 0);
        assert_eq!(decode("[1,2]").unwrap().inline_data(), Some(&json!([1, 2])));
    }

    #[test]
    fn float_and_string_timestamps() {
        assert_eq!(decode(r#"{"_v": 8, "_ts": 12.0, "data": 1}"#).unwrap().timestamp(), 12);
        assert_eq!(decode(r#"{"_ts": "77", "data": 1}"#).unwrap().timestamp(), 77);
    }

    #[test]
    fn out_of_range_timestamps_are_unreadable() {
        for raw in [
            r#"{"_v": 8, "_ts": 1e30, "data": 1}"#,
            r#"{"_v": 8, "_ts": 12.5, "data": 1}"#,
            r#"{"_v": 8, "_ts": -5, "data": 1}"#,
            r#"{"_v": 8, "_ts": 9223372036854775807, "data": 1}"#,
            r#"{"_ts": "99999999999999999", "data": 1}"#,
            r#"{"timestamp": 1e300, "is_chunked": false, "data": 1}"#,
        ] {
            assert!(decode(raw).is_none(), "expected None for {}", raw);
        }
        let max = format!(r#"{{"_v": 8, "_ts": {}, "data": 1}}"#, MAX_TIMESTAMP);
        assert_eq!(decode(&max).unwrap().timestamp(), MAX_TIMESTAMP);
    }

    #[test]
    fn decode_never_panics_on_garbage() {
        let corpus = [
            "",
            "   ",
            "null",
            "true",
            "42",
            "\"string\"",
            "Operations Dashboard",
            "{",
            "[1, 2",
            "{\"_v\": 8, \"_ts\": ",
            "{\"_v\": 8}",
            "{\"_v\": 9, \"_ts\": 1}",
            "{\"_v\": 8, \"_ts\": 1, \"_is_chunked\": true}",
            "{\"_v\": 8, \"_ts\": 1, \"_is_chunked\": true, \"_chunk_ids\": []}",
            "{\"_ts\": null}",
            "{\"_ts\": 1, \"_is_chunked\": true, \"_chunk_count\": 0}",
            "{\"timestamp\": {}, \"is_chunked\": false}",
            "\u{feff}{}",
            "{\"a\": \"\u{1F600}\"",
        ];
        for raw in corpus {
            assert!(decode(raw).is_none(), "expected None for {:?}", raw);
        }
    }

    #[test]
    fn leading_whitespace_is_tolerated() {
        assert!(decode("  \n{\"_v\": 8, \"_ts\": 1, \"data\": 1}").is_some());
    }
}
