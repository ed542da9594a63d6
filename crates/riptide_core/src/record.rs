//! Flat JSON records and the local-cache envelope.

use serde_json::Value;

/// A record is a flat map of field name to JSON-compatible value.
pub type Record = serde_json::Map<String, Value>;

/// Reserved envelope field carrying the persisted model status.
pub const STATUS_FIELD: &str = "$status";

/// Reserved envelope field carrying the last remote-confirmed
/// snapshot.
pub const SAVED_FIELD: &str = "$saved";

/// Computes the fields of `current` that differ from `baseline`.
///
/// Fields named in `always` are included whether or not they changed,
/// provided they exist on `current`. Fields absent from `current` are
/// never emitted; removal is not expressed through diffs.
pub fn diff(current: &Record, baseline: &Record, always: &[String]) -> Record {
    let mut out = Record::new();
    for (name, value) in current {
        let forced = always.iter().any(|a| a == name);
        if forced || baseline.get(name) != Some(value) {
            out.insert(name.clone(), value.clone());
        }
    }
    out
}

/// Overwrites `target` fields with every field of `source`.
pub fn merge(target: &mut Record, source: &Record) {
    for (name, value) in source {
        target.insert(name.clone(), value.clone());
    }
}

/// Returns true if `subset`'s fields are all present in `record` with
/// equal values.
pub fn matches(record: &Record, subset: &Record) -> bool {
    subset
        .iter()
        .all(|(name, value)| record.get(name) == Some(value))
}

/// Builds the envelope persisted to the local store: the model's
/// fields plus reserved `$status` and `$saved` entries.
pub fn encode_local(fields: &Record, status: u8, saved: Option<&Record>) -> Record {
    let mut envelope = fields.clone();
    envelope.insert(STATUS_FIELD.to_string(), Value::from(status));
    if let Some(saved) = saved {
        envelope.insert(SAVED_FIELD.to_string(), Value::Object(saved.clone()));
    }
    envelope
}

/// Splits a local envelope back into fields, status, and saved
/// snapshot. Unknown `$status` values decode as `None`.
pub fn decode_local(mut envelope: Record) -> (Record, Option<u8>, Option<Record>) {
    let status = envelope
        .remove(STATUS_FIELD)
        .and_then(|v| v.as_u64())
        .and_then(|n| u8::try_from(n).ok());
    let saved = match envelope.remove(SAVED_FIELD) {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    };
    (envelope, status, saved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn diff_detects_changes() {
        let current = record(json!({"a": 1, "b": "x", "c": true}));
        let baseline = record(json!({"a": 1, "b": "y"}));
        let d = diff(&current, &baseline, &[]);
        assert_eq!(d, record(json!({"b": "x", "c": true})));
    }

    #[test]
    fn diff_respects_always_fields() {
        let current = record(json!({"a": 1, "updated_at": 5}));
        let baseline = current.clone();
        let d = diff(&current, &baseline, &["updated_at".into()]);
        assert_eq!(d, record(json!({"updated_at": 5})));
    }

    #[test]
    fn merge_overwrites() {
        let mut target = record(json!({"a": 1, "b": 2}));
        merge(&mut target, &record(json!({"b": 3, "c": 4})));
        assert_eq!(target, record(json!({"a": 1, "b": 3, "c": 4})));
    }

    #[test]
    fn subset_matching() {
        let rec = record(json!({"a": 1, "b": 2}));
        assert!(matches(&rec, &record(json!({"a": 1}))));
        assert!(!matches(&rec, &record(json!({"a": 2}))));
        assert!(!matches(&rec, &record(json!({"z": 1}))));
    }

    #[test]
    fn local_envelope_roundtrip() {
        let fields = record(json!({"id": "k1", "name": "t0"}));
        let saved = record(json!({"id": "k1"}));
        let envelope = encode_local(&fields, 1, Some(&saved));
        let (f, status, s) = decode_local(envelope);
        assert_eq!(f, fields);
        assert_eq!(status, Some(1));
        assert_eq!(s, Some(saved));
    }

    #[test]
    fn envelope_without_saved() {
        let fields = record(json!({"id": "k1"}));
        let (f, status, s) = decode_local(encode_local(&fields, 0, None));
        assert_eq!(f, fields);
        assert_eq!(status, Some(0));
        assert_eq!(s, None);
    }
}
