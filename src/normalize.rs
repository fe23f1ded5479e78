//! Backend response normalization.
//! The translation backend is LLM-backed and does not reliably return a bare
//! value: it may wrap the result in a `{ "value": .. }` envelope, stringify
//! JSON inside a `{ "json": ".." }` envelope, or double-encode a string.
//! Normalization repairs these shapes and enforces type fidelity against the
//! original value. It never fails: ambiguity degrades to the original.

use serde_json::Value;

/// Classified shape of a raw backend value.
#[derive(Debug)]
pub enum ResponseShape {
    /// A plain value, usable as-is.
    Bare(Value),
    /// `{ "value": X }` with no other meaningful keys.
    ValueEnvelope(Value),
    /// `{ "json": "<stringified JSON>" }`.
    JsonStringEnvelope(String),
    /// An object we cannot confidently interpret.
    Unrecognized(Value),
}

/// Keys a raw upstream wrapper may carry besides the payload itself.
const ENVELOPE_META_KEYS: [&str; 2] = ["error", "detail"];

/// Classify a raw backend value into one of the known envelope shapes.
pub fn classify(raw: Value) -> ResponseShape {
    match raw {
        Value::Object(mut map) => {
            let extra_keys = map
                .keys()
                .filter(|k| {
                    k.as_str() != "value"
                        && k.as_str() != "json"
                        && !ENVELOPE_META_KEYS.contains(&k.as_str())
                })
                .count();
            if extra_keys > 0 {
                return ResponseShape::Unrecognized(Value::Object(map));
            }
            if let Some(inner) = map.remove("value") {
                return ResponseShape::ValueEnvelope(inner);
            }
            // Only a string payload is a json envelope; anything else stays
            // intact so the caller can degrade on the full object.
            if let Some(Value::String(s)) = map.get("json") {
                return ResponseShape::JsonStringEnvelope(s.clone());
            }
            ResponseShape::Unrecognized(Value::Object(map))
        }
        other => ResponseShape::Bare(other),
    }
}

/// True when a value structurally resembles a raw upstream wrapper object
/// rather than translated content: every key is a payload or metadata key of
/// the wire format, or the object is empty. Used by the cache validation
/// guard and the normalizer's object fidelity check.
pub fn looks_like_envelope(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.keys().all(|k| {
            k.as_str() == "value"
                || k.as_str() == "json"
                || ENVELOPE_META_KEYS.contains(&k.as_str())
        }),
        _ => false,
    }
}

/// Normalize a candidate backend response against the original value.
/// Unwraps known envelopes (at most twice, for `{ "value": { "json": .. } }`),
/// re-parses double-encoded strings, then enforces the type contract:
/// string stays string, array stays array, object stays object. Anything
/// that cannot be repaired returns the original unchanged.
pub fn normalize(original: &Value, candidate: Value) -> Value {
    let mut current = candidate;
    for _ in 0..2 {
        current = match classify(current) {
            ResponseShape::ValueEnvelope(inner) => inner,
            ResponseShape::JsonStringEnvelope(s) => {
                match serde_json::from_str::<Value>(&s) {
                    Ok(parsed) => parsed,
                    Err(_) => Value::String(s),
                }
            }
            ResponseShape::Bare(v) | ResponseShape::Unrecognized(v) => {
                current = v;
                break;
            }
        };
    }

    // A string that is itself a quoted JSON string gets parsed once more.
    if let Value::String(s) = &current {
        let trimmed = s.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
            if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
                current = parsed;
            }
        }
    }

    match original {
        Value::String(_) if current.is_string() => current,
        Value::Array(_) if current.is_array() => current,
        Value::Object(_) if current.is_object() && !looks_like_envelope(&current) => current,
        Value::String(_) | Value::Array(_) | Value::Object(_) => {
            tracing::warn!(got = %json_type_name(&current), "normalize: type mismatch, keeping original");
            original.clone()
        }
        _ => {
            if current.is_null() {
                original.clone()
            } else {
                current
            }
        }
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
