//! Cache key derivation and content hashing.
//! Keys are `i18n:v3:<namespace>:<lang>:<suffix>` where the suffix is the
//! canonical serialization of the value, or a base36 rolling hash when the
//! serialization would make the key unreasonably long.

use serde_json::Value;

/// Reserved key prefix for this subsystem in persistent storage.
pub const KEY_PREFIX: &str = "i18n:v3:";

/// Serialized values longer than this use a hash suffix instead of the literal.
pub const LITERAL_MAX: usize = 200;

/// Canonical, deterministic serialization of a translatable value.
/// Bare strings are trimmed (deliberate: whitespace-only edits must not
/// fragment the cache); arrays and objects serialize with object keys
/// sorted recursively so structurally-equal values always agree.
pub fn canonical_serialization(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => stable_stringify(other),
    }
}

fn stable_stringify(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    let v = map.get(k).cloned().unwrap_or(Value::Null);
                    format!("{}:{}", Value::String(k.clone()), stable_stringify(&v))
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(stable_stringify).collect();
            format!("[{}]", fields.join(","))
        }
        other => other.to_string(),
    }
}

/// Build the cache key for a (namespace, target language, value) triple.
/// Pure: structurally-equal inputs always yield the same key.
pub fn build_key(namespace: &str, target_language: &str, value: &Value) -> String {
    let serialized = canonical_serialization(value);
    let suffix = if serialized.len() > LITERAL_MAX {
        to_base36(fnv1a32(&serialized))
    } else {
        serialized
    };
    format!("{KEY_PREFIX}{namespace}:{target_language}:{suffix}")
}

/// Durable content digest for the remote record store: blake3 over the
/// canonical serialization, hex-encoded.
pub fn source_hash(value: &Value) -> String {
    blake3::hash(canonical_serialization(value).as_bytes())
        .to_hex()
        .to_string()
}

/// 32-bit FNV-1a over the serialized value. Non-cryptographic; only bounds
/// key length, collisions are caught downstream by source-value equality.
fn fnv1a32(s: &str) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in s.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
