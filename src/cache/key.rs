//! Cache key derivation using BLAKE3

use crate::types::{Resolution, StyleParams};
use blake3::Hasher;
use serde_json::Value;
use std::fmt;

/// BLAKE3 digest of a reference image's bytes
pub type ContentHash = [u8; 32];

/// Fixed-length digest identifying equivalent generation requests
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey([u8; 32]);

impl CacheKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let array: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", &self.to_hex()[..16])
    }
}

pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    *blake3::hash(content).as_bytes()
}

/// Derive the cache key for a generation request.
///
/// key = hash("madsea-scene-v1" || content_hash || text || style_name || style_params || resolution || backend_mode)
///
/// Every variable-length field is length-prefixed and style parameters are
/// hashed in sorted key order, nested objects included, so the same logical
/// request always produces the same key.
pub fn generate_key(
    scene_content_hash: &ContentHash,
    text: &str,
    style_name: &str,
    style_params: &StyleParams,
    resolution: Resolution,
    backend_mode: &str,
) -> CacheKey {
    let mut hasher = Hasher::new();
    hasher.update(b"madsea-scene-v1");

    hasher.update(b"content:");
    hasher.update(scene_content_hash);

    update_str(&mut hasher, b"text:", text);
    update_str(&mut hasher, b"style:", style_name);

    hasher.update(b"params:");
    hasher.update(&(style_params.iter().count() as u64).to_be_bytes());
    for (key, value) in style_params.iter() {
        update_str(&mut hasher, b"k:", key);
        update_value(&mut hasher, value);
    }

    hasher.update(b"resolution:");
    hasher.update(&resolution.width.to_be_bytes());
    hasher.update(&resolution.height.to_be_bytes());

    update_str(&mut hasher, b"mode:", backend_mode);

    CacheKey(*hasher.finalize().as_bytes())
}

fn update_str(hasher: &mut Hasher, label: &[u8], value: &str) {
    hasher.update(label);
    hasher.update(&(value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn update_value(hasher: &mut Hasher, value: &Value) {
    match value {
        Value::Null => {
            hasher.update(b"n");
        }
        Value::Bool(b) => {
            hasher.update(if *b { b"t" } else { b"f" });
        }
        Value::Number(n) => update_str(hasher, b"#", &n.to_string()),
        Value::String(s) => update_str(hasher, b"s", s),
        Value::Array(items) => {
            hasher.update(b"[");
            hasher.update(&(items.len() as u64).to_be_bytes());
            for item in items {
                update_value(hasher, item);
            }
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            hasher.update(b"{");
            hasher.update(&(entries.len() as u64).to_be_bytes());
            for (key, item) in entries {
                update_str(hasher, b"k:", key);
                update_value(hasher, item);
            }
        }
    }
}
