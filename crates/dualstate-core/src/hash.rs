use xxhash_rust::xxh64::xxh64;

use crate::types::{GenericParam, InterfaceFlags, InterfaceKey};

const BASE62_CHARS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Encode a u64 value as a base62 string (11 chars, zero-padded).
fn base62_encode(mut value: u64) -> String {
    if value == 0 {
        return "0".repeat(11);
    }
    let mut result = Vec::with_capacity(11);
    while value > 0 {
        let idx = (value % 62) as usize;
        result.push(BASE62_CHARS[idx]);
        value /= 62;
    }
    while result.len() < 11 {
        result.push(b'0');
    }
    result.iter().rev().map(|&b| char::from(b)).collect()
}

/// Collapse runs of whitespace so formatting-only edits hash identically.
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Compute the signature hash of an interface.
///
/// hash = base62(xxhash64(signature + generics + flags))
///
/// Generic parameters are folded in declaration order with their bounds
/// sorted, so `T: Send + Clone` and `T: Clone + Send` are the same
/// signature.
pub fn compute_signature_hash(
    signature: &str,
    generics: &[GenericParam],
    flags: &InterfaceFlags,
) -> String {
    let mut input = normalize_whitespace(signature);
    input.push('\0');
    for param in generics {
        let mut bounds: Vec<&str> = param.bounds.iter().map(|b| b.trim()).collect();
        bounds.sort_unstable();
        input.push_str(param.name.trim());
        input.push(':');
        input.push_str(&bounds.join("+"));
        input.push(';');
    }
    input.push('\0');
    input.push(if flags.is_unsafe { 'u' } else { '-' });
    input.push(if flags.is_async { 'a' } else { '-' });
    input.push(if flags.is_const { 'c' } else { '-' });

    base62_encode(xxh64(input.as_bytes(), 0))
}

/// Compute the body hash of an interface's source slice.
pub fn compute_body_hash(body: &str) -> String {
    base62_encode(xxh64(normalize_whitespace(body).as_bytes(), 0))
}

/// Stable numeric identifier of a key, unchanged across re-ingestion.
pub fn stable_id(key: &InterfaceKey) -> u64 {
    xxh64(key.canonical().as_bytes(), 0)
}
