//! Cache key construction and request fingerprints.

use std::collections::BTreeMap;

use url::form_urlencoded;

/// Separator between key components.
pub const SEPARATOR: char = ':';

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;
const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Join key components with `:`.
pub fn join<S: AsRef<str>>(parts: &[S]) -> String {
    let mut key = String::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            key.push(SEPARATOR);
        }
        key.push_str(part.as_ref());
    }
    key
}

/// Prefix `key` with the namespace `prefix`. An empty prefix leaves the key as is.
pub fn namespaced(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{SEPARATOR}{key}")
    }
}

/// Join components under a Redis Cluster hash tag: `{prefix}:a:b`.
///
/// Every key sharing `prefix` maps to the same cluster slot, which keeps
/// multi-key operations on related keys legal.
pub fn hash_tagged<S: AsRef<str>>(prefix: &str, parts: &[S]) -> String {
    let mut key = format!("{{{prefix}}}");
    for part in parts {
        key.push(SEPARATOR);
        key.push_str(part.as_ref());
    }
    key
}

/// 64-bit FNV-1a. Stable across builds and platforms, unlike `DefaultHasher`.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Lower-case base-36 rendering of `value`.
pub fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::with_capacity(13);
    while value > 0 {
        digits.push(BASE36_DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    digits.into_iter().map(char::from).collect()
}

/// Canonical form of a request target.
///
/// Query parameters are grouped by name and emitted in name order, and each
/// parameter's values are sorted, so two requests that differ only in the
/// order of their query values share one canonical URL.
pub fn sorted_query_url(path: &str, query: Option<&str>) -> String {
    let Some(query) = query.filter(|query| !query.is_empty()) else {
        return path.to_string();
    };

    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }

    let mut encoded = form_urlencoded::Serializer::new(String::new());
    for (name, values) in &mut params {
        values.sort();
        for value in values.iter() {
            encoded.append_pair(name, value);
        }
    }

    format!("{path}?{}", encoded.finish())
}

/// Cache key for a request target: base-36 FNV-1a of its canonical URL.
pub fn request_fingerprint(path: &str, query: Option<&str>) -> String {
    to_base36(fnv1a_64(sorted_query_url(path, query).as_bytes()))
}
