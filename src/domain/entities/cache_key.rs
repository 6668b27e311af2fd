//! Deterministic cache key composition.
//!
//! A cache key is the source path followed by the ordered transformation
//! keys, joined with `;`. Identical request shape yields an identical key;
//! reordering transformations yields a different key.

/// Separator between the path and each transformation key.
pub(crate) const KEY_SEPARATOR: char = ';';

/// Composes a cache key from a path and ordered transformation keys.
///
/// Returns `None` when the path is empty, signalling "nothing to key".
#[must_use]
pub fn compose_key(path: &str, transformation_keys: &[String]) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    if transformation_keys.is_empty() {
        return Some(path.to_string());
    }
    let mut key = String::with_capacity(
        path.len() + transformation_keys.iter().map(|k| k.len() + 1).sum::<usize>(),
    );
    key.push_str(path);
    for tkey in transformation_keys {
        key.push(KEY_SEPARATOR);
        key.push_str(tkey);
    }
    Some(key)
}

/// Returns the base key: the path portion without any transformation suffix.
///
/// Used to invalidate all transformed variants of one source at once.
#[must_use]
pub fn base_key(key: &str) -> &str {
    key.split(KEY_SEPARATOR).next().unwrap_or(key)
}

/// Returns true if `key` identifies `base` itself or a transformed variant
/// of it.
#[must_use]
pub fn is_variant_of(key: &str, base: &str) -> bool {
    key == base || (key.len() > base.len() && key.as_bytes()[base.len()] == KEY_SEPARATOR as u8 && key.starts_with(base))
}
