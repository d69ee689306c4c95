//! Stable 64-bit hashes and resource paths.

use std::fmt;

use bytemuck::{Pod, Zeroable};
use xxhash_rust::xxh3::xxh3_64;

/// A hash that stays identical across runs and platforms, so it can be
/// persisted in serialized data (bone names, event types, resource paths).
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Pod, Zeroable)]
pub struct StableHash(pub u64);

impl StableHash {
    #[inline]
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(xxh3_64(bytes))
    }

    #[inline]
    #[must_use]
    pub fn of_str(value: &str) -> Self {
        Self::of_bytes(value.as_bytes())
    }

    /// The low 32 bits, used where the format stores a 32-bit tag.
    #[inline]
    #[must_use]
    pub const fn low_u32(self) -> u32 {
        self.0 as u32
    }
}

/// Normalized resource path with a precomputed hash.
///
/// Backslashes become forward slashes, repeated separators collapse and a
/// leading `./` is dropped, so `"Anims\\Walk.ani"` and `"./anims//Walk.ani"`
/// name the same resource. Case is preserved.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Path {
    path: String,
    hash: StableHash,
}

impl Path {
    #[must_use]
    pub fn new(path: &str) -> Self {
        let mut normalized = String::with_capacity(path.len());
        let mut last_was_separator = false;
        let trimmed = path.strip_prefix("./").or_else(|| path.strip_prefix(".\\")).unwrap_or(path);
        for c in trimmed.chars() {
            let c = if c == '\\' { '/' } else { c };
            if c == '/' {
                if last_was_separator {
                    continue;
                }
                last_was_separator = true;
            } else {
                last_was_separator = false;
            }
            normalized.push(c);
        }
        let hash = StableHash::of_str(&normalized);
        Self {
            path: normalized,
            hash,
        }
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.path
    }

    #[inline]
    #[must_use]
    pub fn hash(&self) -> StableHash {
        self.hash
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}
