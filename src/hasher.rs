//! Pluggable key hashing.
//!
//! A table hashes raw key bytes through a [`KeyHasher`] chosen when the table
//! is built. The hasher must be deterministic: the table re-hashes stored
//! keys to recover their probe distance, so a key must always map to the same
//! digest.

#[cfg(feature = "foldhash")]
use core::hash::BuildHasher;
#[cfg(any(feature = "std", feature = "foldhash"))]
use core::hash::Hasher;

/// Maps a key's bytes to a 64-bit digest.
///
/// Any `Fn(&[u8]) -> u64` closure or function is a `KeyHasher`:
///
/// ```rust
/// use rhh_funnel::KeyHasher;
///
/// let hasher = |key: &[u8]| key.iter().fold(0u64, |h, &b| h.rotate_left(5) ^ u64::from(b));
/// assert_eq!(hasher.hash_key(b"a"), hasher.hash_key(b"a"));
/// ```
pub trait KeyHasher {
    /// Hashes `key`.
    fn hash_key(&self, key: &[u8]) -> u64;
}

impl<F> KeyHasher for F
where
    F: Fn(&[u8]) -> u64,
{
    #[inline(always)]
    fn hash_key(&self, key: &[u8]) -> u64 {
        self(key)
    }
}

/// Seed used by [`FoldKeyHasher::default`].
#[cfg(feature = "foldhash")]
pub const DEFAULT_SEED: u64 = 421_439_783;

/// Fixed-seed [foldhash](https://docs.rs/foldhash) hasher.
#[cfg(feature = "foldhash")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldKeyHasher {
    seed: u64,
}

#[cfg(feature = "foldhash")]
impl FoldKeyHasher {
    /// Creates a hasher with the given seed.
    pub const fn with_seed(seed: u64) -> Self {
        Self { seed }
    }
}

#[cfg(feature = "foldhash")]
impl Default for FoldKeyHasher {
    fn default() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }
}

#[cfg(feature = "foldhash")]
impl KeyHasher for FoldKeyHasher {
    #[inline]
    fn hash_key(&self, key: &[u8]) -> u64 {
        let mut hasher = foldhash::fast::FixedState::with_seed(self.seed).build_hasher();
        hasher.write(key);
        hasher.finish()
    }
}

/// Hasher backed by the standard library's `DefaultHasher`, which is
/// deterministic for a given build.
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StdKeyHasher;

#[cfg(feature = "std")]
impl KeyHasher for StdKeyHasher {
    #[inline]
    fn hash_key(&self, key: &[u8]) -> u64 {
        let mut hasher = std::hash::DefaultHasher::new();
        hasher.write(key);
        hasher.finish()
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Hasher used by [`RobinHoodTable::new`](crate::RobinHoodTable::new).
        pub type DefaultKeyHasher = FoldKeyHasher;
    } else if #[cfg(feature = "std")] {
        /// Hasher used by [`RobinHoodTable::new`](crate::RobinHoodTable::new).
        pub type DefaultKeyHasher = StdKeyHasher;
    }
}
