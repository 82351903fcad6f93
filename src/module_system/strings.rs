//! C4 — interning of immutable byte strings (module paths, versions)
//! using FNV-1a hashing with open-chain buckets, rehashing at 0.75 load.
//!
//! Grounded on the teacher crate's `utils::string_interner::StringInterner`
//! (a `HashMap`-backed interner), generalized to the spec's explicit
//! bucket/load-factor scheme instead of delegating to `std`'s hasher.

use std::sync::{Arc, RwLock};

const INITIAL_BUCKETS: usize = 16;
const LOAD_FACTOR_NUM: usize = 3;
const LOAD_FACTOR_DEN: usize = 4;

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// A string interned once in the pool and referenced by a cheap shared
/// pointer thereafter.
#[derive(Clone)]
pub struct InternedString(Arc<str>);

impl InternedString {
    /// Borrows the interned content.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for InternedString {
    fn eq(&self, other: &Self) -> bool {
        // Pointer identity is sufficient for strings produced by the
        // same pool, but two pools could intern equal content as
        // distinct allocations, so fall back to content comparison.
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}
impl Eq for InternedString {}

impl std::hash::Hash for InternedString {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl std::fmt::Debug for InternedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl std::fmt::Display for InternedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::ops::Deref for InternedString {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

struct Inner {
    buckets: Vec<Vec<Arc<str>>>,
    len: usize,
}

/// An open-addressing (open-chaining) string pool.
///
/// Single-writer by convention: the loader thread that resolves a path
/// is the one that interns it. Readers of already-interned strings need
/// no lock, since [`InternedString`] clones are immutable `Arc<str>`.
pub struct StringPool {
    inner: RwLock<Inner>,
}

impl StringPool {
    /// Creates an empty pool with the default initial bucket count.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                buckets: (0..INITIAL_BUCKETS).map(|_| Vec::new()).collect(),
                len: 0,
            }),
        }
    }

    /// Interns `s`, returning a handle equal to any prior interning of
    /// the same content.
    pub fn intern(&self, s: &str) -> InternedString {
        {
            let inner = self.inner.read().expect("string pool poisoned");
            let idx = Self::bucket_index(s, inner.buckets.len());
            if let Some(existing) = inner.buckets[idx].iter().find(|c| c.as_ref() == s) {
                return InternedString(existing.clone());
            }
        }

        let mut inner = self.inner.write().expect("string pool poisoned");
        let idx = Self::bucket_index(s, inner.buckets.len());
        if let Some(existing) = inner.buckets[idx].iter().find(|c| c.as_ref() == s) {
            return InternedString(existing.clone());
        }

        let arc: Arc<str> = Arc::from(s);
        inner.buckets[idx].push(arc.clone());
        inner.len += 1;
        if inner.len * LOAD_FACTOR_DEN >= inner.buckets.len() * LOAD_FACTOR_NUM {
            Self::rehash(&mut inner);
        }
        InternedString(arc)
    }

    /// Number of distinct strings currently interned.
    pub fn len(&self) -> usize {
        self.inner.read().expect("string pool poisoned").len
    }

    /// True if nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bucket_index(s: &str, bucket_count: usize) -> usize {
        (fnv1a(s.as_bytes()) as usize) & (bucket_count - 1)
    }

    fn rehash(inner: &mut Inner) {
        let new_count = inner.buckets.len() * 2;
        let mut new_buckets: Vec<Vec<Arc<str>>> = (0..new_count).map(|_| Vec::new()).collect();
        for bucket in inner.buckets.drain(..) {
            for s in bucket {
                let idx = Self::bucket_index(&s, new_count);
                new_buckets[idx].push(s);
            }
        }
        inner.buckets = new_buckets;
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide string pool used for module paths and versions.
pub fn global_pool() -> &'static StringPool {
    static POOL: once_cell::sync::OnceCell<StringPool> = once_cell::sync::OnceCell::new();
    POOL.get_or_init(StringPool::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_content_returns_equal_handles() {
        let pool = StringPool::new();
        let a = pool.intern("hello");
        let b = pool.intern("hello");
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn rehash_preserves_all_entries() {
        let pool = StringPool::new();
        let mut handles = Vec::new();
        for i in 0..200 {
            handles.push(pool.intern(&format!("module-{i}")));
        }
        assert_eq!(pool.len(), 200);
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(h.as_str(), format!("module-{i}"));
        }
    }
}
