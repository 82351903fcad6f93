//! C3 — a tagged allocator registry.
//!
//! The original design routes allocations for different subsystems
//! through distinct arena/pool allocators so that e.g. freeing a module
//! can bulk-free its AST without walking it. Rust's global allocator
//! already gives per-value bulk-drop for free via ownership, so this
//! registry keeps the *addressing scheme* (a tag identifying which
//! subsystem a block of memory belongs to) for accounting and metrics
//! without reimplementing a custom arena on top of the system allocator.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Subsystems that track their own allocation volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocTag {
    /// Module records, scope tables, export arrays.
    Modules,
    /// The interned string pool.
    Strings,
    /// Bytecode chunks (constants + code).
    Bytecode,
    /// AST nodes produced by the parser collaborator.
    Ast,
}

const TAG_COUNT: usize = 4;

fn tag_index(tag: AllocTag) -> usize {
    match tag {
        AllocTag::Modules => 0,
        AllocTag::Strings => 1,
        AllocTag::Bytecode => 2,
        AllocTag::Ast => 3,
    }
}

/// Per-tag byte counters. One process-wide instance is exposed via
/// [`registry`].
#[derive(Debug, Default)]
pub struct AllocatorRegistry {
    counters: [AtomicUsize; TAG_COUNT],
}

impl AllocatorRegistry {
    /// Creates a fresh, zeroed registry. Tests construct their own
    /// isolated instance instead of using the process-wide singleton.
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
        }
    }

    /// Records `bytes` allocated under `tag`.
    pub fn record_alloc(&self, tag: AllocTag, bytes: usize) {
        self.counters[tag_index(tag)].fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records `bytes` freed under `tag`.
    pub fn record_free(&self, tag: AllocTag, bytes: usize) {
        self.counters[tag_index(tag)].fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Current outstanding byte count for `tag`.
    pub fn outstanding(&self, tag: AllocTag) -> usize {
        self.counters[tag_index(tag)].load(Ordering::Relaxed)
    }
}

/// The process-wide allocator registry, initialized lazily.
pub fn registry() -> &'static AllocatorRegistry {
    static REGISTRY: once_cell::sync::OnceCell<AllocatorRegistry> = once_cell::sync::OnceCell::new();
    REGISTRY.get_or_init(AllocatorRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_per_tag_outstanding_bytes() {
        let reg = AllocatorRegistry::new();
        reg.record_alloc(AllocTag::Strings, 100);
        reg.record_alloc(AllocTag::Modules, 40);
        reg.record_free(AllocTag::Strings, 30);
        assert_eq!(reg.outstanding(AllocTag::Strings), 70);
        assert_eq!(reg.outstanding(AllocTag::Modules), 40);
        assert_eq!(reg.outstanding(AllocTag::Bytecode), 0);
    }
}
