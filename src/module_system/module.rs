//! The module data model and state machine (spec §3 "Module").
//!
//! A module is cache-resident as `Arc<Module>` from the moment it is
//! first inserted as `Loading` (spec §4.5 step 3) — an importer may
//! observe and link against a module that hasn't finished initializing
//! yet, so every field that changes over a module's lifetime lives
//! behind [`Lock`] rather than being a plain struct field.

use crate::bytecode::Chunk;
use crate::module_system::format::ExportRecord;
use crate::module_system::module_id::ModulePath;
use crate::module_system::platform::{DynamicLibrary, Lock};
use crate::value::TaggedValue;
use indexmap::IndexMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A module's lifecycle state. Transitions are monotonic within one load:
/// `Unloaded -> Loading -> {Loaded, Error}`; a `Loaded` module re-enters
/// `Unloaded` only via [`crate::module_system::loader::ModuleLoader::unload`].
///
/// Modeled as an exhaustive tagged enum per the design notes, so an
/// unreachable state is a compile error rather than a runtime bug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Not yet resolved or loaded.
    Unloaded,
    /// Inserted into the cache, currently executing its chunk. A module
    /// in this state may already have partial exports visible to an
    /// importer that reached it through a circular dependency.
    Loading,
    /// Fully initialized; exports are stable.
    Loaded,
    /// Load or execution failed; acts as a cache tombstone.
    Error,
}

/// Export visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Visible only within the defining module's own scope.
    Private,
    /// Mirrored onto the module's exports-object, observable from script.
    Public,
}

/// One exported binding.
#[derive(Debug, Clone)]
pub struct ExportEntry {
    /// The exported name.
    pub name: String,
    /// The exported value.
    pub value: TaggedValue,
    /// Private or public.
    pub visibility: Visibility,
    /// Export kind as declared in the module format, when known.
    pub kind: Option<crate::module_system::format::ExportKind>,
    /// Declared type signature, when known.
    pub signature: Option<String>,
}

impl ExportEntry {
    /// Function-specific arity, parsed out of `signature`'s leading
    /// parameter list (`"(Int, Int)->Int"` -> `Some(2)`). `None` when no
    /// signature was recorded or the export isn't a function.
    pub fn arity(&self) -> Option<usize> {
        let sig = self.signature.as_ref()?;
        let open = sig.find('(')?;
        let close = sig[open..].find(')')? + open;
        let inner = sig[open + 1..close].trim();
        if inner.is_empty() {
            Some(0)
        } else {
            Some(inner.split(',').count())
        }
    }

    /// True if this export's value is a function (native or closure).
    pub fn is_callable(&self) -> bool {
        self.value.is_callable()
    }

    /// True if this export's value is a native function specifically.
    pub fn is_native(&self) -> bool {
        matches!(self.value, TaggedValue::Native(_))
    }
}

/// An open-addressing hash table (linear probing, power-of-two capacity,
/// 0.75 load factor) backing a module's local scope, per spec §4.7.
#[derive(Debug, Default)]
pub struct Scope {
    slots: Vec<Option<(String, TaggedValue, bool)>>,
    len: usize,
}

const SCOPE_INITIAL_CAPACITY: usize = 8;

impl Scope {
    /// Creates an empty scope.
    pub fn new() -> Self {
        Self {
            slots: vec![None; SCOPE_INITIAL_CAPACITY],
            len: 0,
        }
    }

    fn hash(name: &str) -> usize {
        use std::hash::{Hash, Hasher};
        let mut h = std::collections::hash_map::DefaultHasher::new();
        name.hash(&mut h);
        h.finish() as usize
    }

    fn probe_index(&self, name: &str) -> usize {
        let mask = self.slots.len() - 1;
        let mut idx = Self::hash(name) & mask;
        loop {
            match &self.slots[idx] {
                None => return idx,
                Some((existing, _, _)) if existing == name => return idx,
                Some(_) => idx = (idx + 1) & mask,
            }
        }
    }

    /// Inserts or updates a binding; `exported` marks it for mirroring
    /// onto the exports-object.
    pub fn set(&mut self, name: &str, value: TaggedValue, exported: bool) {
        if (self.len + 1) * 4 >= self.slots.len() * 3 {
            self.grow();
        }
        let idx = self.probe_index(name);
        if self.slots[idx].is_none() {
            self.len += 1;
        }
        self.slots[idx] = Some((name.to_string(), value, exported));
    }

    /// Looks up a binding by name.
    pub fn get(&self, name: &str) -> Option<&TaggedValue> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = self.probe_index(name);
        self.slots[idx].as_ref().map(|(_, v, _)| v)
    }

    /// True if `name` is bound in this scope.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True if `name` is bound and marked exported.
    pub fn is_exported(&self, name: &str) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        let idx = self.probe_index(name);
        matches!(&self.slots[idx], Some((_, _, true)))
    }

    /// Number of bindings currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no bindings are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn grow(&mut self) {
        let new_capacity = (self.slots.len() * 2).max(SCOPE_INITIAL_CAPACITY);
        let old = std::mem::replace(&mut self.slots, vec![None; new_capacity]);
        self.len = 0;
        for slot in old.into_iter().flatten() {
            let (name, value, exported) = slot;
            self.set(&name, value, exported);
        }
    }
}

/// An opaque handle to the GC-managed exports-object mirroring a
/// module's public exports. The module subsystem roots it from creation
/// until unload but never dereferences its contents directly.
pub type ExportsObjectHandle = crate::value::GcHandle;

/// Per-module timing/usage counters, surfaced through [`crate::module_system::inspect`].
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ModuleMetrics {
    /// Wall-clock nanoseconds spent reading + parsing the module format.
    pub load_nanos: u64,
    /// Wall-clock nanoseconds spent in [`crate::module_system::loader::Executor::execute`]
    /// plus init hooks.
    pub init_nanos: u64,
    /// Number of times this module was returned from a cache lookup.
    pub access_count: u64,
    /// Successful `get_export` calls.
    pub export_hits: u64,
    /// `get_export` calls for a name that wasn't bound.
    pub export_misses: u64,
}

/// Fields that change over a module's lifetime, behind one lock so a
/// cache-resident `Arc<Module>` can be mutated in place while an
/// importer reached through a cycle observes the same instance.
struct ModuleData {
    absolute_path: Option<PathBuf>,
    version: Option<String>,
    state: ModuleState,
    scope: Scope,
    exports: IndexMap<String, ExportEntry>,
    globals: Vec<(String, TaggedValue)>,
    exports_object: Option<ExportsObjectHandle>,
    native_handle: Option<Arc<DynamicLibrary>>,
    native_temp_path: Option<PathBuf>,
    pending_chunk: Option<Chunk>,
    pending_exports: Vec<ExportRecord>,
    owning_bundle: Option<ModulePath>,
    metrics: ModuleMetrics,
}

/// A loaded unit of compiled code.
pub struct Module {
    /// Canonical, interned path (the cache key).
    pub path: ModulePath,
    /// Reference count, mutex-guarded per spec §5.
    pub ref_count: Lock<i64>,
    /// Last-access Unix timestamp (seconds), used by the cache's LRU trim.
    pub last_access_time: Lock<u64>,
    data: Lock<ModuleData>,
}

impl Module {
    /// Creates a fresh, `Unloaded` module record for `path`.
    pub fn new(path: ModulePath) -> Self {
        Self {
            path,
            ref_count: Lock::new(0),
            last_access_time: Lock::new(now_secs()),
            data: Lock::new(ModuleData {
                absolute_path: None,
                version: None,
                state: ModuleState::Unloaded,
                scope: Scope::new(),
                exports: IndexMap::new(),
                globals: Vec::new(),
                exports_object: None,
                native_handle: None,
                native_temp_path: None,
                pending_chunk: None,
                pending_exports: Vec::new(),
                owning_bundle: None,
                metrics: ModuleMetrics::default(),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        self.data.lock().state
    }

    /// Sets the lifecycle state.
    pub fn set_state(&self, state: ModuleState) {
        self.data.lock().state = state;
    }

    /// Absolute on-disk path, if any.
    pub fn absolute_path(&self) -> Option<PathBuf> {
        self.data.lock().absolute_path.clone()
    }

    /// Records the absolute on-disk path.
    pub fn set_absolute_path(&self, path: PathBuf) {
        self.data.lock().absolute_path = Some(path);
    }

    /// Declared version string, if any.
    pub fn version(&self) -> Option<String> {
        self.data.lock().version.clone()
    }

    /// Records the declared version string.
    pub fn set_version(&self, version: Option<String>) {
        self.data.lock().version = version;
    }

    /// The bundle this module was loaded from, if any.
    pub fn owning_bundle(&self) -> Option<ModulePath> {
        self.data.lock().owning_bundle.clone()
    }

    /// Records the owning bundle's canonical path.
    pub fn set_owning_bundle(&self, bundle: ModulePath) {
        self.data.lock().owning_bundle = Some(bundle);
    }

    /// The loaded native library backing this module, if any.
    pub fn native_handle(&self) -> Option<Arc<DynamicLibrary>> {
        self.data.lock().native_handle.clone()
    }

    /// Records a loaded native library handle.
    pub fn set_native_handle(&self, handle: Arc<DynamicLibrary>) {
        self.data.lock().native_handle = Some(handle);
    }

    /// Path to a temp-extracted native library, cleaned up on unload.
    pub fn native_temp_path(&self) -> Option<PathBuf> {
        self.data.lock().native_temp_path.clone()
    }

    /// Records a temp-extracted native library path.
    pub fn set_native_temp_path(&self, path: PathBuf) {
        self.data.lock().native_temp_path = Some(path);
    }

    /// Parks a chunk for lazy execution (spec §4.5, §9).
    pub fn set_pending_chunk(&self, chunk: Chunk) {
        self.data.lock().pending_chunk = Some(chunk);
    }

    /// True if a chunk is parked awaiting lazy execution.
    pub fn has_pending_chunk(&self) -> bool {
        self.data.lock().pending_chunk.is_some()
    }

    /// Takes the parked chunk, if any, leaving none behind. Used by
    /// `ensure_initialized` so a chunk is executed at most once even
    /// under concurrent first-use.
    pub fn take_pending_chunk(&self) -> Option<Chunk> {
        self.data.lock().pending_chunk.take()
    }

    /// Records the export table belonging to a parked chunk, consumed
    /// together with it by `take_pending_exports`.
    pub fn set_pending_exports(&self, exports: Vec<ExportRecord>) {
        self.data.lock().pending_exports = exports;
    }

    /// Takes the parked export table, leaving an empty one behind.
    pub fn take_pending_exports(&self) -> Vec<ExportRecord> {
        std::mem::take(&mut self.data.lock().pending_exports)
    }

    /// The GC-owned exports-object, if one has been created.
    pub fn exports_object(&self) -> Option<ExportsObjectHandle> {
        self.data.lock().exports_object
    }

    /// Records the GC-owned exports-object handle.
    pub fn set_exports_object(&self, handle: ExportsObjectHandle) {
        self.data.lock().exports_object = Some(handle);
    }

    /// Appends a module-level global.
    pub fn push_global(&self, name: String, value: TaggedValue) {
        self.data.lock().globals.push((name, value));
    }

    /// A snapshot of module-level globals.
    pub fn globals_snapshot(&self) -> Vec<(String, TaggedValue)> {
        self.data.lock().globals.clone()
    }

    /// Binds `name` in local scope; `exported` marks it for mirroring.
    pub fn scope_set(&self, name: &str, value: TaggedValue, exported: bool) {
        self.data.lock().scope.set(name, value, exported);
    }

    /// Looks up a local-scope binding by name.
    pub fn scope_get(&self, name: &str) -> Option<TaggedValue> {
        self.data.lock().scope.get(name).cloned()
    }

    /// True if `name` is bound in local scope.
    pub fn scope_has(&self, name: &str) -> bool {
        self.data.lock().scope.has(name)
    }

    /// Upserts an export by name (spec §4.7 `export`). Re-exporting an
    /// existing name updates its value/visibility in place, without
    /// moving it to the end of iteration order.
    pub fn export(&self, name: &str, value: TaggedValue, visibility: Visibility) {
        self.export_full(name, value, visibility, None, None);
    }

    /// Upserts an export with format-level kind/signature metadata
    /// attached, for introspection (spec §4.9).
    pub fn export_full(
        &self,
        name: &str,
        value: TaggedValue,
        visibility: Visibility,
        kind: Option<crate::module_system::format::ExportKind>,
        signature: Option<String>,
    ) {
        let mut data = self.data.lock();
        match data.exports.get_mut(name) {
            Some(entry) => {
                entry.value = value;
                entry.visibility = visibility;
                if kind.is_some() {
                    entry.kind = kind;
                }
                if signature.is_some() {
                    entry.signature = signature;
                }
            }
            None => {
                data.exports.insert(
                    name.to_string(),
                    ExportEntry {
                        name: name.to_string(),
                        value,
                        visibility,
                        kind,
                        signature,
                    },
                );
            }
        }
    }

    /// Finds an export by name, counting the lookup toward this
    /// module's hit/miss metrics.
    pub fn get_export(&self, name: &str) -> Option<ExportEntry> {
        let mut data = self.data.lock();
        let found = data.exports.get(name).cloned();
        if found.is_some() {
            data.metrics.export_hits += 1;
        } else {
            data.metrics.export_misses += 1;
        }
        found
    }

    /// Every currently exported name, in declaration order.
    pub fn export_names(&self) -> Vec<String> {
        self.data.lock().exports.keys().cloned().collect()
    }

    /// A snapshot of every export currently recorded, in declaration order.
    pub fn exports_snapshot(&self) -> Vec<ExportEntry> {
        self.data.lock().exports.values().cloned().collect()
    }

    /// Number of exports currently recorded.
    pub fn export_count(&self) -> usize {
        self.data.lock().exports.len()
    }

    /// Current reference count.
    pub fn ref_count(&self) -> i64 {
        *self.ref_count.lock()
    }

    /// Increments the reference count.
    pub fn retain(&self) {
        *self.ref_count.lock() += 1;
    }

    /// Decrements the reference count. Never goes below zero.
    pub fn release(&self) {
        let mut guard = self.ref_count.lock();
        if *guard > 0 {
            *guard -= 1;
        }
    }

    /// Updates the last-access timestamp to now and bumps the access counter.
    pub fn touch(&self) {
        *self.last_access_time.lock() = now_secs();
        self.data.lock().metrics.access_count += 1;
    }

    /// A copy of this module's current timing/usage metrics.
    pub fn metrics(&self) -> ModuleMetrics {
        self.data.lock().metrics
    }

    /// Adds to the load-phase timing counter.
    pub fn add_load_nanos(&self, nanos: u64) {
        self.data.lock().metrics.load_nanos += nanos;
    }

    /// Adds to the init-phase timing counter.
    pub fn add_init_nanos(&self, nanos: u64) {
        self.data.lock().metrics.init_nanos += nanos;
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.lock();
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("state", &data.state)
            .field("exports", &data.exports.len())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_set_get_roundtrip() {
        let mut scope = Scope::new();
        scope.set("a", TaggedValue::Number(1.0), true);
        scope.set("b", TaggedValue::Number(2.0), false);
        assert!(scope.has("a"));
        assert!(scope.is_exported("a"));
        assert!(!scope.is_exported("b"));
        assert!(!scope.has("c"));
    }

    #[test]
    fn scope_grows_and_keeps_all_entries() {
        let mut scope = Scope::new();
        for i in 0..100 {
            scope.set(&format!("sym{i}"), TaggedValue::Number(i as f64), i % 2 == 0);
        }
        assert_eq!(scope.len(), 100);
        for i in 0..100 {
            assert!(scope.has(&format!("sym{i}")));
            assert_eq!(scope.is_exported(&format!("sym{i}")), i % 2 == 0);
        }
    }

    #[test]
    fn export_upsert_preserves_order() {
        let m = Module::new(ModulePath::new("@test-order"));
        m.export("b", TaggedValue::Nil, Visibility::Public);
        m.export("a", TaggedValue::Nil, Visibility::Public);
        m.export("b", TaggedValue::Number(1.0), Visibility::Public);
        assert_eq!(m.export_names(), vec!["b", "a"]);
    }

    #[test]
    fn ref_count_never_negative() {
        let m = Module::new(ModulePath::new("@test-refcount"));
        m.release();
        assert_eq!(m.ref_count(), 0);
        m.retain();
        m.retain();
        m.release();
        assert_eq!(m.ref_count(), 1);
    }

    #[test]
    fn export_arity_parses_parameter_count() {
        let m = Module::new(ModulePath::new("@test-arity"));
        m.export_full(
            "add",
            TaggedValue::Function(crate::value::GcHandle(0)),
            Visibility::Public,
            Some(crate::module_system::format::ExportKind::Function),
            Some("(Int, Int)->Int".to_string()),
        );
        assert_eq!(m.get_export("add").unwrap().arity(), Some(2));
    }

    #[test]
    fn pending_chunk_is_taken_at_most_once() {
        let m = Module::new(ModulePath::new("@test-pending"));
        m.set_pending_chunk(Chunk::empty());
        assert!(m.take_pending_chunk().is_some());
        assert!(m.take_pending_chunk().is_none());
    }
}
