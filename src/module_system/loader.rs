//! C9b — the loader: ties resolution, the format reader, the cache, and
//! hooks together into `load`/`unload` (spec §3 "Loader", §4.3-§4.6).
//!
//! Compiling and executing a module's top-level code is out of scope
//! for this crate (the compiler and VM are external collaborators); the
//! loader reaches them only through the [`Executor`] seam, which a host
//! runtime implements and hands in when constructing a [`ModuleLoader`].
//!
//! A module is inserted into the cache as `Loading` *before* its
//! imports are resolved (spec §4.5 step 3). An importer that reaches
//! the same module again while it's still `Loading` — a circular
//! import — gets back that partial, cache-resident record instead of
//! an error: each module's own exports come from its own format reader
//! regardless of whether its imports resolved, so both sides of a
//! cycle finish loading and export what they declare.

use crate::bytecode::Chunk;
use crate::config::RuntimeConfig;
use crate::module_system::archive::Archive;
use crate::module_system::bundle::Bundle;
use crate::module_system::builtins;
use crate::module_system::cache::ModuleCache;
use crate::module_system::error::{ModuleError, Result};
use crate::module_system::format::{ExportRecord, ImportRecord, ModuleReader, ModuleWriter, NativeBinding};
use crate::module_system::hooks::HookRegistry;
#[cfg_attr(not(test), allow(unused_imports))]
use crate::module_system::module::{Module, ModuleState, Visibility};
use crate::module_system::module_id::ModulePath;
use crate::module_system::package::PackageManifest;
use crate::module_system::platform::DynamicLibrary;
use crate::module_system::resolver::{detect_cycle, resolve, ResolvedLocation, Resolution, ResolverConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Source compiled by the host's compiler collaborator, ready to be
/// wrapped in a container and cached to disk (spec §4.5 "Source").
pub struct CompiledSource {
    /// The compiled top-level chunk.
    pub chunk: Chunk,
    /// Exports this module declares.
    pub exports: Vec<ExportRecord>,
    /// Modules/names this module imports.
    pub imports: Vec<ImportRecord>,
}

/// The seam through which a host VM executes a module's top-level
/// chunk and reports back its live exports.
///
/// The module subsystem never constructs [`crate::value::TaggedValue`]
/// object variants itself (it has no GC); an `Executor` is the only
/// thing allowed to call [`Module::export`] with a populated value.
pub trait Executor: Send + Sync {
    /// Runs `chunk`'s top-level code against `module`, registering
    /// exports for each entry in `export_specs` via `module.export`.
    /// `module` is cache-resident and interior-mutable; the executor
    /// never needs unique access to it.
    fn execute(&self, module: &Module, chunk: &Chunk, export_specs: &[ExportRecord]) -> Result<()>;

    /// Parses and compiles a `.vsp` source file's text (spec §4.5
    /// "Source"). Only called on a disk-cache miss; hosts that never
    /// load source modules can ignore this and rely on the default.
    fn compile_source(&self, _source: &str) -> Result<CompiledSource> {
        Err(ModuleError::CompileError(
            "this executor does not support compiling source modules".into(),
        ))
    }

    /// Invokes an already-exported callable value with `args` (spec §4.2
    /// "Bundle execute"). The default handles native functions directly
    /// and rejects anything a VM would need to interpret; a host with a
    /// real VM overrides this to also drive closures.
    fn call(&self, _module: &Module, value: &crate::value::TaggedValue, args: &[crate::value::TaggedValue]) -> Result<crate::value::TaggedValue> {
        match value {
            crate::value::TaggedValue::Native(f) => f.call(args).map_err(ModuleError::LoadExecutionFailed),
            other => Err(ModuleError::LoadExecutionFailed(format!(
                "executor does not support invoking a {} value",
                other.kind_name()
            ))),
        }
    }
}

const DEFAULT_CACHE_CAPACITY: usize = 256;
const NATIVE_INIT_SYMBOL: &str = "vesper_module_init";

/// Orchestrates module resolution, loading, linking, and unloading.
pub struct ModuleLoader<E: Executor> {
    cache: ModuleCache,
    hooks: HookRegistry,
    config: ResolverConfig,
    runtime: RuntimeConfig,
    executor: E,
}

impl<E: Executor> ModuleLoader<E> {
    /// Creates a loader with the given resolver configuration and
    /// executor, pre-seeded with the bootstrap `__builtins__` module.
    pub fn new(config: ResolverConfig, executor: E) -> Self {
        Self::with_runtime_config(config, RuntimeConfig::default(), executor, DEFAULT_CACHE_CAPACITY)
    }

    /// Like [`ModuleLoader::new`] but with an explicit cache capacity,
    /// for hosts that want to bound resident module count tighter than
    /// the default (or, in tests, to force LRU trimming deterministically).
    pub fn with_cache_capacity(config: ResolverConfig, executor: E, capacity: usize) -> Self {
        Self::with_runtime_config(config, RuntimeConfig::default(), executor, capacity)
    }

    /// Like [`ModuleLoader::new`] but also takes an explicit
    /// [`RuntimeConfig`], needed for the Source-module disk cache
    /// directory and `VESPER_LAZY_MODULES` (spec §4.5, §9).
    pub fn with_runtime_config(
        config: ResolverConfig,
        runtime: RuntimeConfig,
        executor: E,
        capacity: usize,
    ) -> Self {
        let loader = Self {
            cache: ModuleCache::new(capacity),
            hooks: HookRegistry::new(),
            config,
            runtime,
            executor,
        };
        loader.cache.insert(Arc::new(builtins::bootstrap_module()));
        loader
    }

    /// Access to the hook registry, for host-side registration.
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Access to the underlying cache, for introspection.
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Invokes `value` (typically a module export) through the executor,
    /// for callers that only hold a `TaggedValue` and not a live VM frame
    /// (spec §4.2 "Bundle execute").
    pub fn call(&self, module: &Module, value: &crate::value::TaggedValue, args: &[crate::value::TaggedValue]) -> Result<crate::value::TaggedValue> {
        self.executor.call(module, value, args)
    }

    /// Resolves and loads `spec`, recursively loading its declared
    /// imports. Returns the cached module, retained for the caller.
    pub fn load(&self, spec: &str) -> Result<Arc<Module>> {
        let mut chain = Vec::new();
        self.load_internal(spec, None, &mut chain)
    }

    /// Executes a lazily-parked module's chunk on first use (spec §4.5
    /// "lazy"). A no-op if `path` isn't cached, isn't parked, or has
    /// already been initialized by a concurrent caller — at most one
    /// caller ever observes `take_pending_chunk` return `Some`.
    pub fn ensure_initialized(&self, path: &ModulePath) -> Result<Arc<Module>> {
        let module = self
            .cache
            .get(path)
            .ok_or_else(|| ModuleError::ModuleNotFound(path.clone()))?;

        if let Some(chunk) = module.take_pending_chunk() {
            let specs = module.take_pending_exports();
            self.hooks.run_on_first_use(&module);
            module.set_state(ModuleState::Loading);
            if let Err(e) = self.finalize_execution(&module, &chunk, &specs) {
                module.set_state(ModuleState::Error);
                self.hooks.run_on_error(&module, &e);
                return Err(e);
            }
        }
        Ok(module)
    }

    fn load_internal(
        &self,
        spec: &str,
        importing_dir: Option<&Path>,
        chain: &mut Vec<ModulePath>,
    ) -> Result<Arc<Module>> {
        let resolution = resolve(spec, &self.config, importing_dir)?;

        if let Some(cached) = self.cache.get(&resolution.path) {
            if cached.state() == ModuleState::Error {
                return Err(ModuleError::LoadExecutionFailed(format!(
                    "{} previously failed to load",
                    resolution.path
                )));
            }
            if cached.state() == ModuleState::Loading {
                if let Some(cycle) = detect_cycle(chain, &resolution.path) {
                    log::debug!("circular import detected: {cycle:?}");
                }
            }
            cached.retain();
            return Ok(cached);
        }

        self.hooks.run_on_load_start(&resolution.path);

        // Eager-insert as `Loading` before imports are resolved, so a
        // cycle back to this module sees the partial record above
        // instead of recursing forever.
        let module = Arc::new(Module::new(resolution.path.clone()));
        module.set_state(ModuleState::Loading);
        self.cache.insert(module.clone());

        chain.push(resolution.path.clone());
        let result = self.populate(&module, &resolution, chain);
        chain.pop();

        match result {
            Ok(()) => {
                module.retain();
                Ok(module)
            }
            Err(e) => Err(e),
        }
    }

    /// Fills in an already cache-resident, `Loading` module from its
    /// resolved location. On any failure the module is left in the
    /// cache as an `Error` tombstone, with `on_error` fired, rather
    /// than removed — a repeat `load` of the same spec reports the
    /// same failure instead of retrying indefinitely.
    fn populate(&self, module: &Arc<Module>, resolution: &Resolution, chain: &mut Vec<ModulePath>) -> Result<()> {
        let result = self.populate_inner(module, resolution, chain);
        if let Err(e) = &result {
            module.set_state(ModuleState::Error);
            self.hooks.run_on_error(module, e);
        }
        result
    }

    fn populate_inner(&self, module: &Arc<Module>, resolution: &Resolution, chain: &mut Vec<ModulePath>) -> Result<()> {
        match &resolution.location {
            ResolvedLocation::Bootstrap => {
                // Bootstrap is seeded directly at construction time and
                // never reaches `load_internal`'s not-yet-cached branch,
                // except if a host explicitly removed and re-requested
                // it; rebuild it in place.
                let fresh = builtins::bootstrap_module();
                module.set_version(fresh.version());
                for entry in fresh.exports_snapshot() {
                    module.export_full(&entry.name, entry.value, entry.visibility, entry.kind, entry.signature);
                }
                module.set_state(ModuleState::Loaded);
                Ok(())
            }
            ResolvedLocation::File(path) => {
                module.set_absolute_path(path.to_path_buf());
                let bytes = std::fs::read(path)?;
                let reader = ModuleReader::parse(&bytes)?;
                self.link_and_run(module, &reader, path.parent(), chain, self.runtime.lazy_modules)
            }
            ResolvedLocation::Source(path) => self.load_source(module, path, chain, self.runtime.lazy_modules),
            ResolvedLocation::Directory(dir) => self.load_directory(module, dir, chain),
            ResolvedLocation::Native(name) => {
                let lib = self.load_native_module(name)?;
                module.set_native_handle(lib);
                module.set_state(ModuleState::Loaded);
                Ok(())
            }
            ResolvedLocation::Archive { container, module_path } => {
                let bytes = read_from_container(container, module_path)?;
                let reader = ModuleReader::parse(&bytes)?;
                self.link_and_run(module, &reader, None, chain, self.runtime.lazy_modules)
            }
        }
    }

    /// Binds imports, loads any native bindings, then either executes
    /// the chunk immediately or parks it for lazy first-use.
    fn link_and_run(
        &self,
        module: &Arc<Module>,
        reader: &ModuleReader,
        source_dir: Option<&Path>,
        chain: &mut Vec<ModulePath>,
        lazy: bool,
    ) -> Result<()> {
        module.set_version(reader.version().map(|v| v.to_string()));

        for import in reader.imports() {
            let imported = self.load_internal(&import.module, source_dir, chain)?;
            let local_name = import.alias.as_deref().unwrap_or(import.name.as_str());
            match imported.get_export(&import.name) {
                Some(entry) => module.scope_set(local_name, entry.value, false),
                None if imported.state() == ModuleState::Loading => {
                    // A circular-partial encounter: the imported module
                    // hasn't executed yet and can't have this export
                    // bound. Left unbound for this load; script code
                    // that needs it before the cycle resolves is a
                    // program bug, not a loader error.
                }
                None => {
                    return Err(ModuleError::ModuleNotFound(ModulePath::new(&format!(
                        "{}::{}",
                        import.module, import.name
                    ))));
                }
            }
        }

        if !reader.natives().is_empty() {
            load_native_bindings(module, reader.natives())?;
        }

        let chunk = Chunk::deserialize(reader.get_bytecode())?;
        let export_specs: Vec<ExportRecord> = (0..reader.export_count())
            .filter_map(|i| reader.get_export(i).cloned())
            .collect();

        if lazy {
            module.set_pending_chunk(chunk);
            module.set_pending_exports(export_specs);
            module.set_state(ModuleState::Unloaded);
            Ok(())
        } else {
            self.finalize_execution(module, &chunk, &export_specs)
        }
    }

    fn finalize_execution(&self, module: &Module, chunk: &Chunk, export_specs: &[ExportRecord]) -> Result<()> {
        self.executor
            .execute(module, chunk, export_specs)
            .and_then(|_| self.hooks.run_on_init(module))?;
        module.set_state(ModuleState::Loaded);
        Ok(())
    }

    /// Loads a `.vsp` source module (spec §4.5 "Source"): on a disk-cache
    /// hit (`<cache_dir>/<name>-<mtime>.vbc` exists) skips straight to
    /// parsing the cached container; otherwise compiles via the
    /// executor and writes the container before continuing.
    fn load_source(&self, module: &Arc<Module>, path: &Path, chain: &mut Vec<ModulePath>, lazy: bool) -> Result<()> {
        module.set_absolute_path(path.to_path_buf());
        let mtime = file_mtime_secs(path)?;
        let name = module.path.as_str().trim_start_matches('@');
        let cache_path = self.runtime.cache_dir.join(format!("{name}-{mtime}.vbc"));

        let container_bytes = if cache_path.is_file() {
            std::fs::read(&cache_path)?
        } else {
            let source = std::fs::read_to_string(path)?;
            let compiled = self.executor.compile_source(&source)?;
            let mut writer = ModuleWriter::new();
            writer.add_metadata(name, "0.0.0");
            for export in &compiled.exports {
                writer.add_export(&export.name, export.kind, export.bytecode_offset, &export.signature);
            }
            for import in &compiled.imports {
                writer.add_import(&import.module, &import.name, import.alias.as_deref());
            }
            writer.add_bytecode(&compiled.chunk.serialize());
            let bytes = writer.finalize();
            if self.runtime.ensure_cache_dir().is_ok() {
                let _ = std::fs::write(&cache_path, &bytes);
            }
            bytes
        };

        let reader = ModuleReader::parse(&container_bytes)?;
        self.link_and_run(module, &reader, path.parent(), chain, lazy)
    }

    /// Loads a `module.json`-carrying directory (spec §4.4 directory
    /// form): a native package dlopens its library directly, otherwise
    /// its declared `main` entry (or `<name>.vbc` by default) is loaded
    /// like any other bytecode/source file, honoring the manifest's
    /// own `lazy` flag as well as the runtime-wide one.
    fn load_directory(&self, module: &Arc<Module>, dir: &Path, chain: &mut Vec<ModulePath>) -> Result<()> {
        let manifest = PackageManifest::load_from_dir(dir)?;
        module.set_version(Some(manifest.version.clone()));

        if let Some(native) = &manifest.native {
            let library_path = dir.join(&native.library);
            let lib = dlopen_and_init(&library_path, &native.init_symbol)?;
            module.set_native_handle(lib);
            module.set_state(ModuleState::Loaded);
            return Ok(());
        }

        let lazy = manifest.lazy || self.runtime.lazy_modules;
        let main_rel = manifest.main.clone().unwrap_or_else(|| format!("{}.vbc", manifest.name));
        let main_path = dir.join(&main_rel);

        if main_path.extension().map(|e| e == "vsp").unwrap_or(false) {
            self.load_source(module, &main_path, chain, lazy)
        } else {
            module.set_absolute_path(main_path.clone());
            let bytes = std::fs::read(&main_path)?;
            let reader = ModuleReader::parse(&bytes)?;
            self.link_and_run(module, &reader, main_path.parent(), chain, lazy)
        }
    }

    /// Resolves and dlopens a `$`-prefixed native module spec (spec
    /// §4.4 step 3): searched as `<dir>/native/<name>.<ext>` under the
    /// application root, then each system search path, then that same
    /// path directly under the search directory.
    fn load_native_module(&self, name: &str) -> Result<Arc<DynamicLibrary>> {
        let ext = native_extension();
        let mut candidates = Vec::new();
        if let Some(root) = &self.config.application_root {
            candidates.push(root.join("native").join(format!("{name}.{ext}")));
        }
        for dir in &self.config.system_search_paths {
            candidates.push(dir.join("native").join(format!("{name}.{ext}")));
            candidates.push(dir.join(format!("{name}.{ext}")));
        }
        let library_path = candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| ModuleError::ModuleNotFound(ModulePath::new(&format!("${name}"))))?;
        dlopen_and_init(&library_path, NATIVE_INIT_SYMBOL)
    }

    /// Decrements `path`'s reference count without removing it from the
    /// cache. Pairs with the implicit retain each `load` performs.
    pub fn release(&self, path: &ModulePath) {
        if let Some(module) = self.cache.get(path) {
            module.release();
        }
    }

    /// Unloads `path`. Fails with [`ModuleError::Busy`] if its reference
    /// count is nonzero and `force` is false.
    pub fn unload(&self, path: &ModulePath, force: bool) -> Result<()> {
        let module = self
            .cache
            .get(path)
            .ok_or_else(|| ModuleError::ModuleNotFound(path.clone()))?;

        if !force && module.ref_count() > 0 {
            return Err(ModuleError::Busy(path.clone()));
        }

        self.hooks.run_on_unload(&module);

        if let Some(temp_path) = module.native_temp_path() {
            let _ = std::fs::remove_file(temp_path);
        }

        self.cache.remove(path);
        Ok(())
    }
}

fn file_mtime_secs(path: &Path) -> Result<u64> {
    let metadata = std::fs::metadata(path)?;
    let modified = metadata.modified()?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0))
}

fn read_from_container(container: &Path, module_path: &str) -> Result<Vec<u8>> {
    if let Ok(bundle) = Bundle::open_file(container) {
        if let Some(bytes) = bundle.archive().get_module_bytes(module_path) {
            return Ok(bytes.to_vec());
        }
    }
    let archive = Archive::open_file(container)?;
    archive
        .get_module_bytes(module_path)
        .map(|b| b.to_vec())
        .ok_or_else(|| ModuleError::ModuleNotFound(ModulePath::new(module_path)))
}

/// Opens `library_path` and calls `init_symbol`, expecting it to return
/// `true`. Used for both `module.json` native packages and `$`-prefixed
/// native module specs, which each declare a single init entry point.
fn dlopen_and_init(library_path: &Path, init_symbol: &str) -> Result<Arc<DynamicLibrary>> {
    // SAFETY: the loader only dlopens libraries discovered via its own
    // resolved module path, never user-supplied arbitrary paths.
    let lib = unsafe { DynamicLibrary::open(library_path) }.map_err(|e| ModuleError::NativeInitFailed(e.to_string()))?;
    let lib = Arc::new(lib);
    // SAFETY: `find_init_symbol`'s contract requires the symbol to
    // match `NativeInitFn`; native packages are expected to declare
    // their init entry points with that exact signature.
    let init = unsafe { lib.find_init_symbol(init_symbol) }
        .ok_or_else(|| ModuleError::NativeSymbolMissing(init_symbol.to_string()))?;
    let ok = unsafe { init(std::ptr::null_mut()) };
    if !ok {
        return Err(ModuleError::NativeInitFailed(format!("{init_symbol} returned failure")));
    }
    Ok(lib)
}

fn load_native_bindings(module: &Module, natives: &[NativeBinding]) -> Result<()> {
    let library_path: PathBuf = module
        .absolute_path()
        .map(|p| p.with_extension(native_extension()))
        .ok_or_else(|| ModuleError::NativeInitFailed("native module has no on-disk library path".into()))?;

    // SAFETY: see `dlopen_and_init`.
    let lib = unsafe { DynamicLibrary::open(&library_path) }.map_err(|e| ModuleError::NativeInitFailed(e.to_string()))?;
    let lib = Arc::new(lib);

    for binding in natives {
        // SAFETY: see `dlopen_and_init`.
        let init = unsafe { lib.find_init_symbol(&binding.native_symbol) }
            .ok_or_else(|| ModuleError::NativeSymbolMissing(binding.native_symbol.clone()))?;
        let ok = unsafe { init(std::ptr::null_mut()) };
        if !ok {
            return Err(ModuleError::NativeInitFailed(format!(
                "{} returned failure",
                binding.native_symbol
            )));
        }
    }

    module.set_native_handle(lib);
    Ok(())
}

#[cfg(target_os = "windows")]
fn native_extension() -> &'static str {
    "dll"
}
#[cfg(target_os = "macos")]
fn native_extension() -> &'static str {
    "dylib"
}
#[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
fn native_extension() -> &'static str {
    "so"
}
