//! C11 — lifecycle hooks (spec §3 "Hook record", §4.8).
//!
//! Two kinds of hook exist. Per-module hooks (`on_init`, `on_first_use`,
//! `on_unload`, `on_error`) are attached to one module by path. Global
//! hooks (`before_init`, `after_init`, `before_unload`, `after_unload`)
//! run for every module whose path satisfies the hook's `should_apply`
//! predicate, in ascending priority order (lower runs first). Init
//! order for one module is: global `before_init` (priority order), the
//! module's own `on_init`, then global `after_init` (priority order).
//! Any `false` aborts the remaining hooks and marks the module `Error`.
//! Unload hooks run unconditionally and cannot fail.

use crate::module_system::error::{ModuleError, Result};
use crate::module_system::module::Module;
use crate::module_system::module_id::ModulePath;
use crate::module_system::platform::SharedLock;
use crate::value::TaggedValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonically increasing identifier handed out at registration.
pub type HookId = u64;

/// Called after a module finishes executing its chunk but before it is
/// marked `Loaded`. Returning `false` aborts initialization.
pub type OnInitHook = Arc<dyn Fn(&Module) -> bool + Send + Sync>;

/// Called the first time a lazily-loaded module is actually used
/// (spec §4.5 lazy park / `ensure_initialized`).
pub type OnFirstUseHook = Arc<dyn Fn(&Module) + Send + Sync>;

/// Called immediately before a module is evicted or force-unloaded.
pub type OnUnloadHook = Arc<dyn Fn(&Module) + Send + Sync>;

/// Called when a module's load or init fails, with the error that
/// caused it.
pub type OnErrorHook = Arc<dyn Fn(&Module, &ModuleError) + Send + Sync>;

/// Called whenever a module transitions from `Unloaded`/absent to
/// `Loading`, i.e. right as resolution hands off to execution.
pub type OnLoadStartHook = Arc<dyn Fn(&ModulePath) + Send + Sync>;

/// A global init/unload hook, gated by `should_apply` and ordered by
/// ascending `priority`.
pub struct GlobalHook<F> {
    id: HookId,
    priority: i32,
    should_apply: Arc<dyn Fn(&str) -> bool + Send + Sync>,
    callback: F,
}

/// Usage/failure counters for the whole registry, per spec §4.8.
#[derive(Debug, Clone, Copy, Default)]
pub struct HookStats {
    /// Total hooks ever registered, across every kind.
    pub registered: u64,
    /// Total hook invocations, across every kind.
    pub executions: u64,
    /// Total invocations that returned rejection (`on_init`-family only).
    pub failures: u64,
}

struct PerModuleList<H> {
    entries: Vec<(ModulePath, HookId, H)>,
}

impl<H> PerModuleList<H> {
    fn new() -> Self {
        Self { entries: Vec::new() }
    }

    fn register(&mut self, path: ModulePath, id: HookId, hook: H) {
        self.entries.push((path, id, hook));
    }

    fn unregister(&mut self, id: HookId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(_, hid, _)| *hid != id);
        self.entries.len() != before
    }

    fn for_module<'a>(&'a self, path: &'a ModulePath) -> impl Iterator<Item = &'a H> {
        self.entries.iter().filter(move |(p, _, _)| p == path).map(|(_, _, h)| h)
    }
}

struct GlobalList<F> {
    hooks: Vec<GlobalHook<F>>,
}

impl<F> GlobalList<F> {
    fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    fn register(
        &mut self,
        id: HookId,
        priority: i32,
        should_apply: Arc<dyn Fn(&str) -> bool + Send + Sync>,
        callback: F,
    ) {
        self.hooks.push(GlobalHook {
            id,
            priority,
            should_apply,
            callback,
        });
        self.hooks.sort_by_key(|h| h.priority);
    }

    fn unregister(&mut self, id: HookId) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|h| h.id != id);
        self.hooks.len() != before
    }

    fn applicable<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a F> {
        self.hooks.iter().filter(move |h| (h.should_apply)(name)).map(|h| &h.callback)
    }
}

/// The process-wide (or per-runtime-instance, in tests) hook registry.
pub struct HookRegistry {
    next_id: AtomicU64,
    on_init: SharedLock<PerModuleList<OnInitHook>>,
    on_first_use: SharedLock<PerModuleList<OnFirstUseHook>>,
    on_unload: SharedLock<PerModuleList<OnUnloadHook>>,
    on_error: SharedLock<PerModuleList<OnErrorHook>>,
    on_load_start: SharedLock<PerModuleList<OnLoadStartHook>>,
    before_init: SharedLock<GlobalList<OnInitHook>>,
    after_init: SharedLock<GlobalList<OnInitHook>>,
    before_unload: SharedLock<GlobalList<OnUnloadHook>>,
    after_unload: SharedLock<GlobalList<OnUnloadHook>>,
    stats: SharedLock<HookStats>,
}

fn always(_: &str) -> bool {
    true
}

impl HookRegistry {
    /// Creates an empty hook registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            on_init: SharedLock::new(PerModuleList::new()),
            on_first_use: SharedLock::new(PerModuleList::new()),
            on_unload: SharedLock::new(PerModuleList::new()),
            on_error: SharedLock::new(PerModuleList::new()),
            on_load_start: SharedLock::new(PerModuleList::new()),
            before_init: SharedLock::new(GlobalList::new()),
            after_init: SharedLock::new(GlobalList::new()),
            before_unload: SharedLock::new(GlobalList::new()),
            after_unload: SharedLock::new(GlobalList::new()),
            stats: SharedLock::new(HookStats::default()),
        }
    }

    fn allocate_id(&self) -> HookId {
        self.stats.write().registered += 1;
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a per-module `on_init` hook. Returns its id.
    pub fn register_on_init(&self, path: &ModulePath, hook: OnInitHook) -> HookId {
        let id = self.allocate_id();
        self.on_init.write().register(path.clone(), id, hook);
        id
    }

    /// Registers a per-module `on_first_use` hook (spec §4.5 lazy park).
    pub fn register_on_first_use(&self, path: &ModulePath, hook: OnFirstUseHook) -> HookId {
        let id = self.allocate_id();
        self.on_first_use.write().register(path.clone(), id, hook);
        id
    }

    /// Registers a per-module `on_unload` hook.
    pub fn register_on_unload(&self, path: &ModulePath, hook: OnUnloadHook) -> HookId {
        let id = self.allocate_id();
        self.on_unload.write().register(path.clone(), id, hook);
        id
    }

    /// Registers a per-module `on_error` hook.
    pub fn register_on_error(&self, path: &ModulePath, hook: OnErrorHook) -> HookId {
        let id = self.allocate_id();
        self.on_error.write().register(path.clone(), id, hook);
        id
    }

    /// Registers an `on_load_start` hook, applying to every module.
    pub fn register_on_load_start(&self, path: &ModulePath, hook: OnLoadStartHook) -> HookId {
        let id = self.allocate_id();
        self.on_load_start.write().register(path.clone(), id, hook);
        id
    }

    /// Registers a global `before_init` hook, run (in `priority` order,
    /// lowest first) for every module whose canonical path satisfies
    /// `should_apply`.
    pub fn register_before_init(
        &self,
        priority: i32,
        should_apply: Arc<dyn Fn(&str) -> bool + Send + Sync>,
        hook: OnInitHook,
    ) -> HookId {
        let id = self.allocate_id();
        self.before_init.write().register(id, priority, should_apply, hook);
        id
    }

    /// Registers a global `after_init` hook.
    pub fn register_after_init(
        &self,
        priority: i32,
        should_apply: Arc<dyn Fn(&str) -> bool + Send + Sync>,
        hook: OnInitHook,
    ) -> HookId {
        let id = self.allocate_id();
        self.after_init.write().register(id, priority, should_apply, hook);
        id
    }

    /// Registers a global `before_unload` hook.
    pub fn register_before_unload(&self, priority: i32, hook: OnUnloadHook) -> HookId {
        let id = self.allocate_id();
        self.before_unload
            .write()
            .register(id, priority, Arc::new(always), hook);
        id
    }

    /// Registers a global `after_unload` hook.
    pub fn register_after_unload(&self, priority: i32, hook: OnUnloadHook) -> HookId {
        let id = self.allocate_id();
        self.after_unload
            .write()
            .register(id, priority, Arc::new(always), hook);
        id
    }

    /// Installs a trampoline whose `on_init` looks up `function_name`
    /// among `module`'s exports and invokes it, treating a non-boolean
    /// or missing export as rejection (spec §4.8 `set_script_init_hook`).
    pub fn set_script_init_hook(&self, module: &ModulePath, function_name: &str) -> HookId {
        let function_name = function_name.to_string();
        self.register_on_init(
            module,
            Arc::new(move |m: &Module| match m.get_export(&function_name) {
                Some(entry) => match &entry.value {
                    TaggedValue::Native(f) => matches!(f.call(&[]), Ok(TaggedValue::Bool(true))),
                    _ => false,
                },
                None => false,
            }),
        )
    }

    /// Removes a previously registered hook by id, from whichever list
    /// it's in. Returns `true` if something was removed.
    pub fn unregister(&self, id: HookId) -> bool {
        self.on_init.write().unregister(id)
            || self.on_first_use.write().unregister(id)
            || self.on_unload.write().unregister(id)
            || self.on_error.write().unregister(id)
            || self.on_load_start.write().unregister(id)
            || self.before_init.write().unregister(id)
            || self.after_init.write().unregister(id)
            || self.before_unload.write().unregister(id)
            || self.after_unload.write().unregister(id)
    }

    fn run_init_list(&self, module: &Module, list: &GlobalList<OnInitHook>) -> Result<()> {
        let name = module.path.as_str();
        for hook in list.applicable(name) {
            self.stats.write().executions += 1;
            if !hook(module) {
                self.stats.write().failures += 1;
                return Err(ModuleError::HookRejected {
                    module: module.path.clone(),
                    hook: "global".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Runs the full init sequence for `module`: global `before_init`
    /// (priority order), the module's own `on_init` hooks, then global
    /// `after_init` (priority order). Stops at, and returns, the first
    /// rejection.
    pub fn run_on_init(&self, module: &Module) -> Result<()> {
        self.run_init_list(module, &self.before_init.read())?;

        let guard = self.on_init.read();
        for hook in guard.for_module(&module.path) {
            self.stats.write().executions += 1;
            if !hook(module) {
                self.stats.write().failures += 1;
                return Err(ModuleError::HookRejected {
                    module: module.path.clone(),
                    hook: "on_init".to_string(),
                });
            }
        }
        drop(guard);

        self.run_init_list(module, &self.after_init.read())
    }

    /// Runs `on_first_use` hooks for `module` (spec §4.5 lazy park).
    pub fn run_on_first_use(&self, module: &Module) {
        let guard = self.on_first_use.read();
        for hook in guard.for_module(&module.path) {
            self.stats.write().executions += 1;
            hook(module);
        }
    }

    /// Runs `on_error` hooks for `module` with the failure that occurred
    /// (spec §4.5 step 5 / §7).
    pub fn run_on_error(&self, module: &Module, error: &ModuleError) {
        let guard = self.on_error.read();
        for hook in guard.for_module(&module.path) {
            self.stats.write().executions += 1;
            hook(module, error);
        }
    }

    /// Runs global `before_unload`, the module's own `on_unload` hooks,
    /// then global `after_unload`. Advisory only; hooks cannot veto
    /// unload.
    pub fn run_on_unload(&self, module: &Module) {
        let name = module.path.as_str();
        for hook in self.before_unload.read().applicable(name) {
            self.stats.write().executions += 1;
            hook(module);
        }
        let guard = self.on_unload.read();
        for hook in guard.for_module(&module.path) {
            self.stats.write().executions += 1;
            hook(module);
        }
        drop(guard);
        for hook in self.after_unload.read().applicable(name) {
            self.stats.write().executions += 1;
            hook(module);
        }
    }

    /// Runs every `on_load_start` hook for `path`.
    pub fn run_on_load_start(&self, path: &ModulePath) {
        let guard = self.on_load_start.read();
        for hook in guard.for_module(path) {
            self.stats.write().executions += 1;
            hook(path);
        }
    }

    /// A snapshot of registration/execution/failure counters.
    pub fn stats(&self) -> HookStats {
        *self.stats.read()
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn on_init_rejection_short_circuits() {
        let registry = HookRegistry::new();
        let path = ModulePath::new("@hooks-test-reject");
        let second_ran = Arc::new(AtomicBool::new(false));
        let second_ran_clone = second_ran.clone();

        registry.register_on_init(&path, Arc::new(|_m: &Module| false));
        registry.register_on_init(
            &path,
            Arc::new(move |_m: &Module| {
                second_ran_clone.store(true, Ordering::SeqCst);
                true
            }),
        );

        let m = Module::new(path);
        let err = registry.run_on_init(&m).unwrap_err();
        assert!(matches!(err, ModuleError::HookRejected { .. }));
        assert!(!second_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn on_init_all_pass_runs_every_hook() {
        let registry = HookRegistry::new();
        let path = ModulePath::new("@hooks-test-pass");
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = count.clone();
            registry.register_on_init(
                &path,
                Arc::new(move |_m: &Module| {
                    c.fetch_add(1, Ordering::SeqCst);
                    true
                }),
            );
        }
        let m = Module::new(path);
        assert!(registry.run_on_init(&m).is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn unregister_removes_hook() {
        let registry = HookRegistry::new();
        let path = ModulePath::new("@hooks-test-unreg");
        let id = registry.register_on_init(&path, Arc::new(|_m: &Module| false));
        assert!(registry.unregister(id));
        let m = Module::new(path);
        assert!(registry.run_on_init(&m).is_ok());
    }

    #[test]
    fn on_unload_runs_all_and_cannot_abort() {
        let registry = HookRegistry::new();
        let path = ModulePath::new("@hooks-test-unload");
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        registry.register_on_unload(
            &path,
            Arc::new(move |_m: &Module| ran_clone.store(true, Ordering::SeqCst)),
        );
        let m = Module::new(path);
        registry.run_on_unload(&m);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn global_before_init_runs_before_priority_ordered() {
        let registry = HookRegistry::new();
        let order = Arc::new(SharedLock::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        registry.register_before_init(
            10,
            Arc::new(always),
            Arc::new(move |_m| {
                o1.write().push("p10");
                true
            }),
        );
        registry.register_before_init(
            1,
            Arc::new(always),
            Arc::new(move |_m| {
                o2.write().push("p1");
                true
            }),
        );
        let m = Module::new(ModulePath::new("@hooks-test-priority"));
        assert!(registry.run_on_init(&m).is_ok());
        assert_eq!(*order.read(), vec!["p1", "p10"]);
    }

    #[test]
    fn global_hook_respects_should_apply() {
        let registry = HookRegistry::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        registry.register_before_init(
            0,
            Arc::new(|name: &str| name.starts_with("@crypto")),
            Arc::new(move |_m| {
                ran_clone.store(true, Ordering::SeqCst);
                true
            }),
        );
        let m = Module::new(ModulePath::new("@json"));
        assert!(registry.run_on_init(&m).is_ok());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn stats_count_registrations_executions_and_failures() {
        let registry = HookRegistry::new();
        let path = ModulePath::new("@hooks-test-stats");
        registry.register_on_init(&path, Arc::new(|_m: &Module| false));
        let m = Module::new(path);
        let _ = registry.run_on_init(&m);
        let stats = registry.stats();
        assert_eq!(stats.registered, 1);
        assert_eq!(stats.executions, 1);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn on_error_hook_receives_failure() {
        let registry = HookRegistry::new();
        let path = ModulePath::new("@hooks-test-error");
        let seen = Arc::new(SharedLock::new(false));
        let seen_clone = seen.clone();
        registry.register_on_error(
            &path,
            Arc::new(move |_m, _e| {
                *seen_clone.write() = true;
            }),
        );
        let m = Module::new(path);
        registry.run_on_error(&m, &ModuleError::LoadExecutionFailed("boom".into()));
        assert!(*seen.read());
    }
}
