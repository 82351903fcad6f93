//! C12 — introspection views over loaded modules, serializable to JSON
//! for host tooling (spec §3 "Introspection", §4.9).

use crate::module_system::cache::ModuleCache;
use crate::module_system::module::{Module, ModuleMetrics, ModuleState};
use crate::module_system::platform::glob_matcher;
use serde::Serialize;

/// A JSON-serializable snapshot of one export.
#[derive(Debug, Clone, Serialize)]
pub struct ExportInfo {
    /// Exported name.
    pub name: String,
    /// Export kind, as a lowercase string, when known.
    pub kind: Option<&'static str>,
    /// Private or public, as a lowercase string.
    pub visibility: &'static str,
    /// Function arity, when the export's signature declares one.
    pub arity: Option<usize>,
    /// True if the export's value is a native function.
    pub is_native: bool,
    /// True if the export's value is callable (native or closure).
    pub is_callable: bool,
}

fn kind_name(kind: crate::module_system::format::ExportKind) -> &'static str {
    use crate::module_system::format::ExportKind;
    match kind {
        ExportKind::Function => "function",
        ExportKind::Variable => "variable",
        ExportKind::Constant => "constant",
        ExportKind::Class => "class",
        ExportKind::Struct => "struct",
        ExportKind::Trait => "trait",
    }
}

fn visibility_name(visibility: crate::module_system::module::Visibility) -> &'static str {
    match visibility {
        crate::module_system::module::Visibility::Private => "private",
        crate::module_system::module::Visibility::Public => "public",
    }
}

/// A JSON-serializable snapshot of one module's public state.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    /// Canonical module path.
    pub path: String,
    /// Declared version, if any.
    pub version: Option<String>,
    /// Lifecycle state, as a lowercase string.
    pub state: &'static str,
    /// Current reference count.
    pub ref_count: i64,
    /// Per-export detail, in definition order.
    pub exports: Vec<ExportInfo>,
    /// Whether this module carries a native (dlopen'd) library.
    pub has_native: bool,
    /// Load/init timing and access counters.
    pub metrics: ModuleMetrics,
}

fn state_name(state: ModuleState) -> &'static str {
    match state {
        ModuleState::Unloaded => "unloaded",
        ModuleState::Loading => "loading",
        ModuleState::Loaded => "loaded",
        ModuleState::Error => "error",
    }
}

impl ModuleInfo {
    /// Builds a snapshot from a live module.
    pub fn from_module(module: &Module) -> ModuleInfo {
        let exports = module
            .exports_snapshot()
            .into_iter()
            .map(|entry| ExportInfo {
                name: entry.name.clone(),
                kind: entry.kind.map(kind_name),
                visibility: visibility_name(entry.visibility),
                arity: entry.arity(),
                is_native: entry.is_native(),
                is_callable: entry.is_callable(),
            })
            .collect();

        ModuleInfo {
            path: module.path.to_string(),
            version: module.version(),
            state: state_name(module.state()),
            ref_count: module.ref_count(),
            exports,
            has_native: module.native_handle().is_some(),
            metrics: module.metrics(),
        }
    }

    /// Serializes this snapshot to a pretty JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Snapshots every module currently in `cache`.
pub fn list_all(cache: &ModuleCache) -> Vec<ModuleInfo> {
    cache
        .paths()
        .into_iter()
        .filter_map(|p| cache.get(&p))
        .map(|m| ModuleInfo::from_module(&m))
        .collect()
}

/// Snapshots modules in `cache` whose canonical path matches `glob`.
pub fn find_by_pattern(cache: &ModuleCache, glob: &str) -> Vec<ModuleInfo> {
    let matcher = match glob_matcher(glob) {
        Some(m) => m,
        None => return Vec::new(),
    };
    list_all(cache)
        .into_iter()
        .filter(|info| matcher.is_match(&info.path))
        .collect()
}

/// Snapshots modules in `cache` that export a symbol named `name`.
pub fn find_by_export(cache: &ModuleCache, name: &str) -> Vec<ModuleInfo> {
    list_all(cache)
        .into_iter()
        .filter(|info| info.exports.iter().any(|e| e.name == name))
        .collect()
}

/// Serializes the full cache snapshot to a pretty JSON array.
pub fn to_json(cache: &ModuleCache) -> String {
    serde_json::to_string_pretty(&list_all(cache)).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_system::module_id::ModulePath;
    use std::sync::Arc;

    #[test]
    fn snapshot_reflects_module_state() {
        let m = Module::new(ModulePath::new("@inspect-test"));
        m.set_state(ModuleState::Loaded);
        m.set_version(Some("1.2.3".to_string()));
        m.export("f", crate::value::TaggedValue::Nil, crate::module_system::module::Visibility::Public);

        let info = ModuleInfo::from_module(&m);
        assert_eq!(info.path, "@inspect-test");
        assert_eq!(info.state, "loaded");
        assert_eq!(info.exports.len(), 1);
        assert_eq!(info.exports[0].name, "f");
        assert_eq!(info.exports[0].visibility, "public");
        assert!(info.to_json().contains("\"state\": \"loaded\""));
    }

    #[test]
    fn snapshot_surfaces_arity_and_native_flag() {
        let m = Module::new(ModulePath::new("@inspect-arity"));
        m.export_full(
            "add",
            crate::value::TaggedValue::Native(crate::value::NativeFn::new(|_| Ok(crate::value::TaggedValue::Nil))),
            crate::module_system::module::Visibility::Public,
            Some(crate::module_system::format::ExportKind::Function),
            Some("(Int, Int)->Int".to_string()),
        );
        let info = ModuleInfo::from_module(&m);
        assert_eq!(info.exports[0].arity, Some(2));
        assert!(info.exports[0].is_native);
        assert!(info.exports[0].is_callable);
        assert_eq!(info.exports[0].kind, Some("function"));
    }

    #[test]
    fn find_by_pattern_filters_cache() {
        let cache = ModuleCache::new(10);
        cache.insert(Arc::new(Module::new(ModulePath::new("@pkg.json"))));
        cache.insert(Arc::new(Module::new(ModulePath::new("@pkg.yaml"))));
        cache.insert(Arc::new(Module::new(ModulePath::new("@other"))));

        let matches = find_by_pattern(&cache, "@pkg.*");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn find_by_export_filters_by_symbol_name() {
        let cache = ModuleCache::new(10);
        let a = Module::new(ModulePath::new("@has-parse"));
        a.export("parse", crate::value::TaggedValue::Nil, crate::module_system::module::Visibility::Public);
        let b = Module::new(ModulePath::new("@no-parse"));
        b.export("stringify", crate::value::TaggedValue::Nil, crate::module_system::module::Visibility::Public);
        cache.insert(Arc::new(a));
        cache.insert(Arc::new(b));

        let matches = find_by_export(&cache, "parse");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "@has-parse");
    }

    #[test]
    fn to_json_is_valid_array() {
        let cache = ModuleCache::new(10);
        cache.insert(Arc::new(Module::new(ModulePath::new("@a"))));
        let json = to_json(&cache);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_array());
    }
}
