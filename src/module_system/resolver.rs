//! C9a — the 4-tier loader hierarchy's resolution half (spec §3
//! "Resolver", §4.4).
//!
//! Generalizes the teacher crate's `ModuleNamespace` dispatch (which
//! only distinguishes `(scheme ...)` from `(lambdust ...)`) into four
//! ordered tiers, each able to claim or decline a module spec:
//!
//! 1. **Bootstrap** — exactly `@__builtins__`.
//! 2. **System** — installed packages under any directory on
//!    `VESPER_MODULE_PATH`, or the default `$HOME/.vesper/modules`.
//! 3. **Application** — modules bundled with (or living alongside) the
//!    running bundle, resolved relative to its root.
//! 4. **Child** — a relative spec (`./foo`, `../bar`) resolved against
//!    the *importing* module's own directory.
//!
//! Within the System and Application tiers, each search directory is
//! probed in the order spec §4.4 lays out: a `module.json`-carrying
//! directory, a standalone archive, a `modules/` subdirectory archive,
//! then a bare bytecode or source file. First hit wins throughout; this
//! crate never prefers one version over another (no goal: SAT-solving
//! dependency resolution).

use crate::module_system::error::{ModuleError, Result};
use crate::module_system::module_id::ModulePath;
use std::path::{Path, PathBuf};

const ARCHIVE_EXT: &str = "vesparc";
const SOURCE_EXT: &str = "vsp";
const BYTECODE_EXT: &str = "vbc";

/// Where a resolved module's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedLocation {
    /// The bootstrap `__builtins__` module, with no on-disk backing.
    Bootstrap,
    /// A standalone compiled `.vbc` file on disk.
    File(PathBuf),
    /// A standalone `.vsp` source file, needing compilation before load
    /// (spec §4.5 "Source").
    Source(PathBuf),
    /// A directory carrying a `module.json` package manifest.
    Directory(PathBuf),
    /// A `$`-prefixed native-module spec, resolved to a library only at
    /// load time (spec §4.4 step 3).
    Native(String),
    /// An entry inside an archive or bundle file.
    Archive {
        /// Path to the `.vesparc`/`.vbundle` file.
        container: PathBuf,
        /// The module's canonical path, used as the archive entry key.
        module_path: String,
    },
}

/// A resolved module: its canonical path and where to read it from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The canonical, interned path this spec resolved to.
    pub path: ModulePath,
    /// Where the bytes live.
    pub location: ResolvedLocation,
}

/// Search configuration shared across the System and Application tiers.
pub struct ResolverConfig {
    /// Directories searched, in order, for installed system packages.
    pub system_search_paths: Vec<PathBuf>,
    /// The root directory of the running application bundle, if any.
    pub application_root: Option<PathBuf>,
    /// A pre-opened application bundle/archive file, if the app was
    /// launched from a `.vbundle`/`.vesparc` rather than a directory.
    pub application_container: Option<PathBuf>,
}

impl ResolverConfig {
    /// Builds a resolver config from the environment, honoring
    /// `VESPER_MODULE_PATH` (a platform path-separated list) for the
    /// System tier.
    pub fn from_env() -> Self {
        let system_search_paths = std::env::var("VESPER_MODULE_PATH")
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default();
        Self {
            system_search_paths,
            application_root: None,
            application_container: None,
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            system_search_paths: Vec::new(),
            application_root: None,
            application_container: None,
        }
    }
}

const BUILTINS_SPEC: &str = "@__builtins__";

fn is_relative_spec(spec: &str) -> bool {
    spec.starts_with("./") || spec.starts_with("../")
}

fn bare_name(spec: &str) -> String {
    spec.trim_start_matches('@').replace('.', "/")
}

/// Probes one search-path directory for `name` in spec §4.4's order:
/// `<dir>/<name>/module.json`, `<dir>/<name>.<archive-ext>`,
/// `<dir>/modules/<name>.<archive-ext>`, `<dir>/<name>.<bytecode-ext>`,
/// `<dir>/<name>.<source-ext>`.
fn probe_search_dir(dir: &Path, name: &str) -> Option<ResolvedLocation> {
    let as_dir = dir.join(name);
    if as_dir.join("module.json").is_file() {
        return Some(ResolvedLocation::Directory(as_dir));
    }
    let archive = dir.join(format!("{name}.{ARCHIVE_EXT}"));
    if archive.is_file() {
        return Some(ResolvedLocation::Archive {
            container: archive,
            module_path: format!("@{name}"),
        });
    }
    let modules_archive = dir.join("modules").join(format!("{name}.{ARCHIVE_EXT}"));
    if modules_archive.is_file() {
        return Some(ResolvedLocation::Archive {
            container: modules_archive,
            module_path: format!("@{name}"),
        });
    }
    let bytecode = dir.join(format!("{name}.{BYTECODE_EXT}"));
    if bytecode.is_file() {
        return Some(ResolvedLocation::File(bytecode));
    }
    let source = dir.join(format!("{name}.{SOURCE_EXT}"));
    if source.is_file() {
        return Some(ResolvedLocation::Source(source));
    }
    None
}

/// Probes the `.cache`/`$HOME/.vesper/cache` install locations for a
/// previously-compiled copy of `name` (spec §4.4 step 7): any file
/// matching `<name>-*.<bytecode-ext>`, first hit wins.
fn probe_cache_install(name: &str) -> Option<ResolvedLocation> {
    let mut dirs = vec![PathBuf::from(".cache")];
    if let Some(home) = dirs::home_dir() {
        dirs.push(home.join(".vesper").join("cache"));
    }
    let prefix = format!("{name}-");
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&prefix) && file_name.ends_with(&format!(".{BYTECODE_EXT}")) {
                return Some(ResolvedLocation::File(entry.path()));
            }
        }
    }
    None
}

/// Resolves a module spec to a concrete location, trying each tier in
/// order and returning the first hit.
///
/// `importing_dir` is the directory of the module that issued the
/// import, used only by the Child tier for relative specs.
pub fn resolve(
    spec: &str,
    config: &ResolverConfig,
    importing_dir: Option<&Path>,
) -> Result<Resolution> {
    if spec == BUILTINS_SPEC {
        return Ok(Resolution {
            path: ModulePath::new(spec),
            location: ResolvedLocation::Bootstrap,
        });
    }

    // Step 3: `$`-prefixed native specs resolve to a library only once
    // the loader actually dlopens it.
    if let Some(native) = spec.strip_prefix('$') {
        return Ok(Resolution {
            path: ModulePath::new(spec),
            location: ResolvedLocation::Native(native.to_string()),
        });
    }

    // Step 4: an absolute path is used as-is.
    let as_path = Path::new(spec);
    if as_path.is_absolute() {
        if as_path.join("module.json").is_file() {
            return Ok(Resolution {
                path: ModulePath::new(spec),
                location: ResolvedLocation::Directory(as_path.to_path_buf()),
            });
        }
        if as_path.is_file() {
            let location = if as_path.extension().map(|e| e == SOURCE_EXT).unwrap_or(false) {
                ResolvedLocation::Source(as_path.to_path_buf())
            } else {
                ResolvedLocation::File(as_path.to_path_buf())
            };
            return Ok(Resolution {
                path: ModulePath::new(spec),
                location,
            });
        }
        return Err(ModuleError::ModuleNotFound(ModulePath::new(spec)));
    }

    // Step 5: `./`/`../`-prefixed, relative to the importing module.
    if is_relative_spec(spec) {
        let dir = importing_dir.ok_or_else(|| ModuleError::ModuleNotFound(ModulePath::new(spec)))?;
        let mut candidate = dir.join(spec);
        candidate.set_extension(BYTECODE_EXT);
        if candidate.is_file() {
            return Ok(Resolution {
                path: ModulePath::new(spec),
                location: ResolvedLocation::File(candidate),
            });
        }
        let mut source_candidate = dir.join(spec);
        source_candidate.set_extension(SOURCE_EXT);
        if source_candidate.is_file() {
            return Ok(Resolution {
                path: ModulePath::new(spec),
                location: ResolvedLocation::Source(source_candidate),
            });
        }
        return Err(ModuleError::ModuleNotFound(ModulePath::new(spec)));
    }

    let name = bare_name(spec);

    if let Some(container) = &config.application_container {
        return Ok(Resolution {
            path: ModulePath::new(spec),
            location: ResolvedLocation::Archive {
                container: container.clone(),
                module_path: spec.to_string(),
            },
        });
    }
    if let Some(root) = &config.application_root {
        if let Some(location) = probe_search_dir(root, &name) {
            return Ok(Resolution {
                path: ModulePath::new(spec),
                location,
            });
        }
    }

    for dir in &config.system_search_paths {
        if let Some(location) = probe_search_dir(dir, &name) {
            return Ok(Resolution {
                path: ModulePath::new(spec),
                location,
            });
        }
    }

    if let Some(location) = probe_cache_install(&name) {
        return Ok(Resolution {
            path: ModulePath::new(spec),
            location,
        });
    }

    Err(ModuleError::ModuleNotFound(ModulePath::new(spec)))
}

/// Detects a cycle in an import chain: `path` transitively importing
/// itself while every module between it and its first occurrence is
/// still `Loading`.
///
/// The loader no longer treats this as fatal (spec §4.5's eager-insert
/// protocol lets an importer observe the partial record instead); this
/// stays available for diagnostics — logging the cycle path without
/// aborting the load.
pub fn detect_cycle(chain: &[ModulePath], path: &ModulePath) -> Option<Vec<ModulePath>> {
    chain.iter().position(|p| p == path).map(|start| {
        let mut cycle: Vec<ModulePath> = chain[start..].to_vec();
        cycle.push(path.clone());
        cycle
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn bootstrap_spec_resolves_without_filesystem() {
        let config = ResolverConfig::default();
        let res = resolve(BUILTINS_SPEC, &config, None).unwrap();
        assert_eq!(res.location, ResolvedLocation::Bootstrap);
    }

    #[test]
    fn system_tier_finds_installed_module() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("json.vbc"), b"stub").unwrap();
        let config = ResolverConfig {
            system_search_paths: vec![dir.path().to_path_buf()],
            application_root: None,
            application_container: None,
        };
        let res = resolve("@json", &config, None).unwrap();
        match res.location {
            ResolvedLocation::File(p) => assert_eq!(p, dir.path().join("json.vbc")),
            other => panic!("expected File, got {other:?}"),
        }
    }

    #[test]
    fn application_tier_checked_before_system_tier() {
        let app_dir = TempDir::new().unwrap();
        let sys_dir = TempDir::new().unwrap();
        std::fs::write(app_dir.path().join("util.vbc"), b"app").unwrap();
        std::fs::write(sys_dir.path().join("util.vbc"), b"sys").unwrap();

        let config = ResolverConfig {
            system_search_paths: vec![sys_dir.path().to_path_buf()],
            application_root: Some(app_dir.path().to_path_buf()),
            application_container: None,
        };
        let res = resolve("@util", &config, None).unwrap();
        match res.location {
            ResolvedLocation::File(p) => assert_eq!(p, app_dir.path().join("util.vbc")),
            other => panic!("expected File, got {other:?}"),
        }
    }

    #[test]
    fn child_tier_resolves_relative_to_importer() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("sibling.vbc"), b"stub").unwrap();
        let config = ResolverConfig::default();
        let res = resolve("./sibling", &config, Some(dir.path())).unwrap();
        match res.location {
            ResolvedLocation::File(p) => assert_eq!(p, dir.path().join("sibling.vbc")),
            other => panic!("expected File, got {other:?}"),
        }
    }

    #[test]
    fn unresolvable_spec_is_module_not_found() {
        let config = ResolverConfig::default();
        let err = resolve("@does-not-exist", &config, None).unwrap_err();
        assert!(matches!(err, ModuleError::ModuleNotFound(_)));
    }

    #[test]
    fn cycle_detection_finds_self_reference() {
        let chain = vec![ModulePath::new("@a"), ModulePath::new("@b")];
        let cycle = detect_cycle(&chain, &ModulePath::new("@a")).unwrap();
        assert_eq!(cycle.len(), 3);
        assert!(detect_cycle(&chain, &ModulePath::new("@c")).is_none());
    }

    #[test]
    fn directory_with_manifest_resolves_before_bare_file() {
        let dir = TempDir::new().unwrap();
        let pkg_dir = dir.path().join("crypto");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(pkg_dir.join("module.json"), r#"{"name":"crypto","version":"1.0.0"}"#)
            .unwrap();
        let config = ResolverConfig {
            system_search_paths: vec![dir.path().to_path_buf()],
            application_root: None,
            application_container: None,
        };
        let res = resolve("@crypto", &config, None).unwrap();
        match res.location {
            ResolvedLocation::Directory(p) => assert_eq!(p, pkg_dir),
            other => panic!("expected Directory, got {other:?}"),
        }
    }

    #[test]
    fn dollar_prefixed_spec_resolves_to_native_without_filesystem() {
        let config = ResolverConfig::default();
        let res = resolve("$mylib", &config, None).unwrap();
        assert_eq!(res.location, ResolvedLocation::Native("mylib".to_string()));
    }

    #[test]
    fn absolute_path_resolves_as_is() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("direct.vbc");
        std::fs::write(&file, b"stub").unwrap();
        let config = ResolverConfig::default();
        let res = resolve(file.to_str().unwrap(), &config, None).unwrap();
        assert_eq!(res.location, ResolvedLocation::File(file));
    }

    #[test]
    fn source_extension_is_probed_after_bytecode() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("script.vsp"), b"(print 1)").unwrap();
        let config = ResolverConfig {
            system_search_paths: vec![dir.path().to_path_buf()],
            application_root: None,
            application_container: None,
        };
        let res = resolve("@script", &config, None).unwrap();
        match res.location {
            ResolvedLocation::Source(p) => assert_eq!(p, dir.path().join("script.vsp")),
            other => panic!("expected Source, got {other:?}"),
        }
    }
}
