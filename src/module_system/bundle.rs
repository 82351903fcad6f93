//! C7 — the `.vbundle` application bundle: an [`Archive`] plus
//! deployment metadata (entry point, declared dependencies, runtime
//! version requirement) and `bundle_execute`, the entry point a host
//! embeds to run a packaged application (spec §3 "Bundle", §4.2 "Bundle
//! execute").
//!
//! A bundle is what the Application tier of the loader hierarchy
//! resolves against: it is a superset of an archive, carrying the extra
//! fields needed to launch a standalone deployment rather than merely
//! supply importable modules.

use crate::module_system::archive::{Archive, ArchiveWriter};
use crate::module_system::error::{ModuleError, Result};
use crate::module_system::loader::{Executor, ModuleLoader};
use crate::value::TaggedValue;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What a bundle is for, stamped into `bundle.json`'s `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    /// Launched directly; must name a `main`-exporting entry point.
    Application,
    /// Imported by other modules/bundles; no entry point is invoked.
    Library,
    /// Loaded into a host application at a well-known extension point.
    Plugin,
}

/// The `bundle.json` format version this writer produces and this
/// reader recognizes.
pub const BUNDLE_FORMAT_VERSION: u16 = 1;

/// Bundle-level deployment metadata, stored as the archive's manifest
/// sibling entry `bundle.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleManifest {
    /// `bundle.json` format version.
    #[serde(rename = "format-version")]
    pub format_version: u16,
    /// Bundle (application) name.
    pub name: String,
    /// Bundle version.
    pub version: String,
    /// What kind of bundle this is.
    #[serde(rename = "type")]
    pub kind: BundleKind,
    /// The module path whose `main` export is invoked on launch.
    pub entry_point: String,
    /// `name -> version requirement` pairs the bundle declares.
    pub dependencies: Vec<(String, String)>,
    /// Minimum runtime version this bundle requires, as a requirement
    /// string (spec §8), e.g. `">=1.2.0"`.
    pub runtime_requirement: Option<String>,
    /// Free-form tool/author identification.
    pub creator: Option<String>,
    /// Target platform triple this bundle was built for, if known.
    pub platform: Option<String>,
    /// Number of modules packaged into the bundle's archive.
    #[serde(rename = "module-count")]
    pub module_count: usize,
    /// When this bundle was produced, if the build tooling stamped one.
    #[serde(default)]
    pub built_at: Option<chrono::DateTime<chrono::Utc>>,
}

const BUNDLE_MANIFEST_ENTRY: &str = "bundle.json";

/// A record of one packaged module, written into `manifest.json`
/// alongside the archive's own entries (spec §3 "Bundle").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRecord {
    /// Canonical module path.
    pub name: String,
    /// Declared version, when known at packaging time.
    pub version: Option<String>,
    /// The archive-relative entry path holding this module's bytes.
    pub archive_path: String,
}

/// A builder for `.vbundle` files: an archive plus a [`BundleManifest`].
pub struct BundleWriter {
    archive: ArchiveWriter,
    manifest: BundleManifest,
    modules: Vec<ModuleRecord>,
}

fn candidate_locations(base_dir: &Path, name: &str, ext: &str) -> Vec<std::path::PathBuf> {
    vec![
        base_dir.join("modules").join(name).join("build").join(format!("{name}.{ext}")),
        base_dir.join("build").join("modules").join(format!("{name}.{ext}")),
        base_dir.join(format!("{name}.{ext}")),
    ]
}

impl BundleWriter {
    /// Creates a bundle writer for `name`/`version` with the given entry
    /// point module path, defaulting to an Application bundle.
    pub fn new(name: &str, version: &str, entry_point: &str) -> Self {
        Self {
            archive: ArchiveWriter::new(),
            manifest: BundleManifest {
                format_version: BUNDLE_FORMAT_VERSION,
                name: name.to_string(),
                version: version.to_string(),
                kind: BundleKind::Application,
                entry_point: entry_point.to_string(),
                dependencies: Vec::new(),
                runtime_requirement: None,
                creator: None,
                platform: None,
                module_count: 0,
                built_at: None,
            },
            modules: Vec::new(),
        }
    }

    /// Declares a dependency with a version requirement string.
    pub fn add_dependency(&mut self, name: &str, requirement: &str) -> &mut Self {
        self.manifest
            .dependencies
            .push((name.to_string(), requirement.to_string()));
        self
    }

    /// Reads `root_module_path`'s `module.json` (searched relative to
    /// `search_root` under the fixed candidate locations
    /// `modules/<name>/build/<name>.<ext>`, `build/modules/<name>.<ext>`,
    /// `<name>.<ext>`) and declares it, then — when `recursive` — walks
    /// its own declared dependencies the same way. Unresolved
    /// dependencies are logged and skipped rather than treated as fatal.
    pub fn add_dependencies(&mut self, root_module_path: &Path, search_root: &Path, recursive: bool) -> Result<&mut Self> {
        use crate::module_system::package::PackageManifest;

        let manifest_path = if root_module_path.is_dir() {
            root_module_path.join("module.json")
        } else {
            root_module_path.to_path_buf()
        };
        let manifest = PackageManifest::load_from_dir(
            manifest_path.parent().unwrap_or(root_module_path),
        )?;

        for (dep_name, requirement) in &manifest.dependencies {
            if self.manifest.dependencies.iter().any(|(n, _)| n == dep_name) {
                continue;
            }
            self.add_dependency(dep_name, requirement);

            if recursive {
                let mut resolved = None;
                for ext in ["vbc", "vsp"] {
                    for candidate in candidate_locations(search_root, dep_name, ext) {
                        if candidate.is_file() || candidate.join("module.json").is_file() {
                            resolved = Some(candidate);
                            break;
                        }
                    }
                    if resolved.is_some() {
                        break;
                    }
                }
                match resolved {
                    Some(path) => {
                        let dir = if path.is_dir() { path } else { path.parent().unwrap_or(search_root).to_path_buf() };
                        let _ = self.add_dependencies(&dir, search_root, true);
                    }
                    None => {
                        log::warn!("bundle dependency `{dep_name}` could not be resolved under any candidate location; skipping");
                    }
                }
            }
        }

        Ok(self)
    }

    /// Sets the minimum runtime version requirement.
    pub fn set_runtime_requirement(&mut self, requirement: &str) -> &mut Self {
        self.manifest.runtime_requirement = Some(requirement.to_string());
        self
    }

    /// Stamps the bundle with a build timestamp.
    pub fn set_built_at(&mut self, timestamp: chrono::DateTime<chrono::Utc>) -> &mut Self {
        self.manifest.built_at = Some(timestamp);
        self
    }

    /// Sets the bundle kind, creator string, and target platform triple
    /// in one call (spec §4.2 "Bundle builder operations").
    pub fn set_metadata(&mut self, kind: BundleKind, creator: Option<&str>, platform: Option<&str>) -> &mut Self {
        self.manifest.kind = kind;
        self.manifest.creator = creator.map(str::to_string);
        self.manifest.platform = platform.map(str::to_string);
        self
    }

    /// Adds a module's serialized module-format bytes. Re-adding the
    /// same path is idempotent (the duplicate bytes replace the first,
    /// the manifest record is not duplicated).
    pub fn add_module(&mut self, module_path: &str, format_bytes: Vec<u8>) -> &mut Self {
        self.add_module_versioned(module_path, None, format_bytes)
    }

    /// Like [`Self::add_module`] but also records a version string in
    /// `manifest.json`.
    pub fn add_module_versioned(&mut self, module_path: &str, version: Option<&str>, format_bytes: Vec<u8>) -> &mut Self {
        let archive_path = format!("bytecode/{}.vbc", module_path.trim_start_matches('@'));
        self.archive.add_module(module_path, format_bytes);
        if let Some(existing) = self.modules.iter_mut().find(|m| m.name == module_path) {
            existing.version = version.map(str::to_string);
        } else {
            self.modules.push(ModuleRecord {
                name: module_path.to_string(),
                version: version.map(str::to_string),
                archive_path,
            });
        }
        self
    }

    /// Packages an arbitrary resource file into the bundle's archive.
    pub fn add_resource(&mut self, local_path: &Path, archive_path: &str) -> Result<&mut Self> {
        self.archive.add_file(local_path, &format!("resources/{}", archive_path.trim_start_matches('/')))?;
        Ok(self)
    }

    /// Serializes the bundle to bytes: a ZIP archive carrying the usual
    /// module entries plus its own `archive.json`, with `bundle.json`
    /// (summary) and `manifest.json` (per-module [`ModuleRecord`]s)
    /// layered on top.
    pub fn build(&mut self) -> Result<Vec<u8>> {
        self.manifest.module_count = self.modules.len();
        self.finalize()
    }

    /// Serializes the bundle to bytes without refreshing `module_count`
    /// first — most callers want [`Self::build`].
    pub fn finalize(&self) -> Result<Vec<u8>> {
        use std::io::{Cursor, Write};

        let archive_bytes = self.archive.finalize()?;
        let mut archive_zip = zip::ZipArchive::new(Cursor::new(&archive_bytes))
            .map_err(|e| ModuleError::Io(e.to_string()))?;

        let mut out = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut out);
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);

            for i in 0..archive_zip.len() {
                let mut file = archive_zip
                    .by_index(i)
                    .map_err(|e| ModuleError::Io(e.to_string()))?;
                let name = file.name().to_string();
                let mut contents = Vec::new();
                std::io::Read::read_to_end(&mut file, &mut contents)
                    .map_err(|e| ModuleError::Io(e.to_string()))?;
                zip.start_file(name, options)
                    .map_err(|e| ModuleError::Io(e.to_string()))?;
                zip.write_all(&contents).map_err(|e| ModuleError::Io(e.to_string()))?;
            }

            zip.start_file(BUNDLE_MANIFEST_ENTRY, options)
                .map_err(|e| ModuleError::Io(e.to_string()))?;
            let bundle_json = serde_json::to_vec_pretty(&self.manifest)
                .map_err(|e| ModuleError::InvalidFormat(e.to_string()))?;
            zip.write_all(&bundle_json).map_err(|e| ModuleError::Io(e.to_string()))?;

            zip.start_file("manifest.json", options)
                .map_err(|e| ModuleError::Io(e.to_string()))?;
            let records_json = serde_json::to_vec_pretty(&self.modules)
                .map_err(|e| ModuleError::InvalidFormat(e.to_string()))?;
            zip.write_all(&records_json).map_err(|e| ModuleError::Io(e.to_string()))?;

            zip.finish().map_err(|e| ModuleError::Io(e.to_string()))?;
        }
        Ok(out.into_inner())
    }

    /// Serializes and writes the bundle to `path`.
    pub fn write_to_file(&mut self, path: &Path) -> Result<()> {
        let bytes = self.build()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

/// A parsed `.vbundle`: the underlying [`Archive`] plus its
/// [`BundleManifest`] and per-module records.
#[derive(Debug)]
pub struct Bundle {
    archive: Archive,
    manifest: BundleManifest,
    modules: Vec<ModuleRecord>,
}

impl Bundle {
    /// Parses a bundle from raw ZIP bytes.
    pub fn open(bytes: &[u8]) -> Result<Bundle> {
        let archive = Archive::open(bytes)?;

        let cursor = std::io::Cursor::new(bytes);
        let mut zip = zip::ZipArchive::new(cursor)
            .map_err(|e| ModuleError::InvalidFormat(format!("not a zip archive: {e}")))?;
        let mut manifest_file = zip.by_name(BUNDLE_MANIFEST_ENTRY).map_err(|_| {
            ModuleError::InvalidFormat("bundle missing bundle.json".to_string())
        })?;
        let mut contents = Vec::new();
        std::io::Read::read_to_end(&mut manifest_file, &mut contents)
            .map_err(|e| ModuleError::Io(e.to_string()))?;
        drop(manifest_file);
        let manifest: BundleManifest = serde_json::from_slice(&contents)
            .map_err(|e| ModuleError::InvalidFormat(format!("bad bundle manifest: {e}")))?;
        if manifest.format_version != BUNDLE_FORMAT_VERSION {
            return Err(ModuleError::UnsupportedVersion(manifest.format_version));
        }
        if manifest.kind == BundleKind::Application && !archive.contains(&manifest.entry_point) {
            return Err(ModuleError::ModuleNotFound(crate::module_system::module_id::ModulePath::new(
                &manifest.entry_point,
            )));
        }

        let modules = zip
            .by_name("manifest.json")
            .ok()
            .and_then(|mut f| {
                let mut buf = Vec::new();
                std::io::Read::read_to_end(&mut f, &mut buf).ok()?;
                serde_json::from_slice(&buf).ok()
            })
            .unwrap_or_default();

        Ok(Bundle { archive, manifest, modules })
    }

    /// Parses a bundle from a file on disk.
    pub fn open_file(path: &Path) -> Result<Bundle> {
        let bytes = std::fs::read(path)?;
        Self::open(&bytes)
    }

    /// The bundle's application name.
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// The bundle's declared version.
    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// What kind of bundle this is.
    pub fn kind(&self) -> BundleKind {
        self.manifest.kind
    }

    /// The entry-point module path.
    pub fn entry_point(&self) -> &str {
        &self.manifest.entry_point
    }

    /// Declared `name -> requirement` dependency pairs.
    pub fn dependencies(&self) -> &[(String, String)] {
        &self.manifest.dependencies
    }

    /// The minimum runtime version requirement, if declared.
    pub fn runtime_requirement(&self) -> Option<&str> {
        self.manifest.runtime_requirement.as_deref()
    }

    /// The underlying archive of modules.
    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// The build timestamp, if the bundle was stamped with one.
    pub fn built_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.manifest.built_at
    }

    /// Per-module packaging records from `manifest.json`.
    pub fn modules(&self) -> &[ModuleRecord] {
        &self.modules
    }

    /// Number of modules the bundle's manifest claims to carry.
    pub fn module_count(&self) -> usize {
        self.manifest.module_count
    }
}

/// Opens `path`, loads the bundle's entry-point module through `loader`,
/// and invokes its `main` export with zero arguments (spec §4.2 "Bundle
/// execute").
///
/// Returns the process exit code: `main`'s return value when it's a
/// number, otherwise `0`. A missing or non-callable `main` in an
/// Application bundle is logged as a warning rather than treated as an
/// error — the spec only asks that it not crash the launcher.
pub fn bundle_execute<E: Executor>(path: &Path, loader: &ModuleLoader<E>) -> Result<i32> {
    let bundle = Bundle::open_file(path)?;
    let module = loader.load(bundle.entry_point())?;

    let main_export = module.get_export("main");
    match main_export {
        Some(entry) if entry.is_callable() => match loader.call(&module, &entry.value, &[])? {
            TaggedValue::Number(n) => Ok(n as i32),
            _ => Ok(0),
        },
        Some(_) => {
            log::warn!("bundle `{}` entry point's `main` export is not callable", bundle.name());
            Ok(0)
        }
        None => {
            if bundle.kind() == BundleKind::Application {
                log::warn!("bundle `{}` entry point has no `main` export", bundle.name());
            }
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_system::format::{ExportKind, ModuleWriter};
    use crate::module_system::version::version_satisfies;
    use crate::module_system::{ModuleLoader, ResolverConfig};
    use crate::bytecode::Chunk;
    use crate::module_system::format::ExportRecord;
    use crate::module_system::module::Module;
    use crate::value::NativeFn;

    fn sample_module_bytes(name: &str, ret: Option<f64>) -> Vec<u8> {
        let mut w = ModuleWriter::new();
        w.add_metadata(name, "1.0.0")
            .add_export("main", ExportKind::Function, 0, "()->Int")
            .add_bytecode(&Chunk::empty().serialize());
        let _ = ret;
        w.finalize()
    }

    struct MainExecutor(Option<f64>);

    impl Executor for MainExecutor {
        fn execute(&self, module: &Module, _chunk: &Chunk, export_specs: &[ExportRecord]) -> Result<()> {
            for spec in export_specs {
                let ret = self.0;
                module.export(
                    &spec.name,
                    TaggedValue::Native(NativeFn::new(move |_args| {
                        Ok(ret.map(TaggedValue::Number).unwrap_or(TaggedValue::Nil))
                    })),
                    crate::module_system::module::Visibility::Public,
                );
            }
            Ok(())
        }
    }

    #[test]
    fn round_trip_preserves_manifest_and_modules() {
        let mut writer = BundleWriter::new("demo-app", "1.0.0", "@demo-app.main");
        writer
            .add_dependency("@json", ">=1.0.0")
            .set_runtime_requirement(">=1.0.0")
            .add_module("@demo-app.main", sample_module_bytes("demo-app.main", None));
        let bytes = writer.build().unwrap();

        let bundle = Bundle::open(&bytes).unwrap();
        assert_eq!(bundle.name(), "demo-app");
        assert_eq!(bundle.entry_point(), "@demo-app.main");
        assert_eq!(bundle.dependencies(), &[("@json".to_string(), ">=1.0.0".to_string())]);
        assert!(bundle.archive().contains("@demo-app.main"));
        assert_eq!(bundle.module_count(), 1);
        assert_eq!(bundle.modules().len(), 1);
        assert!(version_satisfies(bundle.version(), bundle.runtime_requirement().unwrap()));
    }

    #[test]
    fn set_metadata_round_trips() {
        let mut writer = BundleWriter::new("plugin-x", "2.0.0", "@plugin-x.main");
        writer
            .set_metadata(BundleKind::Plugin, Some("vesper-pack"), Some("x86_64-unknown-linux-gnu"))
            .add_module("@plugin-x.main", sample_module_bytes("plugin-x.main", None));
        let bundle = Bundle::open(&writer.build().unwrap()).unwrap();
        assert_eq!(bundle.kind(), BundleKind::Plugin);
    }

    #[test]
    fn built_at_round_trips_through_json() {
        use chrono::TimeZone;
        let stamp = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut writer = BundleWriter::new("demo-app", "1.0.0", "@demo-app.main");
        writer
            .set_built_at(stamp)
            .add_module("@demo-app.main", sample_module_bytes("demo-app.main", None));
        let bundle = Bundle::open(&writer.build().unwrap()).unwrap();
        assert_eq!(bundle.built_at(), Some(stamp));
    }

    #[test]
    fn missing_bundle_json_is_invalid_format() {
        let mut archive = ArchiveWriter::new();
        archive.add_module("@x", sample_module_bytes("x", None));
        let archive_only_bytes = archive.finalize().unwrap();
        let err = Bundle::open(&archive_only_bytes).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidFormat(_)));
    }

    #[test]
    fn application_bundle_missing_entry_point_module_is_rejected() {
        let writer = BundleWriter::new("broken", "1.0.0", "@does-not-exist");
        let err = Bundle::open(&writer.finalize().unwrap()).unwrap_err();
        assert!(matches!(err, ModuleError::ModuleNotFound(_)));
    }

    #[test]
    fn bundle_execute_returns_numeric_main_result_as_exit_code() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut writer = BundleWriter::new("demo-app", "1.0.0", "@demo-app.main");
        writer.add_module("@demo-app.main", sample_module_bytes("demo-app.main", Some(42.0)));
        let bundle_path = dir.path().join("demo.vbundle");
        writer.write_to_file(&bundle_path).unwrap();

        let loader = ModuleLoader::new(
            ResolverConfig {
                system_search_paths: Vec::new(),
                application_root: None,
                application_container: Some(bundle_path.clone()),
            },
            MainExecutor(Some(42.0)),
        );

        let code = bundle_execute(&bundle_path, &loader).unwrap();
        assert_eq!(code, 42);
    }

    #[test]
    fn bundle_execute_without_main_logs_warning_and_returns_zero() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut w = ModuleWriter::new();
        w.add_metadata("demo-app.main", "1.0.0");
        w.add_bytecode(&Chunk::empty().serialize());
        let mut writer = BundleWriter::new("demo-app", "1.0.0", "@demo-app.main");
        writer.add_module("@demo-app.main", w.finalize());
        let bundle_path = dir.path().join("demo.vbundle");
        writer.write_to_file(&bundle_path).unwrap();

        let loader = ModuleLoader::new(
            ResolverConfig {
                system_search_paths: Vec::new(),
                application_root: None,
                application_container: Some(bundle_path.clone()),
            },
            MainExecutor(None),
        );

        let code = bundle_execute(&bundle_path, &loader).unwrap();
        assert_eq!(code, 0);
    }
}
