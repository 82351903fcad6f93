//! C6 — the `.vesparc` archive: a ZIP-based directory container holding
//! one or more module-format entries plus optional native libraries and
//! resource files (spec §3 "Archive", §4.2).
//!
//! Entry layout: `archive.json` (this crate's archive manifest),
//! `bytecode/<name>.vbc` (one per sub-module), optional
//! `native/<platform>/<filename>` entries, optional `resources/<path>`
//! entries. A bundle ([`crate::module_system::bundle`]) wraps an archive
//! with deployment metadata, adding its own `manifest.json` of
//! per-module records; an archive alone just carries modules.

use crate::module_system::error::{ModuleError, Result};
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;

const MANIFEST_ENTRY: &str = "archive.json";
const BYTECODE_PREFIX: &str = "bytecode/";
const NATIVE_PREFIX: &str = "native/";
const RESOURCES_PREFIX: &str = "resources/";

/// The archive's own manifest, listing what it carries.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ArchiveManifest {
    /// Archive format version, independent of the module format version.
    pub version: u16,
    /// Canonical module paths contained in this archive, in insertion
    /// order.
    pub modules: Vec<String>,
    /// `platform -> filename` pairs for bundled native libraries.
    pub natives: Vec<(String, String)>,
    /// Archive-relative resource paths (under `resources/`), in
    /// insertion order.
    pub resources: Vec<String>,
}

/// An in-memory, builder-style archive writer.
pub struct ArchiveWriter {
    entries: BTreeMap<String, Vec<u8>>,
    manifest: ArchiveManifest,
}

fn bytecode_entry(module_path: &str) -> String {
    let stripped = module_path.trim_start_matches('@');
    format!("{BYTECODE_PREFIX}{stripped}.vbc")
}

fn native_entry(platform: &str, filename: &str) -> String {
    format!("{NATIVE_PREFIX}{platform}/{filename}")
}

fn resource_entry(archive_path: &str) -> String {
    let trimmed = archive_path.trim_start_matches('/');
    format!("{RESOURCES_PREFIX}{trimmed}")
}

impl ArchiveWriter {
    /// Creates an empty archive writer.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            manifest: ArchiveManifest { version: 1, ..Default::default() },
        }
    }

    /// Adds one module's serialized module-format bytes under its
    /// canonical path, storing it at `bytecode/<name>.vbc`. Re-adding an
    /// already-present module overwrites its bytes and is idempotent
    /// with respect to the manifest listing.
    pub fn add_bytecode(&mut self, module_path: &str, format_bytes: Vec<u8>) -> &mut Self {
        let is_new = self.entries.insert(bytecode_entry(module_path), format_bytes).is_none();
        if is_new {
            self.manifest.modules.push(module_path.to_string());
        }
        self
    }

    /// Alias for [`Self::add_bytecode`] — the name a caller driving the
    /// loader's packaging path reaches for.
    pub fn add_module(&mut self, module_path: &str, format_bytes: Vec<u8>) -> &mut Self {
        self.add_bytecode(module_path, format_bytes)
    }

    /// Copies an arbitrary local file into the archive under an explicit
    /// archive-relative path, bypassing the `bytecode/`/`native/`
    /// conventions entirely.
    pub fn add_file(&mut self, local_path: &Path, archive_path: &str) -> Result<&mut Self> {
        let bytes = std::fs::read(local_path)?;
        self.entries.insert(archive_path.trim_start_matches('/').to_string(), bytes);
        Ok(self)
    }

    /// Embeds arbitrary JSON content under `resources/<name>.json`.
    pub fn add_json(&mut self, name: &str, content: &serde_json::Value) -> Result<&mut Self> {
        let bytes = serde_json::to_vec_pretty(content).map_err(|e| ModuleError::InvalidFormat(e.to_string()))?;
        let path = format!("{name}.json");
        self.entries.insert(resource_entry(&path), bytes);
        self.manifest.resources.push(path);
        Ok(self)
    }

    /// Copies a compiled native library in from disk under
    /// `native/<platform>/<filename>`.
    pub fn add_native_lib(&mut self, local_path: &Path, platform: &str) -> Result<&mut Self> {
        let bytes = std::fs::read(local_path)?;
        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ModuleError::InvalidFormat("native library path has no filename".to_string()))?
            .to_string();
        self.entries.insert(native_entry(platform, &filename), bytes);
        self.manifest.natives.push((platform.to_string(), filename));
        Ok(self)
    }

    /// Serializes the archive to a ZIP byte stream, atomically: nothing
    /// is written to `entries`/`manifest` partway through, so a
    /// serialization failure never leaves a half-built archive observable
    /// by the caller.
    pub fn finalize(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::FileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);

            zip.start_file(MANIFEST_ENTRY, options)
                .map_err(|e| ModuleError::Io(e.to_string()))?;
            let manifest_json = serde_json::to_vec_pretty(&self.manifest)
                .map_err(|e| ModuleError::InvalidFormat(e.to_string()))?;
            zip.write_all(&manifest_json)
                .map_err(|e| ModuleError::Io(e.to_string()))?;

            for (name, bytes) in &self.entries {
                zip.start_file(name, options)
                    .map_err(|e| ModuleError::Io(e.to_string()))?;
                zip.write_all(bytes).map_err(|e| ModuleError::Io(e.to_string()))?;
            }

            zip.finish().map_err(|e| ModuleError::Io(e.to_string()))?;
        }
        Ok(buf.into_inner())
    }

    /// Serializes and writes the archive to `path`.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let bytes = self.finalize()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-only view over a parsed `.vesparc` archive.
#[derive(Debug)]
pub struct Archive {
    manifest: ArchiveManifest,
    entries: BTreeMap<String, Vec<u8>>,
}

impl Archive {
    /// Opens and fully indexes an archive from raw ZIP bytes.
    pub fn open(bytes: &[u8]) -> Result<Archive> {
        let cursor = Cursor::new(bytes);
        let mut zip = zip::ZipArchive::new(cursor)
            .map_err(|e| ModuleError::InvalidFormat(format!("not a zip archive: {e}")))?;

        let mut manifest: Option<ArchiveManifest> = None;
        let mut entries = BTreeMap::new();

        for i in 0..zip.len() {
            let mut file = zip
                .by_index(i)
                .map_err(|e| ModuleError::Corrupt(e.to_string()))?;
            let name = file.name().to_string();
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)
                .map_err(|e| ModuleError::Io(e.to_string()))?;

            if name == MANIFEST_ENTRY {
                manifest = Some(
                    serde_json::from_slice(&contents)
                        .map_err(|e| ModuleError::InvalidFormat(format!("bad manifest: {e}")))?,
                );
            } else {
                entries.insert(name, contents);
            }
        }

        let manifest = manifest.ok_or_else(|| {
            ModuleError::InvalidFormat("archive missing archive.json".to_string())
        })?;

        Ok(Archive { manifest, entries })
    }

    /// Opens and indexes an archive from a file on disk.
    pub fn open_file(path: &Path) -> Result<Archive> {
        let bytes = std::fs::read(path)?;
        Self::open(&bytes)
    }

    /// The canonical module paths this archive declares, in manifest
    /// order.
    pub fn module_paths(&self) -> &[String] {
        &self.manifest.modules
    }

    /// Retrieves the raw module-format bytes for `module_path`.
    pub fn get_module_bytes(&self, module_path: &str) -> Option<&[u8]> {
        self.entries.get(&bytecode_entry(module_path)).map(|v| v.as_slice())
    }

    /// Alias matching the writer-side naming for a module's bytecode.
    pub fn extract_bytecode(&self, module_name: &str) -> Option<&[u8]> {
        self.get_module_bytes(module_name)
    }

    /// True if `module_path` is present in this archive.
    pub fn contains(&self, module_path: &str) -> bool {
        self.entries.contains_key(&bytecode_entry(module_path))
    }

    /// Number of modules in this archive.
    pub fn len(&self) -> usize {
        self.manifest.modules.len()
    }

    /// True if the archive declares no modules.
    pub fn is_empty(&self) -> bool {
        self.manifest.modules.is_empty()
    }

    /// Reads back a `resources/<name>.json` entry as parsed JSON.
    pub fn extract_json(&self, name: &str) -> Result<serde_json::Value> {
        let path = resource_entry(&format!("{name}.json"));
        let bytes = self
            .entries
            .get(&path)
            .ok_or_else(|| ModuleError::ModuleNotFound(crate::module_system::module_id::ModulePath::new(name)))?;
        serde_json::from_slice(bytes).map_err(|e| ModuleError::InvalidFormat(e.to_string()))
    }

    /// True if a native library for `platform` is present.
    pub fn has_native_lib(&self, platform: &str) -> bool {
        self.manifest.natives.iter().any(|(p, _)| p == platform)
    }

    /// Writes the `platform` native library out to `output_path` on disk,
    /// for the loader to `dlopen` directly (it cannot load straight out
    /// of the archive's in-memory bytes).
    pub fn extract_native_lib(&self, platform: &str, output_path: &Path) -> Result<()> {
        let filename = self
            .manifest
            .natives
            .iter()
            .find(|(p, _)| p == platform)
            .map(|(_, f)| f.clone())
            .ok_or_else(|| ModuleError::NativeSymbolMissing(format!("no native library for platform {platform}")))?;
        let bytes = self
            .entries
            .get(&native_entry(platform, &filename))
            .ok_or_else(|| ModuleError::Corrupt(format!("native entry for {platform} missing from archive")))?;
        std::fs::write(output_path, bytes)?;
        Ok(())
    }

    /// Every entry path this archive holds, manifest entry excluded.
    pub fn entries(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_system::format::{ExportKind, ModuleWriter};

    fn sample_module_bytes(name: &str) -> Vec<u8> {
        let mut w = ModuleWriter::new();
        w.add_metadata(name, "1.0.0")
            .add_export("f", ExportKind::Function, 0, "()->Int")
            .add_bytecode(&[1, 2, 3]);
        w.finalize()
    }

    #[test]
    fn round_trip_multiple_modules() {
        let mut writer = ArchiveWriter::new();
        writer.add_module("@pkg.a", sample_module_bytes("pkg.a"));
        writer.add_module("@pkg.b", sample_module_bytes("pkg.b"));
        let bytes = writer.finalize().unwrap();

        let archive = Archive::open(&bytes).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.contains("@pkg.a"));
        assert!(archive.contains("@pkg.b"));
        assert_eq!(
            archive.module_paths(),
            &["@pkg.a".to_string(), "@pkg.b".to_string()]
        );
        assert!(archive.get_module_bytes("@pkg.a").is_some());
    }

    #[test]
    fn readding_a_module_path_is_idempotent_in_the_manifest() {
        let mut writer = ArchiveWriter::new();
        writer.add_module("@pkg.a", sample_module_bytes("pkg.a"));
        writer.add_module("@pkg.a", sample_module_bytes("pkg.a"));
        let bytes = writer.finalize().unwrap();
        let archive = Archive::open(&bytes).unwrap();
        assert_eq!(archive.module_paths(), &["@pkg.a".to_string()]);
    }

    #[test]
    fn resource_json_round_trips() {
        let mut writer = ArchiveWriter::new();
        writer.add_module("@pkg.a", sample_module_bytes("pkg.a"));
        writer.add_json("config", &serde_json::json!({"k": "v"})).unwrap();
        let archive = Archive::open(&writer.finalize().unwrap()).unwrap();
        assert_eq!(archive.extract_json("config").unwrap(), serde_json::json!({"k": "v"}));
    }

    #[test]
    fn native_lib_round_trips_through_extraction() {
        let dir = tempfile::TempDir::new().unwrap();
        let lib_path = dir.path().join("libplugin.so");
        std::fs::write(&lib_path, b"not really an elf").unwrap();

        let mut writer = ArchiveWriter::new();
        writer.add_module("@pkg.a", sample_module_bytes("pkg.a"));
        writer.add_native_lib(&lib_path, "linux-x86_64").unwrap();
        let archive = Archive::open(&writer.finalize().unwrap()).unwrap();

        assert!(archive.has_native_lib("linux-x86_64"));
        let out_path = dir.path().join("extracted.so");
        archive.extract_native_lib("linux-x86_64", &out_path).unwrap();
        assert_eq!(std::fs::read(&out_path).unwrap(), b"not really an elf");
    }

    #[test]
    fn add_file_copies_arbitrary_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let src = dir.path().join("readme.txt");
        std::fs::write(&src, b"hello").unwrap();

        let mut writer = ArchiveWriter::new();
        writer.add_module("@pkg.a", sample_module_bytes("pkg.a"));
        writer.add_file(&src, "docs/readme.txt").unwrap();
        let archive = Archive::open(&writer.finalize().unwrap()).unwrap();
        assert!(archive.entries().contains(&"docs/readme.txt"));
    }

    #[test]
    fn missing_manifest_is_invalid_format() {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            zip.start_file("stray.txt", zip::write::FileOptions::default())
                .unwrap();
            zip.write_all(b"nope").unwrap();
            zip.finish().unwrap();
        }
        let err = Archive::open(&buf.into_inner()).unwrap_err();
        assert!(matches!(err, ModuleError::InvalidFormat(_)));
    }

    #[test]
    fn not_a_zip_is_invalid_format() {
        let err = Archive::open(b"definitely not a zip").unwrap_err();
        assert!(matches!(err, ModuleError::InvalidFormat(_)));
    }
}
