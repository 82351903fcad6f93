//! C10 — `module.json` package metadata (spec §3 "Package Manifest").
//!
//! Parsed with `serde_json` rather than a hand-rolled reader, since the
//! manifest is author-facing JSON rather than a wire format needing
//! byte-exact control.

use crate::module_system::error::{ModuleError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The parsed contents of a `module.json` package manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Package name (becomes the canonical module path's base).
    pub name: String,
    /// Package version.
    pub version: String,
    /// `name -> version requirement` dependency pairs, in declaration
    /// order.
    #[serde(default)]
    pub dependencies: IndexMap<String, String>,
    /// Relative path to the module's entry source/bytecode file, if not
    /// the package-name default.
    #[serde(default)]
    pub main: Option<String>,
    /// Whether this module should defer executing its top-level chunk
    /// until first access, per spec §4.5 / `VESPER_LAZY_MODULES`.
    #[serde(default)]
    pub lazy: bool,
    /// Native library descriptor, if this package ships a native side.
    #[serde(default)]
    pub native: Option<NativePackageInfo>,
}

/// Native-library fields of a package manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativePackageInfo {
    /// Relative path to the shared object/DLL.
    pub library: String,
    /// Symbol name of the native init entry point.
    #[serde(default = "default_init_symbol")]
    pub init_symbol: String,
}

fn default_init_symbol() -> String {
    "vesper_module_init".to_string()
}

impl PackageManifest {
    /// Parses a manifest from its JSON text.
    pub fn parse(json: &str) -> Result<PackageManifest> {
        serde_json::from_str(json)
            .map_err(|e| ModuleError::InvalidFormat(format!("module.json: {e}")))
    }

    /// Reads and parses `module.json` from `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<PackageManifest> {
        let path = dir.join("module.json");
        let text = std::fs::read_to_string(&path)?;
        Self::parse(&text)
    }

    /// Serializes back to pretty JSON text.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ModuleError::InvalidFormat(e.to_string()))
    }

    /// Checks every dependency's requirement against a resolver
    /// callback that reports the installed version, if any.
    pub fn check_dependencies<F>(&self, mut installed_version: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        for (name, requirement) in &self.dependencies {
            match installed_version(name) {
                Some(found) if crate::module_system::version::version_satisfies(&found, requirement) => {}
                Some(found) => {
                    return Err(ModuleError::VersionRequirementUnsatisfied {
                        name: name.clone(),
                        requirement: requirement.clone(),
                        found,
                    });
                }
                None => {
                    return Err(ModuleError::VersionRequirementUnsatisfied {
                        name: name.clone(),
                        requirement: requirement.clone(),
                        found: "not installed".to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_manifest() {
        let m = PackageManifest::parse(r#"{"name":"json","version":"1.0.0"}"#).unwrap();
        assert_eq!(m.name, "json");
        assert!(!m.lazy);
        assert!(m.native.is_none());
    }

    #[test]
    fn parses_full_manifest_with_native_and_deps() {
        let json = r#"{
            "name": "crypto",
            "version": "2.1.0",
            "dependencies": {"json": ">=1.0.0"},
            "main": "init.vbc",
            "lazy": true,
            "native": {"library": "libcrypto_native.so"}
        }"#;
        let m = PackageManifest::parse(json).unwrap();
        assert_eq!(m.dependencies.get("json").unwrap(), ">=1.0.0");
        assert!(m.lazy);
        let native = m.native.unwrap();
        assert_eq!(native.library, "libcrypto_native.so");
        assert_eq!(native.init_symbol, "vesper_module_init");
    }

    #[test]
    fn check_dependencies_reports_unsatisfied() {
        let m = PackageManifest::parse(
            r#"{"name":"app","version":"1.0.0","dependencies":{"json":">=2.0.0"}}"#,
        )
        .unwrap();
        let err = m.check_dependencies(|_| Some("1.0.0".to_string())).unwrap_err();
        assert!(matches!(err, ModuleError::VersionRequirementUnsatisfied { .. }));
    }

    #[test]
    fn check_dependencies_reports_missing() {
        let m = PackageManifest::parse(
            r#"{"name":"app","version":"1.0.0","dependencies":{"json":">=1.0.0"}}"#,
        )
        .unwrap();
        let err = m.check_dependencies(|_| None).unwrap_err();
        assert!(matches!(err, ModuleError::VersionRequirementUnsatisfied { .. }));
    }

    #[test]
    fn check_dependencies_passes_when_satisfied() {
        let m = PackageManifest::parse(
            r#"{"name":"app","version":"1.0.0","dependencies":{"json":">=1.0.0"}}"#,
        )
        .unwrap();
        assert!(m.check_dependencies(|_| Some("1.2.0".to_string())).is_ok());
    }
}
