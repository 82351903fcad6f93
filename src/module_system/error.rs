//! Error kinds for the module subsystem (spec §7).
//!
//! Kept as a flat hand-rolled enum with manual `Display`/`Error` impls,
//! in the spirit of the teacher crate's custom diagnostics system rather
//! than a derive-macro error crate.

use crate::module_system::module_id::ModulePath;
use std::fmt;

/// The result type used throughout the module subsystem.
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Error kinds produced by resolution, loading, linking, and unloading.
#[derive(Debug, Clone)]
pub enum ModuleError {
    /// Resolution could not find a file, directory, or native library
    /// matching the spec.
    ModuleNotFound(ModulePath),
    /// A module-format or archive file's header did not match the
    /// expected magic/layout.
    InvalidFormat(String),
    /// A module-format file's version field is not one this reader
    /// understands.
    UnsupportedVersion(u16),
    /// A read ended before the expected number of bytes were available.
    Truncated(String),
    /// A checksum (CRC32) did not match.
    Corrupt(String),
    /// The source collaborator failed to parse a source file.
    ParseError(String),
    /// The compiler collaborator failed to compile a parsed module.
    CompileError(String),
    /// Running a module's chunk in the VM raised or aborted.
    LoadExecutionFailed(String),
    /// A module transitively imports itself while still `Loading`.
    CircularDependency(Vec<ModulePath>),
    /// A native library does not export the expected init symbol.
    NativeSymbolMissing(String),
    /// A native library's init function returned failure.
    NativeInitFailed(String),
    /// A dependency's declared version does not satisfy the requirement.
    VersionRequirementUnsatisfied {
        /// The dependency name.
        name: String,
        /// The requirement string that was not satisfied.
        requirement: String,
        /// The version that failed to satisfy it.
        found: String,
    },
    /// An `on_init` hook returned `false`, aborting module initialization.
    HookRejected {
        /// The module whose init was rejected.
        module: ModulePath,
        /// The hook that rejected it, for diagnostics.
        hook: String,
    },
    /// Unload was attempted on a module with a nonzero reference count
    /// and `force` was not set.
    Busy(ModulePath),
    /// Filesystem or archive I/O failure.
    Io(String),
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleError::ModuleNotFound(path) => write!(f, "module not found: {path}"),
            ModuleError::InvalidFormat(msg) => write!(f, "invalid format: {msg}"),
            ModuleError::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            ModuleError::Truncated(what) => write!(f, "truncated while reading {what}"),
            ModuleError::Corrupt(msg) => write!(f, "corrupt: {msg}"),
            ModuleError::ParseError(msg) => write!(f, "parse error: {msg}"),
            ModuleError::CompileError(msg) => write!(f, "compile error: {msg}"),
            ModuleError::LoadExecutionFailed(msg) => write!(f, "execution failed: {msg}"),
            ModuleError::CircularDependency(cycle) => {
                let joined = cycle
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                write!(f, "circular dependency: {joined}")
            }
            ModuleError::NativeSymbolMissing(sym) => write!(f, "native symbol missing: {sym}"),
            ModuleError::NativeInitFailed(msg) => write!(f, "native init failed: {msg}"),
            ModuleError::VersionRequirementUnsatisfied {
                name,
                requirement,
                found,
            } => write!(
                f,
                "dependency '{name}' requires {requirement}, found {found}"
            ),
            ModuleError::HookRejected { module, hook } => {
                write!(f, "hook '{hook}' rejected init of {module}")
            }
            ModuleError::Busy(path) => write!(f, "module busy (ref_count > 0): {path}"),
            ModuleError::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for ModuleError {}

impl From<std::io::Error> for ModuleError {
    fn from(e: std::io::Error) -> Self {
        ModuleError::Io(e.to_string())
    }
}
