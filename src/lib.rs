//! The module subsystem for the vesper runtime: discovery, loading,
//! linking, caching, and unloading of compiled modules.
//!
//! This crate owns everything between "a script says `import \"@json\"`"
//! and "here is a live, linked [`module_system::Module`] with its
//! exports ready to read" — resolution across the four-tier loader
//! hierarchy, the on-disk binary module format, ZIP-based archives and
//! application bundles, a thread-safe LRU cache, lifecycle hooks, and
//! introspection. Lexing, parsing, compiling, and executing script
//! source are external collaborators this crate only talks to through
//! the [`module_system::loader::Executor`] seam and the [`bytecode`]
//! and [`value`] stand-in types.
//!
//! ```
//! use vesper_modules::module_system::{ModuleLoader, ResolverConfig};
//! use vesper_modules::module_system::loader::Executor;
//! use vesper_modules::module_system::module::Module;
//! use vesper_modules::module_system::format::ExportRecord;
//! use vesper_modules::bytecode::Chunk;
//! use vesper_modules::module_system::Result;
//!
//! struct NoopExecutor;
//! impl Executor for NoopExecutor {
//!     fn execute(&self, _m: &Module, _c: &Chunk, _e: &[ExportRecord]) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let loader = ModuleLoader::new(ResolverConfig::default(), NoopExecutor);
//! let builtins = loader.load("@__builtins__").unwrap();
//! assert!(builtins.get_export("print").is_some());
//! ```

#![warn(missing_docs)]
#![warn(unused_variables)]
#![warn(unused_imports)]
#![warn(dead_code)]

/// Runtime configuration read from the environment (spec §3 "Config").
pub mod config;
/// Structured logging setup (spec §3 "Logging").
pub mod logging;
/// The module subsystem proper: resolution, loading, caching, unloading.
pub mod module_system;

/// Stand-in for the compiler's bytecode chunk and its on-disk wire
/// format.
pub mod bytecode;
/// Stand-in for the VM's runtime value representation.
pub mod value;

pub use module_system::{Module, ModuleError, ModuleLoader, ModulePath, ResolverConfig};
