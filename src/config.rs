//! Runtime configuration, read once from the process environment.
//!
//! Mirrors the teacher crate's preference for explicit, fallible
//! construction over a global mutable config: callers build a
//! [`RuntimeConfig`] once (typically at process start) and thread it
//! through rather than re-reading `std::env` from deep call sites.

use std::path::PathBuf;

/// Module search paths, feature toggles, and diagnostics settings
/// resolved from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directories searched by the System resolver tier, from
    /// `VESPER_MODULE_PATH` (platform path-list syntax).
    pub module_path: Vec<PathBuf>,
    /// Whether modules defer executing their top-level chunk until
    /// first access, from `VESPER_LAZY_MODULES` (`1`/`true`/`yes`).
    pub lazy_modules: bool,
    /// Whether debug-only diagnostics (e.g. verbose hook tracing) are
    /// enabled, from `VESPER_DEBUG`.
    pub debug: bool,
    /// The compiled-module disk cache directory: `$HOME/.vesper/cache`
    /// unless overridden.
    pub cache_dir: PathBuf,
    /// Minimum log level, from `VESPER_LOG_LEVEL` (defaults to `info`).
    pub log_level: String,
    /// Module-path filter for log output, from `VESPER_LOG_MODULES`
    /// (comma-separated prefixes; empty means unfiltered).
    pub log_modules: Vec<String>,
    /// Destination log file, from `VESPER_LOG_FILE`; stderr if unset.
    pub log_file: Option<PathBuf>,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

impl RuntimeConfig {
    /// Builds a config by reading the current process environment.
    pub fn from_env() -> Self {
        let module_path = std::env::var("VESPER_MODULE_PATH")
            .map(|raw| std::env::split_paths(&raw).collect())
            .unwrap_or_default();

        let cache_dir = std::env::var("VESPER_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".vesper")
                    .join("cache")
            });

        let log_modules = std::env::var("VESPER_LOG_MODULES")
            .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Self {
            module_path,
            lazy_modules: env_flag("VESPER_LAZY_MODULES"),
            debug: env_flag("VESPER_DEBUG"),
            cache_dir,
            log_level: std::env::var("VESPER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_modules,
            log_file: std::env::var("VESPER_LOG_FILE").ok().map(PathBuf::from),
        }
    }

    /// Ensures the compiled-module cache directory exists, creating it
    /// (and parents) if necessary.
    pub fn ensure_cache_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.cache_dir)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            module_path: Vec::new(),
            lazy_modules: false,
            debug: false,
            cache_dir: PathBuf::from(".vesper-cache"),
            log_level: "info".to_string(),
            log_modules: Vec::new(),
            log_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment-variable tests serialize via this lock: std::env is
    // process-global and cargo test runs test functions concurrently.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn lazy_modules_flag_accepts_common_truthy_spellings() {
        let _guard = ENV_LOCK.lock().unwrap();
        for value in ["1", "true", "TRUE", "yes"] {
            std::env::set_var("VESPER_LAZY_MODULES", value);
            assert!(RuntimeConfig::from_env().lazy_modules, "value={value}");
        }
        std::env::remove_var("VESPER_LAZY_MODULES");
        assert!(!RuntimeConfig::from_env().lazy_modules);
    }

    #[test]
    fn log_modules_splits_and_trims_comma_list() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("VESPER_LOG_MODULES", "json, crypto ,,http");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.log_modules, vec!["json", "crypto", "http"]);
        std::env::remove_var("VESPER_LOG_MODULES");
    }

    #[test]
    fn default_log_level_is_info() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("VESPER_LOG_LEVEL");
        assert_eq!(RuntimeConfig::from_env().log_level, "info");
    }
}
