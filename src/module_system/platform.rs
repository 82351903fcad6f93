//! C2 — a uniform facade over threads, locks, dynamic libraries, and glob
//! matching, so the rest of the module subsystem never reaches for
//! `std::sync`, `libloading`, or `globset` directly.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A mutex whose lock methods panic with a clear message on poisoning
/// rather than propagating `PoisonError`, matching the teacher crate's
/// `.expect("... lock poisoned")` convention throughout `module_system`.
#[derive(Debug, Default)]
pub struct Lock<T>(Mutex<T>);

impl<T> Lock<T> {
    /// Wraps a value in a new lock.
    pub fn new(value: T) -> Self {
        Self(Mutex::new(value))
    }

    /// Acquires the lock, panicking if poisoned.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock().expect("lock poisoned")
    }
}

/// A reader-writer lock with the same poison-is-a-bug policy as [`Lock`].
#[derive(Debug, Default)]
pub struct SharedLock<T>(RwLock<T>);

impl<T> SharedLock<T> {
    /// Wraps a value in a new shared lock.
    pub fn new(value: T) -> Self {
        Self(RwLock::new(value))
    }

    /// Acquires a shared (read) guard.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().expect("rwlock poisoned")
    }

    /// Acquires an exclusive (write) guard.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().expect("rwlock poisoned")
    }
}

/// A loaded native (dynamic) library and a cursor for symbol lookup.
///
/// Thin wrapper over `libloading::Library` so the rest of the crate only
/// ever imports `platform::DynamicLibrary`.
pub struct DynamicLibrary {
    inner: libloading::Library,
    path: std::path::PathBuf,
}

impl DynamicLibrary {
    /// Loads a shared object/DLL from `path`.
    ///
    /// # Safety
    /// Loading and running arbitrary native code is inherently unsafe;
    /// the caller is trusted to load only libraries it intends to run.
    pub unsafe fn open(path: &std::path::Path) -> std::io::Result<Self> {
        let inner = Self::open_with_global_symbols(path)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        Ok(Self {
            inner,
            path: path.to_path_buf(),
        })
    }

    /// Loads with `RTLD_NOW | RTLD_GLOBAL` on Unix so a native module's
    /// symbols are visible to libraries it in turn `dlopen`s (native
    /// modules that bind against each other), falling back to
    /// `libloading`'s platform default elsewhere.
    #[cfg(unix)]
    unsafe fn open_with_global_symbols(
        path: &std::path::Path,
    ) -> Result<libloading::Library, libloading::Error> {
        use libloading::os::unix::Library as UnixLibrary;
        UnixLibrary::open(Some(path), libc::RTLD_NOW | libc::RTLD_GLOBAL).map(Into::into)
    }

    #[cfg(not(unix))]
    unsafe fn open_with_global_symbols(
        path: &std::path::Path,
    ) -> Result<libloading::Library, libloading::Error> {
        libloading::Library::new(path)
    }

    /// Looks up a C ABI symbol by name, returning its raw address cast
    /// to a native module-init function pointer.
    ///
    /// # Safety
    /// The caller must ensure `symbol` actually refers to a function
    /// with the `NativeInitFn` signature.
    pub unsafe fn find_init_symbol(&self, symbol: &str) -> Option<NativeInitFn> {
        let cname = format!("{symbol}\0");
        self.inner
            .get::<NativeInitFn>(cname.as_bytes())
            .ok()
            .map(|sym| *sym)
    }

    /// The path this library was loaded from.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl std::fmt::Debug for DynamicLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicLibrary")
            .field("path", &self.path)
            .finish()
    }
}

/// Signature every native module's init entry point must match:
/// `extern "C" fn(*mut ExportSink) -> bool`. `ExportSink` is an opaque
/// pointer the host VM passes in so the native code can register
/// exports via VM-provided callbacks; this crate treats it as opaque.
pub type NativeInitFn = unsafe extern "C" fn(*mut std::ffi::c_void) -> bool;

/// Compiles a glob pattern for matching module paths (inspect's
/// by-path search) or cached-install probes.
pub fn glob_matcher(pattern: &str) -> Option<globset::GlobMatcher> {
    globset::Glob::new(pattern).ok().map(|g| g.compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_basic() {
        let lock = Lock::new(0);
        *lock.lock() += 1;
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn shared_lock_basic() {
        let lock = SharedLock::new(vec![1, 2, 3]);
        assert_eq!(lock.read().len(), 3);
        lock.write().push(4);
        assert_eq!(lock.read().len(), 4);
    }

    #[test]
    fn glob_matcher_matches_suffix() {
        let m = glob_matcher("*.scm").unwrap();
        assert!(m.is_match("foo.scm"));
        assert!(!m.is_match("foo.txt"));
    }
}
