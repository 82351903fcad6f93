//! Module path identity.
//!
//! Generalizes the teacher crate's `ModuleId`/`ModuleNamespace` (a closed
//! `(lambdust foo)` / `(scheme foo)` notation) into the canonical,
//! interned path this spec's loader resolves and caches by.

use crate::module_system::strings::{global_pool, InternedString};
use std::fmt;

/// A module's canonical, interned path — the cache key.
///
/// Two `ModulePath`s with the same textual spec always compare equal,
/// regardless of which loader tier produced them, since both intern
/// through the same process-wide [`crate::module_system::strings::StringPool`].
#[derive(Clone)]
pub struct ModulePath(InternedString);

impl ModulePath {
    /// Interns `spec` as a canonical module path.
    pub fn new(spec: &str) -> Self {
        Self(global_pool().intern(spec))
    }

    /// Borrows the path text.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl fmt::Debug for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModulePath({:?})", self.0.as_str())
    }
}

impl PartialEq for ModulePath {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}
impl Eq for ModulePath {}

impl std::hash::Hash for ModulePath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.as_str().hash(state);
    }
}

impl From<&str> for ModulePath {
    fn from(s: &str) -> Self {
        ModulePath::new(s)
    }
}

impl From<String> for ModulePath {
    fn from(s: String) -> Self {
        ModulePath::new(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_specs_produce_equal_paths() {
        let a = ModulePath::new("@json");
        let b = ModulePath::new("@json");
        assert_eq!(a, b);
    }
}
