//! Environment configuration snapshot handed to service registration.

use std::collections::BTreeMap;

use crate::traits::ConfigSource;

/// Ordered snapshot of environment variables.
///
/// Equality and hashing cover every key and value, which is what
/// [`RegistryPool`](super::RegistryPool) keys registries on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Snapshot the current process environment. Non-UTF-8 entries are skipped.
    #[must_use]
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        }
    }

    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Returns a copy with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl ConfigSource for Environment {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}
