//! # stash Configuration
//!
//! A minimal configuration system based on a string key/value store.
//! Applications set values directly or layer them from the environment.
//!
//! ## Setting and reading values
//! ```rust
//! use stash_core::StashConfig;
//! let mut config = StashConfig::new();
//!
//! config.set("http.port", "3030");
//! config.set("mode", "development");
//!
//! assert_eq!(config.get("http.port"), Some("3030"));
//! assert_eq!(config.snapshot().get_u64("http.port"), Some(3030));
//! ```
//!
//! ## Environment overrides
//! `load_env` maps prefixed variables onto dotted keys:
//!
//! ```bash
//! export STASH__HTTP__PORT=8080        # http.port
//! export STASH__STORE__KIND=s3         # store.kind
//! ```
//!
//! A few well-known unprefixed variables are honoured as well, see
//! [`StashConfig::load_well_known_env`].

use std::collections::HashMap;

/// Unprefixed environment variables and the keys they populate.
const WELL_KNOWN_ENV: &[(&str, &str)] = &[
    ("BLOB_READ_WRITE_TOKEN", "store.token"),
    ("BLOB_CALLBACK_URL", "callback.base_url"),
];

#[derive(Debug, Default, Clone)]
pub struct StashConfig {
    values: HashMap<String, String>,
}

impl StashConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Create a config store populated from the process environment:
    /// well-known variables first, then `prefix`ed ones (which win).
    pub fn from_env(prefix: &str) -> Self {
        let mut config = Self::new();
        config.load_well_known_env();
        config.load_env(prefix);
        config
    }

    /// Set a configuration key to a string value.
    ///
    /// Example: config.set("http.port", "3030")
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Get a configuration value by key.
    ///
    /// Returns None if the key is not present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Check whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Copy every `PREFIX…` variable from the environment into the store.
    ///
    /// `STASH__CALLBACK__BASE_URL` → `callback.base_url`
    pub fn load_env(&mut self, prefix: &str) {
        self.load_vars(prefix, std::env::vars());
    }

    /// Copy the unprefixed, conventional variables (store credential and
    /// callback override) into the store.
    pub fn load_well_known_env(&mut self) {
        for (var, key) in WELL_KNOWN_ENV {
            if let Ok(value) = std::env::var(var) {
                self.set(*key, value);
            }
        }
    }

    fn load_vars<I>(&mut self, prefix: &str, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                if !normalized.is_empty() {
                    self.set(normalized, value);
                }
            }
        }
    }

    pub fn snapshot(&self) -> StashConfigSnapshot {
        StashConfigSnapshot::new(self.values.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StashConfigSnapshot {
    map: HashMap<String, String>,
}

impl StashConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.parse::<bool>().ok())
    }

    /// `mode = development` switches on raw error details in responses.
    pub fn is_development(&self) -> bool {
        self.get("mode")
            .map(|m| m.eq_ignore_ascii_case("development"))
            .unwrap_or(false)
    }
}
