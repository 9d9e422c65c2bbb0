//! Store configuration.
//!
//! A [`StoreConfig`] carries everything needed to open one store. It is
//! usually deserialized from JSON:
//!
//! ```json
//! {
//!   "location": "stores/main.cs",
//!   "relative-to": "/var/lib/app",
//!   "create": true,
//!   "credential-reference": { "clear-text": "changeit" }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CredentialStoreError, StoreResult};
use crate::types::StoreName;

/// Store type used when none is configured.
pub const DEFAULT_STORE_TYPE: &str = "file";

/// Store type served by [`MemoryProvider`](crate::backend::MemoryProvider).
pub const MEMORY_STORE_TYPE: &str = "memory";

/// Store types that keep their data in a single file and need a location.
pub const FILE_BASED_STORE_TYPES: &[&str] = &[DEFAULT_STORE_TYPE];

const DEFAULT_READINESS_TIMEOUT_MS: u64 = 500;

/// Default bound on how long an operation waits for a store to come up.
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_millis(DEFAULT_READINESS_TIMEOUT_MS);

/// Configuration of one credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Where the store lives; required by file-based types.
    pub location: Option<PathBuf>,
    /// Base path a relative `location` is resolved against.
    pub relative_to: Option<PathBuf>,
    /// Create the store if it does not exist.
    pub create: bool,
    /// Allow mutations.
    pub modifiable: bool,
    /// Backend-specific settings passed through untouched.
    pub implementation_properties: BTreeMap<String, String>,
    /// Backend type; [`DEFAULT_STORE_TYPE`] when unset.
    #[serde(rename = "type")]
    pub store_type: Option<String>,
    /// Name of the crypto provider to use.
    pub provider_name: Option<String>,
    /// Primary crypto provider source.
    pub providers: Option<String>,
    /// Additional crypto provider source.
    pub other_providers: Option<String>,
    /// Where the password protecting the store comes from.
    pub credential_reference: Option<CredentialReference>,
    /// Readiness window, in milliseconds.
    pub readiness_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            location: None,
            relative_to: None,
            create: false,
            modifiable: true,
            implementation_properties: BTreeMap::new(),
            store_type: None,
            provider_name: None,
            providers: None,
            other_providers: None,
            credential_reference: None,
            readiness_timeout_ms: DEFAULT_READINESS_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error for malformed input or unknown keys.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Configuration for an in-memory store.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            store_type: Some(MEMORY_STORE_TYPE.to_owned()),
            ..Self::default()
        }
    }

    /// Configuration for a file store at `location`.
    #[must_use]
    pub fn file(location: impl Into<PathBuf>) -> Self {
        Self {
            location: Some(location.into()),
            store_type: Some(DEFAULT_STORE_TYPE.to_owned()),
            ..Self::default()
        }
    }

    /// Sets whether a missing store is created.
    #[must_use]
    pub const fn with_create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// Sets whether the store accepts mutations.
    #[must_use]
    pub const fn with_modifiable(mut self, modifiable: bool) -> Self {
        self.modifiable = modifiable;
        self
    }

    /// Sets the credential reference.
    #[must_use]
    pub fn with_credential_reference(mut self, reference: CredentialReference) -> Self {
        self.credential_reference = Some(reference);
        self
    }

    /// Sets one implementation property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.implementation_properties
            .insert(name.into(), value.into());
        self
    }

    /// Sets the readiness window.
    #[must_use]
    pub fn with_readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// The configured store type, or [`DEFAULT_STORE_TYPE`].
    #[must_use]
    pub fn store_type(&self) -> &str {
        self.store_type.as_deref().unwrap_or(DEFAULT_STORE_TYPE)
    }

    /// Whether the store type keeps its data in a single file.
    #[must_use]
    pub fn is_file_based(&self) -> bool {
        let store_type = self.store_type();
        FILE_BASED_STORE_TYPES
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(store_type))
    }

    /// Validates the configuration for `store` and fills in defaults.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::InvalidConfig`] if a string setting is
    /// empty or a file-based type has no location.
    pub fn resolve(mut self, store: &StoreName) -> StoreResult<Self> {
        let invalid = |reason: String| CredentialStoreError::InvalidConfig {
            store: store.clone(),
            reason,
        };
        if self.store_type.as_deref().is_some_and(str::is_empty) {
            return Err(invalid("type must not be empty".to_owned()));
        }
        if self
            .location
            .as_ref()
            .is_some_and(|location| location.as_os_str().is_empty())
        {
            return Err(invalid("location must not be empty".to_owned()));
        }
        self.store_type
            .get_or_insert_with(|| DEFAULT_STORE_TYPE.to_owned());
        if self.location.is_none() && self.is_file_based() {
            return Err(invalid(format!(
                "store type '{}' is file based and requires a location",
                self.store_type()
            )));
        }
        Ok(self)
    }

    /// `location` joined onto `relative-to` when it is relative.
    #[must_use]
    pub fn resolved_location(&self) -> Option<PathBuf> {
        match (&self.relative_to, &self.location) {
            (Some(base), Some(location)) if location.is_relative() => Some(base.join(location)),
            (_, location) => location.clone(),
        }
    }

    /// The readiness window.
    #[must_use]
    pub const fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    /// Configured crypto provider names, in order of preference.
    #[must_use]
    pub fn provider_names(&self) -> Vec<String> {
        [&self.provider_name, &self.providers, &self.other_providers]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }
}

/// Where a store's protecting password comes from: either inline clear text
/// or an entry in another, already registered store.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CredentialReference {
    /// Inline password.
    pub clear_text: Option<String>,
    /// Store holding the password.
    pub store: Option<String>,
    /// Alias of the password in `store`.
    pub alias: Option<String>,
}

impl CredentialReference {
    /// Reference to an inline password.
    #[must_use]
    pub fn clear_text(secret: impl Into<String>) -> Self {
        Self {
            clear_text: Some(secret.into()),
            ..Self::default()
        }
    }

    /// Reference to a password held by another store.
    #[must_use]
    pub fn store_entry(store: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            clear_text: None,
            store: Some(store.into()),
            alias: Some(alias.into()),
        }
    }

    /// Adds an inline password to a store-entry reference. Adding a store
    /// with such a reference first writes the password into the referenced
    /// store.
    #[must_use]
    pub fn with_clear_text(mut self, secret: impl Into<String>) -> Self {
        self.clear_text = Some(secret.into());
        self
    }
}

impl fmt::Debug for CredentialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialReference")
            .field("clear_text", &self.clear_text.as_ref().map(|_| "[REDACTED]"))
            .field("store", &self.store)
            .field("alias", &self.alias)
            .finish()
    }
}
