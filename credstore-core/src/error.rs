//! Error types for credential store management.

use thiserror::Error;

use crate::backend::BackendError;
use crate::service::StoreState;
use crate::types::{Alias, CredentialKind, StoreName};

/// Result type for credential store operations.
pub type StoreResult<T> = Result<T, CredentialStoreError>;

/// Errors raised by credential stores, their registry and the dispatcher.
#[derive(Debug, Error)]
pub enum CredentialStoreError {
    /// The store did not reach `Up` within the readiness window.
    #[error("credential store '{store}' is not ready (state: {state})")]
    ServiceNotReady {
        /// Store that was addressed.
        store: StoreName,
        /// State observed when the wait ended.
        state: StoreState,
    },

    /// The backend failed to load, read, write or flush.
    #[error("credential store '{store}' backend failure{}: {source}", alias_context(.alias))]
    Backend {
        /// Store whose backend failed.
        store: StoreName,
        /// Alias being operated on, if any.
        alias: Option<Alias>,
        /// Underlying backend error.
        #[source]
        source: BackendError,
    },

    /// An entry already exists at the alias.
    #[error("credential store '{store}' already holds a {kind} at alias '{alias}'")]
    AlreadyExists {
        /// Store that was addressed.
        store: StoreName,
        /// Alias that is already taken.
        alias: Alias,
        /// Type of the entry already held there.
        kind: CredentialKind,
    },

    /// No entry of the requested type exists at the alias.
    #[error("credential store '{store}' holds no {kind} at alias '{alias}'")]
    NotFound {
        /// Store that was addressed.
        store: StoreName,
        /// Alias that was looked up.
        alias: Alias,
        /// Entry type that was requested.
        kind: CredentialKind,
    },

    /// The entry type is not supported by the operation.
    #[error("credential store '{store}' does not support entry type '{entry_type}' here")]
    UnsupportedEntryType {
        /// Store that was addressed.
        store: StoreName,
        /// Entry type as supplied by the caller.
        entry_type: String,
    },

    /// Requested key size is not 128, 192 or 256 bits.
    #[error(
        "credential store '{store}' rejected key size {bits} for alias '{alias}' (expected 128, 192 or 256)"
    )]
    UnsupportedKeySize {
        /// Store that was addressed.
        store: StoreName,
        /// Alias the key was meant for.
        alias: Alias,
        /// Requested size in bits.
        bits: u32,
    },

    /// The supplied key encoding could not be decoded.
    #[error("credential store '{store}' could not decode the key for alias '{alias}': {reason}")]
    MalformedKeyEncoding {
        /// Store that was addressed.
        store: StoreName,
        /// Alias the key was meant for.
        alias: Alias,
        /// Decoder diagnostic.
        reason: String,
    },

    /// The random source failed while generating a key.
    #[error("credential store '{store}' could not generate a key for alias '{alias}': {reason}")]
    CryptoProvider {
        /// Store that was addressed.
        store: StoreName,
        /// Alias the key was meant for.
        alias: Alias,
        /// Provider diagnostic.
        reason: String,
    },

    /// A store name or alias was empty.
    #[error("invalid {kind}: must not be empty")]
    InvalidIdentifier {
        /// Which identifier was rejected.
        kind: &'static str,
    },

    /// A management address did not name a credential store.
    #[error("address '{address}' has no '{key}' element")]
    MissingAddressKey {
        /// The address that was scanned.
        address: String,
        /// The element key that was expected.
        key: &'static str,
    },

    /// No store is registered under the name.
    #[error("credential store '{0}' is not registered")]
    UnknownStore(StoreName),

    /// A store is already registered under the name.
    #[error("credential store '{0}' is already registered")]
    DuplicateStore(StoreName),

    /// The store configuration is inconsistent.
    #[error("invalid configuration for credential store '{store}': {reason}")]
    InvalidConfig {
        /// Store being configured.
        store: StoreName,
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A lock guarding the store was poisoned by a panicking thread.
    #[error("credential store '{store}' lock poisoned")]
    LockPoisoned {
        /// Store whose lock was poisoned.
        store: StoreName,
    },
}

impl CredentialStoreError {
    /// Attaches `alias` to a backend error that was raised without one.
    #[must_use]
    pub fn for_alias(self, alias: &Alias) -> Self {
        match self {
            Self::Backend {
                store,
                alias: None,
                source,
            } => Self::Backend {
                store,
                alias: Some(alias.clone()),
                source,
            },
            other => other,
        }
    }
}

#[allow(clippy::ref_option)]
fn alias_context(alias: &Option<Alias>) -> String {
    alias
        .as_ref()
        .map(|alias| format!(" at alias '{alias}'"))
        .unwrap_or_default()
}
