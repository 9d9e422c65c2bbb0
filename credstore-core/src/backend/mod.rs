//! Backend abstraction for credential stores.
//!
//! A backend is the persistent keystore behind one credential store. The
//! store layer never inspects its on-disk format; it only drives the
//! primitives defined here:
//!
//! - [`BackendProvider`]: opens (or creates) a store from its
//!   [`LoadParameters`]
//! - [`BackendStore`]: the live store, with lookups, staged mutations and
//!   `flush`, which makes staged mutations durable
//!
//! Providers are registered by store type on the
//! [`StoreRegistry`](crate::StoreRegistry). The in-memory provider in
//! [`memory`] ships with the core; the encrypted file backend lives in the
//! `credstore-file` crate.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::types::{Alias, Credential, CredentialKind, PasswordCredential, StoreName};

pub mod memory;

pub use memory::{MemoryBackend, MemoryProvider};

/// Result type for backend primitives.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by backend providers and stores.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The store does not exist and creation was not requested.
    #[error("store does not exist at '{0}' and creation is disabled")]
    Missing(String),

    /// The store was opened read-only.
    #[error("store is not modifiable")]
    NotModifiable,

    /// Filesystem failure.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What the backend was doing.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Persisted data failed an integrity check.
    #[error("corrupted store data: {0}")]
    Corrupted(String),

    /// Encryption, decryption or key derivation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Encoding or decoding of persisted data failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Persisted data uses a format version this build cannot read.
    #[error("unsupported store format version: {0}")]
    UnsupportedVersion(u32),

    /// An implementation property has an unusable value.
    #[error("invalid implementation property '{name}': '{value}'")]
    InvalidProperty {
        /// Property name.
        name: String,
        /// Property value as configured.
        value: String,
    },

    /// The backend cannot serve requests.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Builds an [`BackendError::Io`] with a short description of the action.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Everything a provider needs to open one store.
#[derive(Debug)]
pub struct LoadParameters<'a> {
    /// Name of the store being opened.
    pub store: &'a StoreName,
    /// Resolved location, already joined with `relative-to`.
    pub location: Option<PathBuf>,
    /// Create the store if it does not exist.
    pub create: bool,
    /// Allow mutations and flushes.
    pub modifiable: bool,
    /// Backend-specific settings.
    pub implementation_properties: &'a BTreeMap<String, String>,
    /// Crypto provider names requested by the configuration, in order.
    pub providers: Vec<String>,
    /// Password protecting the store, resolved from its credential reference.
    pub credential_source: Option<&'a PasswordCredential>,
}

/// Opens backend stores.
///
/// A provider is shared by every store of its type and may be called from
/// several threads at once. `load` may block (key derivation, slow disks);
/// the calling service is `Starting` for the duration.
pub trait BackendProvider: Send + Sync {
    /// Opens the store described by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Missing`] if the store does not exist and
    /// `params.create` is false, or any other [`BackendError`] when the
    /// store cannot be read or unlocked.
    fn load(&self, params: &LoadParameters<'_>) -> BackendResult<Box<dyn BackendStore>>;
}

/// A loaded backend store.
///
/// Mutations (`store`, `remove`) are staged in the live store and only become
/// durable on [`BackendStore::flush`]. A failed flush leaves the staged state
/// in place; callers are responsible for reverting it.
///
/// An alias holds at most one entry. Lookups that name a kind only match an
/// entry of that kind.
pub trait BackendStore: Send + Sync {
    /// Returns whether an entry of `kind` exists at `alias`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn exists(&self, alias: &Alias, kind: CredentialKind) -> BackendResult<bool>;

    /// Returns the entry of `kind` at `alias`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(credential))` if an entry of `kind` exists
    /// - `Ok(None)` if the alias is free or holds another kind
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn retrieve(&self, alias: &Alias, kind: CredentialKind) -> BackendResult<Option<Credential>>;

    /// Stages `credential` at `alias`, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotModifiable`] for read-only stores.
    fn store(&mut self, alias: &Alias, credential: Credential) -> BackendResult<()>;

    /// Stages removal of the entry of `kind` at `alias`. Removing a missing
    /// entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotModifiable`] for read-only stores.
    fn remove(&mut self, alias: &Alias, kind: CredentialKind) -> BackendResult<()>;

    /// Persists all staged mutations.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is read-only or persisting fails. The
    /// previously persisted state is left untouched on failure.
    fn flush(&mut self) -> BackendResult<()>;

    /// Returns every alias in the live store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn aliases(&self) -> BackendResult<BTreeSet<Alias>>;
}
