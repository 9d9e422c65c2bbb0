//! Uniform access to one loaded backend store.

use std::collections::BTreeSet;
use std::fmt;

use tracing::error;

use crate::backend::{BackendError, BackendStore};
use crate::error::{CredentialStoreError, StoreResult};
use crate::types::{Alias, Credential, CredentialKind, StoreName};

/// A loaded store, owned by its [`CredentialStoreService`](crate::CredentialStoreService).
///
/// Backend errors are lifted into [`CredentialStoreError::Backend`] carrying
/// the store name and, when one is involved, the alias.
pub struct CredentialStoreHandle {
    store: StoreName,
    backend: Box<dyn BackendStore>,
}

impl CredentialStoreHandle {
    pub(crate) fn new(store: StoreName, backend: Box<dyn BackendStore>) -> Self {
        Self { store, backend }
    }

    /// Name of the store this handle belongs to.
    #[must_use]
    pub const fn store_name(&self) -> &StoreName {
        &self.store
    }

    /// Returns whether an entry of `kind` exists at `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::Backend`] if the backend cannot be read.
    pub fn exists(&self, alias: &Alias, kind: CredentialKind) -> StoreResult<bool> {
        self.backend
            .exists(alias, kind)
            .map_err(|source| self.backend_error(Some(alias), source))
    }

    /// Returns the entry of `kind` at `alias`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::Backend`] if the backend cannot be read.
    pub fn retrieve(&self, alias: &Alias, kind: CredentialKind) -> StoreResult<Option<Credential>> {
        self.backend
            .retrieve(alias, kind)
            .map_err(|source| self.backend_error(Some(alias), source))
    }

    /// Returns whatever entry sits at `alias`, of either kind.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::Backend`] if the backend cannot be read.
    pub fn entry(&self, alias: &Alias) -> StoreResult<Option<Credential>> {
        for kind in [CredentialKind::Password, CredentialKind::SecretKey] {
            if let Some(credential) = self.retrieve(alias, kind)? {
                return Ok(Some(credential));
            }
        }
        Ok(None)
    }

    /// Stages `credential` at `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::Backend`] if the backend rejects the write.
    pub fn store(&mut self, alias: &Alias, credential: Credential) -> StoreResult<()> {
        self.backend
            .store(alias, credential)
            .map_err(|source| self.backend_error(Some(alias), source))
    }

    /// Stages removal of the entry of `kind` at `alias`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::Backend`] if the backend rejects the removal.
    pub fn remove(&mut self, alias: &Alias, kind: CredentialKind) -> StoreResult<()> {
        self.backend
            .remove(alias, kind)
            .map_err(|source| self.backend_error(Some(alias), source))
    }

    /// Persists staged mutations.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::Backend`] without an alias; callers
    /// attach one with [`CredentialStoreError::for_alias`].
    pub fn flush(&mut self) -> StoreResult<()> {
        self.backend
            .flush()
            .map_err(|source| self.backend_error(None, source))
    }

    /// Every alias in the store.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::Backend`] if the backend cannot be read.
    pub fn aliases(&self) -> StoreResult<BTreeSet<Alias>> {
        self.backend
            .aliases()
            .map_err(|source| self.backend_error(None, source))
    }

    /// Stores `credential` at `alias` and flushes, as one unit.
    ///
    /// If the flush fails the staged write is reverted: the previous entry at
    /// `alias` is restored, or the new entry removed if there was none. The
    /// flush error is returned either way.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::Backend`] if staging or flushing fails.
    pub fn store_and_flush(&mut self, alias: &Alias, credential: Credential) -> StoreResult<()> {
        let kind = credential.kind();
        let previous = self.entry(alias)?;
        self.store(alias, credential)?;
        if let Err(err) = self.flush() {
            self.revert(alias, kind, previous);
            return Err(err.for_alias(alias));
        }
        Ok(())
    }

    fn revert(&mut self, alias: &Alias, kind: CredentialKind, previous: Option<Credential>) {
        let reverted = match previous {
            Some(credential) => self.backend.store(alias, credential),
            None => self.backend.remove(alias, kind),
        };
        if let Err(err) = reverted {
            error!(
                store = %self.store,
                alias = %alias,
                error = %err,
                "failed to revert staged entry after flush failure"
            );
        }
    }

    fn backend_error(&self, alias: Option<&Alias>, source: BackendError) -> CredentialStoreError {
        CredentialStoreError::Backend {
            store: self.store.clone(),
            alias: alias.cloned(),
            source,
        }
    }
}

impl fmt::Debug for CredentialStoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStoreHandle")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
