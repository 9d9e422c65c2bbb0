//! In-memory backend.
//!
//! Nothing here touches disk. Each [`MemoryBackend`] keeps a *persisted image*
//! of its entries that outlives individual loads, so a reload observes exactly
//! what was last flushed. Loaded stores mutate a private working copy which
//! `flush` copies over the image.
//!
//! The backend also carries fault injection hooks (failed flushes, failed
//! loads, slow loads) and counters used to exercise rollback and readiness
//! behaviour.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::{BackendError, BackendProvider, BackendResult, BackendStore, LoadParameters};
use crate::types::{Alias, Credential, CredentialKind, StoreName};

type Entries = BTreeMap<Alias, Credential>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Image {
    /// `None` until the store has been created.
    persisted: Mutex<Option<Entries>>,
    load_delay: Mutex<Duration>,
    fail_next_flush: AtomicBool,
    fail_loads: AtomicBool,
    loads: AtomicU64,
    flushes: AtomicU64,
}

// =============================================================================
// Memory Backend
// =============================================================================

/// Provider for a single in-memory store.
///
/// Clones share the same persisted image, so a test can keep one clone for
/// inspection and fault injection while the registry holds another.
#[derive(Clone)]
pub struct MemoryBackend {
    image: Arc<Image>,
}

impl MemoryBackend {
    /// Creates a backend whose store already exists and is empty.
    #[must_use]
    pub fn new() -> Self {
        Self::with_entries([])
    }

    /// Creates a backend whose store does not exist yet. Loading it without
    /// `create` fails with [`BackendError::Missing`].
    #[must_use]
    pub fn absent() -> Self {
        Self {
            image: Arc::default(),
        }
    }

    /// Creates a backend whose store already holds `entries`.
    #[must_use]
    pub fn with_entries(entries: impl IntoIterator<Item = (Alias, Credential)>) -> Self {
        let backend = Self::absent();
        *lock(&backend.image.persisted) = Some(entries.into_iter().collect());
        backend
    }

    /// Makes every subsequent load sleep for `delay` before opening the store.
    pub fn set_load_delay(&self, delay: Duration) {
        *lock(&self.image.load_delay) = delay;
    }

    /// Makes the next flush fail with an I/O error.
    pub fn fail_next_flush(&self) {
        self.image.fail_next_flush.store(true, Ordering::SeqCst);
    }

    /// Makes subsequent loads fail with [`BackendError::Unavailable`].
    pub fn set_fail_loads(&self, fail: bool) {
        self.image.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Number of load attempts so far.
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.image.loads.load(Ordering::SeqCst)
    }

    /// Number of successful flushes so far.
    #[must_use]
    pub fn flush_count(&self) -> u64 {
        self.image.flushes.load(Ordering::SeqCst)
    }

    /// Whether the store exists.
    #[must_use]
    pub fn is_created(&self) -> bool {
        lock(&self.image.persisted).is_some()
    }

    /// Aliases in the persisted image.
    #[must_use]
    pub fn persisted_aliases(&self) -> BTreeSet<Alias> {
        lock(&self.image.persisted)
            .as_ref()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Entry at `alias` in the persisted image.
    #[must_use]
    pub fn persisted(&self, alias: &Alias) -> Option<Credential> {
        lock(&self.image.persisted)
            .as_ref()
            .and_then(|entries| entries.get(alias).cloned())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendProvider for MemoryBackend {
    fn load(&self, params: &LoadParameters<'_>) -> BackendResult<Box<dyn BackendStore>> {
        let delay = *lock(&self.image.load_delay);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.image.loads.fetch_add(1, Ordering::SeqCst);
        if self.image.fail_loads.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("injected load failure".to_owned()));
        }

        let mut persisted = lock(&self.image.persisted);
        if persisted.is_none() {
            if !params.create {
                return Err(BackendError::Missing(format!("memory:{}", params.store)));
            }
            *persisted = Some(Entries::new());
        }
        let entries = persisted.clone().unwrap_or_default();
        debug!(store = %params.store, entries = entries.len(), "loaded in-memory store");

        Ok(Box::new(MemoryStore {
            entries,
            modifiable: params.modifiable,
            image: Arc::clone(&self.image),
        }))
    }
}

// =============================================================================
// Memory Provider
// =============================================================================

/// Provider for the `memory` store type: one [`MemoryBackend`] per store name.
///
/// Stores are created on first load regardless of `create`, since there is
/// nothing on disk that could be missing.
#[derive(Clone, Default)]
pub struct MemoryProvider {
    backends: Arc<Mutex<HashMap<StoreName, MemoryBackend>>>,
}

impl MemoryProvider {
    /// Creates a provider with no stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the backend for `store`, creating an empty one if needed.
    #[must_use]
    pub fn backend(&self, store: &StoreName) -> MemoryBackend {
        lock(&self.backends)
            .entry(store.clone())
            .or_default()
            .clone()
    }
}

impl BackendProvider for MemoryProvider {
    fn load(&self, params: &LoadParameters<'_>) -> BackendResult<Box<dyn BackendStore>> {
        self.backend(params.store).load(params)
    }
}

// =============================================================================
// Memory Store
// =============================================================================

struct MemoryStore {
    entries: Entries,
    modifiable: bool,
    image: Arc<Image>,
}

impl MemoryStore {
    const fn ensure_modifiable(&self) -> BackendResult<()> {
        if self.modifiable {
            Ok(())
        } else {
            Err(BackendError::NotModifiable)
        }
    }
}

impl BackendStore for MemoryStore {
    fn exists(&self, alias: &Alias, kind: CredentialKind) -> BackendResult<bool> {
        Ok(self
            .entries
            .get(alias)
            .is_some_and(|credential| credential.kind() == kind))
    }

    fn retrieve(&self, alias: &Alias, kind: CredentialKind) -> BackendResult<Option<Credential>> {
        Ok(self
            .entries
            .get(alias)
            .filter(|credential| credential.kind() == kind)
            .cloned())
    }

    fn store(&mut self, alias: &Alias, credential: Credential) -> BackendResult<()> {
        self.ensure_modifiable()?;
        self.entries.insert(alias.clone(), credential);
        Ok(())
    }

    fn remove(&mut self, alias: &Alias, kind: CredentialKind) -> BackendResult<()> {
        self.ensure_modifiable()?;
        if self.exists(alias, kind)? {
            self.entries.remove(alias);
        }
        Ok(())
    }

    fn flush(&mut self) -> BackendResult<()> {
        self.ensure_modifiable()?;
        if self.image.fail_next_flush.swap(false, Ordering::SeqCst) {
            return Err(BackendError::io(
                "flushing in-memory store",
                io::Error::other("injected flush failure"),
            ));
        }
        *lock(&self.image.persisted) = Some(self.entries.clone());
        self.image.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn aliases(&self) -> BackendResult<BTreeSet<Alias>> {
        Ok(self.entries.keys().cloned().collect())
    }
}
