//! Credential store service: lifecycle and readiness.
//!
//! Each configured store is represented by one [`CredentialStoreService`]. The
//! service owns the loaded [`CredentialStoreHandle`] and a lifecycle state:
//!
//! ```text
//! Down --start--> Starting --ok--> Up --stop--> Stopping --> Down
//!                     \--error--> Failed --stop--> Down
//! ```
//!
//! Operations wait for `Up` through [`CredentialStoreService::await_ready`],
//! bounded by a timeout, and never observe a half-loaded store.
//!
//! # Locking
//!
//! The handle sits behind a read/write lock. Mutations, reload, start and
//! stop take it exclusively; reads share it. The state mutex may be taken
//! while the handle lock is held, never the other way round.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use strum::Display;
use tracing::{debug, error, info};

use crate::backend::{BackendProvider, LoadParameters};
use crate::config::StoreConfig;
use crate::dispatcher;
use crate::error::{CredentialStoreError, StoreResult};
use crate::handle::CredentialStoreHandle;
use crate::types::{Alias, PasswordCredential, StoreName};

/// Lifecycle state of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum StoreState {
    /// Not loaded.
    Down,
    /// The backend is being loaded.
    Starting,
    /// Loaded and serving operations.
    Up,
    /// The handle is being released.
    Stopping,
    /// The last start attempt failed.
    Failed,
}

impl StoreState {
    /// Whether the wait in [`CredentialStoreService::await_ready`] can end.
    const fn is_settled(self) -> bool {
        matches!(self, Self::Up | Self::Failed)
    }
}

/// Where the password that unlocks a store comes from.
///
/// The source is resolved on every start, so reloading a store picks up a
/// password that changed in the store it references.
#[derive(Debug, Clone, Default)]
pub enum CredentialSource {
    /// The store is opened without a password.
    #[default]
    Absent,
    /// An inline password.
    ClearText(PasswordCredential),
    /// A password held by another store.
    StoreEntry {
        /// Store holding the password.
        store: Arc<CredentialStoreService>,
        /// Alias of the password in `store`.
        alias: Alias,
    },
}

impl CredentialSource {
    fn resolve(&self) -> StoreResult<Option<PasswordCredential>> {
        match self {
            Self::Absent => Ok(None),
            Self::ClearText(password) => Ok(Some(password.clone())),
            Self::StoreEntry { store, alias } => {
                dispatcher::lookup_password(store, alias).map(Some)
            }
        }
    }
}

/// One configured credential store.
pub struct CredentialStoreService {
    name: StoreName,
    config: StoreConfig,
    provider: Arc<dyn BackendProvider>,
    credential_source: CredentialSource,
    state: Mutex<StoreState>,
    state_changed: Condvar,
    handle: RwLock<Option<CredentialStoreHandle>>,
}

impl CredentialStoreService {
    /// Creates a service in state `Down`. Call [`Self::start`] to load it.
    #[must_use]
    pub fn new(name: StoreName, config: StoreConfig, provider: Arc<dyn BackendProvider>) -> Self {
        Self {
            name,
            config,
            provider,
            credential_source: CredentialSource::Absent,
            state: Mutex::new(StoreState::Down),
            state_changed: Condvar::new(),
            handle: RwLock::new(None),
        }
    }

    /// Sets where the password handed to the backend on load comes from.
    #[must_use]
    pub fn with_credential_source(mut self, credential_source: CredentialSource) -> Self {
        self.credential_source = credential_source;
        self
    }

    /// Name of the store.
    #[must_use]
    pub const fn name(&self) -> &StoreName {
        &self.name
    }

    /// Configuration the store was created with.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StoreState {
        *self.lock_state()
    }

    /// Readiness window used by [`crate::dispatch`].
    #[must_use]
    pub const fn readiness_timeout(&self) -> Duration {
        self.config.readiness_timeout()
    }

    /// Loads the backend and moves the service to `Up`. A no-op if it is
    /// already loaded.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::Backend`] if the backend cannot be
    /// loaded, or the error raised resolving the credential source; the
    /// service is then `Failed`.
    pub fn start(&self) -> StoreResult<()> {
        let mut slot = self.handle.write().map_err(|_| self.poisoned())?;
        self.start_locked(&mut slot)
    }

    /// Releases the handle and moves the service to `Down`.
    pub fn stop(&self) {
        let mut slot = self.handle.write().unwrap_or_else(PoisonError::into_inner);
        self.stop_locked(&mut slot);
    }

    /// Stops and restarts the store under one exclusive lock, so no operation
    /// observes the gap. Unflushed state is discarded.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::Backend`] if the restart fails; the
    /// service is then `Failed`.
    pub fn reload(&self) -> StoreResult<()> {
        let mut slot = self.handle.write().map_err(|_| self.poisoned())?;
        info!(store = %self.name, "reloading credential store");
        self.stop_locked(&mut slot);
        self.start_locked(&mut slot)
    }

    /// Waits up to `timeout` for the store to be `Up`.
    ///
    /// Returns at once when the store is `Up` or `Failed`; otherwise blocks
    /// until one of those states is reached or the timeout elapses.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::ServiceNotReady`] with the observed
    /// state if the store is not `Up` when the wait ends.
    pub fn await_ready(&self, timeout: Duration) -> StoreResult<()> {
        let guard = self.lock_state();
        let (state, _) = self
            .state_changed
            .wait_timeout_while(guard, timeout, |state| !state.is_settled())
            .unwrap_or_else(PoisonError::into_inner);
        match *state {
            StoreState::Up => Ok(()),
            observed => Err(CredentialStoreError::ServiceNotReady {
                store: self.name.clone(),
                state: observed,
            }),
        }
    }

    /// Runs `f` against the handle under the shared lock, once the store is
    /// ready.
    pub(crate) fn read<R>(
        &self,
        timeout: Duration,
        f: impl FnOnce(&CredentialStoreHandle) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.await_ready(timeout)?;
        let slot = self.handle.read().map_err(|_| self.poisoned())?;
        let handle = slot.as_ref().ok_or_else(|| self.not_ready())?;
        f(handle)
    }

    /// Runs `f` against the handle under the exclusive lock, once the store is
    /// ready.
    pub(crate) fn write<R>(
        &self,
        timeout: Duration,
        f: impl FnOnce(&mut CredentialStoreHandle) -> StoreResult<R>,
    ) -> StoreResult<R> {
        self.await_ready(timeout)?;
        let mut slot = self.handle.write().map_err(|_| self.poisoned())?;
        let handle = slot.as_mut().ok_or_else(|| self.not_ready())?;
        f(handle)
    }

    fn start_locked(&self, slot: &mut Option<CredentialStoreHandle>) -> StoreResult<()> {
        if slot.is_some() {
            return Ok(());
        }
        self.transition(StoreState::Starting);

        let credential_source = match self.credential_source.resolve() {
            Ok(credential_source) => credential_source,
            Err(err) => {
                self.transition(StoreState::Failed);
                error!(store = %self.name, error = %err, "credential source could not be resolved");
                return Err(err);
            }
        };
        let params = LoadParameters {
            store: &self.name,
            location: self.config.resolved_location(),
            create: self.config.create,
            modifiable: self.config.modifiable,
            implementation_properties: &self.config.implementation_properties,
            providers: self.config.provider_names(),
            credential_source: credential_source.as_ref(),
        };
        match self.provider.load(&params) {
            Ok(backend) => {
                *slot = Some(CredentialStoreHandle::new(self.name.clone(), backend));
                self.transition(StoreState::Up);
                info!(store = %self.name, store_type = self.config.store_type(), "credential store started");
                Ok(())
            }
            Err(source) => {
                self.transition(StoreState::Failed);
                error!(store = %self.name, error = %source, "credential store failed to start");
                Err(CredentialStoreError::Backend {
                    store: self.name.clone(),
                    alias: None,
                    source,
                })
            }
        }
    }

    fn stop_locked(&self, slot: &mut Option<CredentialStoreHandle>) {
        if slot.is_none() {
            self.transition(StoreState::Down);
            return;
        }
        self.transition(StoreState::Stopping);
        drop(slot.take());
        self.transition(StoreState::Down);
        info!(store = %self.name, "credential store stopped");
    }

    fn transition(&self, next: StoreState) {
        let mut state = self.lock_state();
        if *state != next {
            debug!(store = %self.name, from = %*state, to = %next, "state transition");
            *state = next;
        }
        drop(state);
        self.state_changed.notify_all();
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn not_ready(&self) -> CredentialStoreError {
        CredentialStoreError::ServiceNotReady {
            store: self.name.clone(),
            state: self.state(),
        }
    }

    fn poisoned(&self) -> CredentialStoreError {
        CredentialStoreError::LockPoisoned {
            store: self.name.clone(),
        }
    }
}

impl fmt::Debug for CredentialStoreService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStoreService")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::backend::MemoryBackend;

    fn service(backend: &MemoryBackend) -> CredentialStoreService {
        CredentialStoreService::new(
            StoreName::new("main").expect("store"),
            StoreConfig::memory(),
            Arc::new(backend.clone()),
        )
    }

    #[test]
    fn test_start_and_stop() {
        let backend = MemoryBackend::new();
        let service = service(&backend);
        assert_eq!(service.state(), StoreState::Down);

        service.start().expect("start");
        assert_eq!(service.state(), StoreState::Up);
        service.start().expect("second start is a no-op");
        assert_eq!(backend.load_count(), 1);

        service.stop();
        assert_eq!(service.state(), StoreState::Down);
    }

    #[test]
    fn test_failed_start() {
        let backend = MemoryBackend::new();
        backend.set_fail_loads(true);
        let service = service(&backend);

        assert!(matches!(
            service.start(),
            Err(CredentialStoreError::Backend { alias: None, .. })
        ));
        assert_eq!(service.state(), StoreState::Failed);
    }

    #[test]
    fn test_await_ready_when_up_is_immediate() {
        let backend = MemoryBackend::new();
        let service = service(&backend);
        service.start().expect("start");
        service.await_ready(Duration::ZERO).expect("ready");
    }

    #[test]
    fn test_await_ready_fails_fast_when_failed() {
        let backend = MemoryBackend::new();
        backend.set_fail_loads(true);
        let service = service(&backend);
        let _ = service.start();

        let started = Instant::now();
        let err = service
            .await_ready(Duration::from_secs(5))
            .expect_err("failed store is not ready");
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            err,
            CredentialStoreError::ServiceNotReady {
                state: StoreState::Failed,
                ..
            }
        ));
    }

    #[test]
    fn test_await_ready_times_out_when_down() {
        let backend = MemoryBackend::new();
        let service = service(&backend);
        let started = Instant::now();
        let err = service
            .await_ready(Duration::from_millis(50))
            .expect_err("down store is not ready");
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(matches!(
            err,
            CredentialStoreError::ServiceNotReady {
                state: StoreState::Down,
                ..
            }
        ));
    }

    #[test]
    fn test_await_ready_wakes_on_start() {
        let backend = MemoryBackend::new();
        backend.set_load_delay(Duration::from_millis(100));
        let service = Arc::new(service(&backend));

        let starter = {
            let service = Arc::clone(&service);
            thread::spawn(move || service.start())
        };
        service
            .await_ready(Duration::from_secs(5))
            .expect("store comes up");
        starter.join().expect("join").expect("start");
    }

    #[test]
    fn test_reload_discards_unflushed_state() {
        let backend = MemoryBackend::new();
        let service = service(&backend);
        service.start().expect("start");

        let alias = crate::Alias::new("a").expect("alias");
        service
            .write(Duration::ZERO, |handle| {
                handle.store(
                    &alias,
                    crate::Credential::Password(PasswordCredential::new("x")),
                )
            })
            .expect("stage");
        service.reload().expect("reload");

        let aliases = service
            .read(Duration::ZERO, CredentialStoreHandle::aliases)
            .expect("aliases");
        assert!(aliases.is_empty());
        assert_eq!(backend.load_count(), 2);
    }
}
