//! Process-wide registry of credential stores.
//!
//! The registry maps store names to running services and store types to
//! backend providers. Adding a store validates its configuration, resolves
//! its credential reference, starts it, and only then makes it visible.
//!
//! A credential reference carrying both an inline password and a store entry
//! writes the password into the referenced store first. That write is undone
//! if the new store cannot be added.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{error, info};

use crate::backend::{BackendProvider, MemoryProvider};
use crate::config::{CredentialReference, StoreConfig, MEMORY_STORE_TYPE};
use crate::dispatcher::{self, OperationOutcome, StoreOperation};
use crate::error::{CredentialStoreError, StoreResult};
use crate::service::{CredentialSource, CredentialStoreService};
use crate::types::{Alias, CredentialKind, PasswordCredential, StoreName};

/// Registry of backend providers and running stores.
#[derive(Default)]
pub struct StoreRegistry {
    providers: RwLock<HashMap<String, Arc<dyn BackendProvider>>>,
    stores: RwLock<BTreeMap<StoreName, Arc<CredentialStoreService>>>,
}

impl StoreRegistry {
    /// Creates an empty registry with no providers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the in-memory provider registered as `memory`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_provider(MEMORY_STORE_TYPE, Arc::new(MemoryProvider::new()));
        registry
    }

    /// Registers `provider` for `store_type`, replacing any previous one.
    /// Store types are matched case-insensitively.
    pub fn register_provider(&self, store_type: &str, provider: Arc<dyn BackendProvider>) {
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(store_type.to_ascii_lowercase(), provider);
    }

    /// Validates `config`, starts a store named `name` and registers it.
    ///
    /// A store whose start fails is not registered, and any password its
    /// credential reference wrote into another store is taken back out.
    ///
    /// # Errors
    ///
    /// - [`CredentialStoreError::DuplicateStore`] if the name is taken
    /// - [`CredentialStoreError::InvalidConfig`] if the configuration is
    ///   inconsistent or names an unregistered store type
    /// - any error raised resolving or updating the credential reference
    /// - [`CredentialStoreError::Backend`] if the store fails to start
    pub fn add_store(
        &self,
        name: StoreName,
        config: StoreConfig,
    ) -> StoreResult<Arc<CredentialStoreService>> {
        if self.read_stores(&name)?.contains_key(&name) {
            return Err(CredentialStoreError::DuplicateStore(name));
        }
        let config = config.resolve(&name)?;
        let provider = self.provider(&name, config.store_type())?;
        let (credential_source, update) =
            self.credential_source(&name, config.credential_reference.as_ref())?;

        let service = Arc::new(
            CredentialStoreService::new(name.clone(), config, provider)
                .with_credential_source(credential_source),
        );
        if let Err(err) = self.start_and_insert(&service) {
            if let Some(update) = update {
                update.rollback();
            }
            return Err(err);
        }
        info!(store = %name, "credential store registered");
        Ok(service)
    }

    /// Stops and unregisters the store named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::UnknownStore`] if no such store exists.
    pub fn remove_store(&self, name: &StoreName) -> StoreResult<()> {
        let service = self
            .write_stores(name)?
            .remove(name)
            .ok_or_else(|| CredentialStoreError::UnknownStore(name.clone()))?;
        service.stop();
        info!(store = %name, "credential store unregistered");
        Ok(())
    }

    /// Returns the store named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::UnknownStore`] if no such store exists.
    pub fn get(&self, name: &StoreName) -> StoreResult<Arc<CredentialStoreService>> {
        self.read_stores(name)?
            .get(name)
            .cloned()
            .ok_or_else(|| CredentialStoreError::UnknownStore(name.clone()))
    }

    /// Names of all registered stores, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<StoreName> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Dispatches `operation` to the store named `name`.
    pub fn dispatch(&self, name: &StoreName, operation: StoreOperation) -> OperationOutcome {
        match self.get(name) {
            Ok(service) => dispatcher::dispatch(&service, operation),
            Err(err) => OperationOutcome::failed(err),
        }
    }

    /// Dispatches `operation` to the store named by a management address such
    /// as `subsystem=credentials/credential-store=main`.
    pub fn dispatch_at(&self, address: &str, operation: StoreOperation) -> OperationOutcome {
        match StoreName::from_address(address) {
            Ok(name) => self.dispatch(&name, operation),
            Err(err) => OperationOutcome::failed(err),
        }
    }

    fn provider(
        &self,
        name: &StoreName,
        store_type: &str,
    ) -> StoreResult<Arc<dyn BackendProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&store_type.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| CredentialStoreError::InvalidConfig {
                store: name.clone(),
                reason: format!("no backend provider registered for store type '{store_type}'"),
            })
    }

    fn start_and_insert(&self, service: &Arc<CredentialStoreService>) -> StoreResult<()> {
        let name = service.name();
        service.start()?;
        let mut stores = self.write_stores(name)?;
        if stores.contains_key(name) {
            drop(stores);
            service.stop();
            return Err(CredentialStoreError::DuplicateStore(name.clone()));
        }
        stores.insert(name.clone(), Arc::clone(service));
        drop(stores);
        Ok(())
    }

    fn credential_source(
        &self,
        name: &StoreName,
        reference: Option<&CredentialReference>,
    ) -> StoreResult<(CredentialSource, Option<ReferenceUpdate>)> {
        let Some(reference) = reference else {
            return Ok((CredentialSource::Absent, None));
        };
        match (&reference.clear_text, &reference.store, &reference.alias) {
            (Some(clear_text), None, None) => Ok((
                CredentialSource::ClearText(PasswordCredential::new(clear_text.as_str())),
                None,
            )),
            (clear_text, Some(store), Some(alias)) => {
                let source = StoreName::new(store.as_str())?;
                if &source == name {
                    return Err(CredentialStoreError::InvalidConfig {
                        store: name.clone(),
                        reason: "credential reference must not point at the store itself"
                            .to_owned(),
                    });
                }
                let alias = Alias::new(alias.as_str())?;
                let service = self.get(&source)?;
                let update = clear_text
                    .as_deref()
                    .map(|clear_text| ReferenceUpdate::apply(&service, &alias, clear_text))
                    .transpose()?
                    .flatten();
                Ok((
                    CredentialSource::StoreEntry {
                        store: service,
                        alias,
                    },
                    update,
                ))
            }
            (None, None, None) => Ok((CredentialSource::Absent, None)),
            _ => Err(CredentialStoreError::InvalidConfig {
                store: name.clone(),
                reason: "credential reference needs clear-text, both store and alias, or all three"
                    .to_owned(),
            }),
        }
    }

    fn read_stores(
        &self,
        name: &StoreName,
    ) -> StoreResult<RwLockReadGuard<'_, BTreeMap<StoreName, Arc<CredentialStoreService>>>> {
        self.stores
            .read()
            .map_err(|_| CredentialStoreError::LockPoisoned { store: name.clone() })
    }

    fn write_stores(
        &self,
        name: &StoreName,
    ) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<StoreName, Arc<CredentialStoreService>>>> {
        self.stores
            .write()
            .map_err(|_| CredentialStoreError::LockPoisoned { store: name.clone() })
    }
}

/// A password written into a referenced store while another store is being
/// added.
struct ReferenceUpdate {
    service: Arc<CredentialStoreService>,
    alias: Alias,
    previous: Option<PasswordCredential>,
}

impl ReferenceUpdate {
    /// Writes `clear_text` at `alias`, adding the entry or replacing a
    /// different password. Returns `None` when the password is already there.
    fn apply(
        service: &Arc<CredentialStoreService>,
        alias: &Alias,
        clear_text: &str,
    ) -> StoreResult<Option<Self>> {
        let previous = match dispatcher::lookup_password(service, alias) {
            Ok(previous) => Some(previous),
            Err(CredentialStoreError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        let operation = match &previous {
            Some(previous) if *previous == PasswordCredential::new(clear_text) => return Ok(None),
            Some(_) => StoreOperation::set_password(alias.clone(), clear_text),
            None => StoreOperation::add_password(alias.clone(), clear_text),
        };
        dispatcher::dispatch(service, operation).into_result()?;
        info!(
            store = %service.name(),
            alias = %alias,
            replaced = previous.is_some(),
            "stored credential reference password"
        );
        Ok(Some(Self {
            service: Arc::clone(service),
            alias: alias.clone(),
            previous,
        }))
    }

    /// Puts the referenced store back the way it was before [`Self::apply`].
    fn rollback(self) {
        let operation = match self.previous {
            Some(previous) => {
                StoreOperation::set_password(self.alias.clone(), previous.expose_secret())
            }
            None => StoreOperation::remove(self.alias.clone(), CredentialKind::Password),
        };
        match dispatcher::dispatch(&self.service, operation).into_result() {
            Ok(_) => info!(
                store = %self.service.name(),
                alias = %self.alias,
                "reverted credential reference password"
            ),
            Err(err) => error!(
                store = %self.service.name(),
                alias = %self.alias,
                error = %err,
                "could not revert credential reference password"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::backend::{BackendResult, BackendStore, LoadParameters, MemoryBackend};
    use crate::service::StoreState;

    fn name(value: &str) -> StoreName {
        StoreName::new(value).expect("store")
    }

    fn alias(value: &str) -> Alias {
        Alias::new(value).expect("alias")
    }

    /// Memory provider that remembers the password each load was given.
    #[derive(Default)]
    struct RecordingProvider {
        inner: MemoryProvider,
        passwords: Mutex<Vec<String>>,
    }

    impl BackendProvider for RecordingProvider {
        fn load(&self, params: &LoadParameters<'_>) -> BackendResult<Box<dyn BackendStore>> {
            if let Some(password) = params.credential_source {
                self.passwords
                    .lock()
                    .expect("passwords")
                    .push(password.expose_secret().to_owned());
            }
            self.inner.load(params)
        }
    }

    fn with_vault(password: Option<&str>) -> StoreRegistry {
        let registry = StoreRegistry::with_defaults();
        registry
            .add_store(name("vault"), StoreConfig::memory())
            .expect("vault");
        if let Some(password) = password {
            registry
                .dispatch(
                    &name("vault"),
                    StoreOperation::add_password(alias("main-pw"), password),
                )
                .into_result()
                .expect("add");
        }
        registry
    }

    fn vault_password(registry: &StoreRegistry) -> StoreResult<String> {
        let vault = registry.get(&name("vault"))?;
        dispatcher::lookup_password(&vault, &alias("main-pw"))
            .map(|password| password.expose_secret().to_owned())
    }

    fn failing_store_config() -> StoreConfig {
        StoreConfig {
            store_type: Some("failing".to_owned()),
            ..StoreConfig::memory()
        }
        .with_credential_reference(
            CredentialReference::store_entry("vault", "main-pw").with_clear_text("changeit"),
        )
    }

    fn register_failing_provider(registry: &StoreRegistry) {
        let backend = MemoryBackend::new();
        backend.set_fail_loads(true);
        registry.register_provider("failing", Arc::new(backend));
    }

    #[test]
    fn test_add_get_remove() {
        let registry = StoreRegistry::with_defaults();
        let service = registry
            .add_store(name("main"), StoreConfig::memory())
            .expect("add");
        assert_eq!(service.state(), StoreState::Up);
        assert_eq!(registry.names(), vec![name("main")]);

        registry.remove_store(&name("main")).expect("remove");
        assert_eq!(service.state(), StoreState::Down);
        assert!(matches!(
            registry.get(&name("main")),
            Err(CredentialStoreError::UnknownStore(_))
        ));
    }

    #[test]
    fn test_duplicate_store_is_rejected() {
        let registry = StoreRegistry::with_defaults();
        registry
            .add_store(name("main"), StoreConfig::memory())
            .expect("add");
        assert!(matches!(
            registry.add_store(name("main"), StoreConfig::memory()),
            Err(CredentialStoreError::DuplicateStore(_))
        ));
    }

    #[test]
    fn test_unknown_store_type() {
        let registry = StoreRegistry::new();
        assert!(matches!(
            registry.add_store(name("main"), StoreConfig::memory()),
            Err(CredentialStoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_failed_start_is_not_registered() {
        let registry = StoreRegistry::new();
        let backend = MemoryBackend::absent();
        registry.register_provider("memory", Arc::new(backend));
        assert!(matches!(
            registry.add_store(name("main"), StoreConfig::memory()),
            Err(CredentialStoreError::Backend { .. })
        ));
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_dispatch_unknown_store() {
        let registry = StoreRegistry::with_defaults();
        let outcome = registry.dispatch(&name("nope"), StoreOperation::ReadAliases);
        assert!(matches!(
            outcome.result,
            Err(CredentialStoreError::UnknownStore(_))
        ));
    }

    #[test]
    fn test_dispatch_at_address() {
        let registry = StoreRegistry::with_defaults();
        registry
            .add_store(name("main"), StoreConfig::memory())
            .expect("add");
        assert!(registry
            .dispatch_at(
                "subsystem=credentials/credential-store=main",
                StoreOperation::ReadAliases
            )
            .is_ok());
        assert!(matches!(
            registry
                .dispatch_at("subsystem=credentials", StoreOperation::ReadAliases)
                .result,
            Err(CredentialStoreError::MissingAddressKey { .. })
        ));
    }

    #[test]
    fn test_clear_text_reference_is_written_to_referenced_store() {
        let registry = with_vault(None);
        let config = StoreConfig::memory().with_credential_reference(
            CredentialReference::store_entry("vault", "main-pw").with_clear_text("changeit"),
        );
        registry.add_store(name("main"), config).expect("add");
        assert_eq!(vault_password(&registry).expect("stored"), "changeit");
    }

    #[test]
    fn test_clear_text_reference_replaces_existing_password() {
        let registry = with_vault(Some("old"));
        let config = StoreConfig::memory().with_credential_reference(
            CredentialReference::store_entry("vault", "main-pw").with_clear_text("changeit"),
        );
        registry.add_store(name("main"), config).expect("add");
        assert_eq!(vault_password(&registry).expect("stored"), "changeit");
    }

    #[test]
    fn test_failed_add_removes_written_password() {
        let registry = with_vault(None);
        register_failing_provider(&registry);

        assert!(matches!(
            registry.add_store(name("main"), failing_store_config()),
            Err(CredentialStoreError::Backend { .. })
        ));
        assert!(matches!(
            vault_password(&registry),
            Err(CredentialStoreError::NotFound { .. })
        ));
        assert_eq!(registry.names(), vec![name("vault")]);
    }

    #[test]
    fn test_failed_add_restores_previous_password() {
        let registry = with_vault(Some("old"));
        register_failing_provider(&registry);

        assert!(registry.add_store(name("main"), failing_store_config()).is_err());
        assert_eq!(vault_password(&registry).expect("restored"), "old");
    }

    #[test]
    fn test_reload_resolves_credential_source_again() {
        let registry = with_vault(Some("first"));
        let provider = Arc::new(RecordingProvider::default());
        registry.register_provider("recording", Arc::clone(&provider) as Arc<dyn BackendProvider>);
        let config = StoreConfig {
            store_type: Some("recording".to_owned()),
            ..StoreConfig::memory()
        }
        .with_credential_reference(CredentialReference::store_entry("vault", "main-pw"));
        registry.add_store(name("main"), config).expect("add");

        let rotated = registry.dispatch(
            &name("vault"),
            StoreOperation::set_password(alias("main-pw"), "second"),
        );
        assert_eq!(rotated.warnings.len(), 1);
        rotated.into_result().expect("rotate");
        registry
            .dispatch(&name("main"), StoreOperation::Reload)
            .into_result()
            .expect("reload");

        assert_eq!(
            *provider.passwords.lock().expect("passwords"),
            vec!["first".to_owned(), "second".to_owned()]
        );
    }

    #[test]
    fn test_credential_reference_must_be_complete() {
        let registry = StoreRegistry::with_defaults();
        let config = StoreConfig::memory().with_credential_reference(CredentialReference {
            store: Some("vault".to_owned()),
            ..CredentialReference::default()
        });
        assert!(matches!(
            registry.add_store(name("main"), config),
            Err(CredentialStoreError::InvalidConfig { .. })
        ));
    }
}
