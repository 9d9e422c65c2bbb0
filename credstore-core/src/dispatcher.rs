//! Administrative operations on credential stores.
//!
//! [`dispatch`] runs one [`StoreOperation`] against a
//! [`CredentialStoreService`]. Every operation first waits for the store to be
//! ready, then runs under the store's handle lock: exclusively for anything
//! that changes the store, shared for reads.
//!
//! Mutations are made durable before they are reported as successful. When a
//! flush fails the in-memory change is reverted so that the loaded store keeps
//! matching what is persisted.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use strum::{AsRefStr, IntoStaticStr};
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::{CredentialStoreError, StoreResult};
use crate::handle::CredentialStoreHandle;
use crate::service::CredentialStoreService;
use crate::types::{Alias, Credential, CredentialKind, KeySize, PasswordCredential, StoreName};

/// Key size used by [`StoreOperation::generate_secret_key`].
pub const DEFAULT_KEY_SIZE: u32 = KeySize::Bits256.bits();

/// An administrative operation on one store.
#[derive(Debug, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum StoreOperation {
    /// Reload the store from its backend, discarding unflushed state.
    Reload,
    /// List every alias in the store.
    ReadAliases,
    /// Add a new password entry.
    AddAlias {
        /// Alias to create.
        alias: Alias,
        /// Entry type; only passwords are accepted.
        entry_type: CredentialKind,
        /// The password.
        secret: SecretString,
    },
    /// Remove an entry.
    RemoveAlias {
        /// Alias to remove.
        alias: Alias,
        /// Entry type that must be present.
        entry_type: CredentialKind,
    },
    /// Replace the password of an existing entry.
    SetSecret {
        /// Alias to update.
        alias: Alias,
        /// Entry type; only passwords are accepted.
        entry_type: CredentialKind,
        /// The new password.
        secret: SecretString,
    },
    /// Generate a new secret key.
    GenerateSecretKey {
        /// Alias to store the key at.
        alias: Alias,
        /// Key size in bits.
        key_size: u32,
    },
    /// Import a secret key from its exported form.
    ImportSecretKey {
        /// Alias to store the key at.
        alias: Alias,
        /// The exported key text.
        key: SecretString,
    },
    /// Export a secret key.
    ExportSecretKey {
        /// Alias of the key.
        alias: Alias,
    },
}

impl StoreOperation {
    /// `add-alias` for a password.
    #[must_use]
    pub fn add_password(alias: Alias, secret: impl Into<String>) -> Self {
        Self::AddAlias {
            alias,
            entry_type: CredentialKind::Password,
            secret: SecretString::from(secret.into()),
        }
    }

    /// `set-secret` for a password.
    #[must_use]
    pub fn set_password(alias: Alias, secret: impl Into<String>) -> Self {
        Self::SetSecret {
            alias,
            entry_type: CredentialKind::Password,
            secret: SecretString::from(secret.into()),
        }
    }

    /// `remove-alias` for an entry of `entry_type`.
    #[must_use]
    pub const fn remove(alias: Alias, entry_type: CredentialKind) -> Self {
        Self::RemoveAlias { alias, entry_type }
    }

    /// `generate-secret-key` with the default 256-bit size.
    #[must_use]
    pub const fn generate_secret_key(alias: Alias) -> Self {
        Self::GenerateSecretKey {
            alias,
            key_size: DEFAULT_KEY_SIZE,
        }
    }

    /// `import-secret-key` from exported text.
    #[must_use]
    pub fn import_secret_key(alias: Alias, key: impl Into<String>) -> Self {
        Self::ImportSecretKey {
            alias,
            key: SecretString::from(key.into()),
        }
    }

    /// `export-secret-key`.
    #[must_use]
    pub const fn export_secret_key(alias: Alias) -> Self {
        Self::ExportSecretKey { alias }
    }

    /// Operation name, e.g. `generate-secret-key`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Whether the operation changes the store.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        !matches!(self, Self::ReadAliases | Self::ExportSecretKey { .. })
    }
}

/// Value produced by a successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationValue {
    /// The operation has no result value.
    Done,
    /// Result of `read-aliases`.
    Aliases(BTreeSet<Alias>),
    /// Result of `export-secret-key`.
    ExportedKey(String),
}

/// Advisory notice attached to an operation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// An entry was removed; services referencing it may need updating.
    UpdateDependants {
        /// Store the entry was removed from.
        store: StoreName,
        /// Removed alias.
        alias: Alias,
    },
    /// An entry's secret changed; services using it must reload to see it.
    ReloadDependants {
        /// Store holding the entry.
        store: StoreName,
        /// Updated alias.
        alias: Alias,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpdateDependants { store, alias } => write!(
                f,
                "alias '{alias}' was removed from credential store '{store}'; services referencing it need to be updated"
            ),
            Self::ReloadDependants { store, alias } => write!(
                f,
                "secret at alias '{alias}' in credential store '{store}' changed; services using it need to be reloaded"
            ),
        }
    }
}

/// Result of a dispatched operation plus any warnings it raised.
///
/// Warnings may be present even when the operation failed.
#[derive(Debug)]
#[must_use]
pub struct OperationOutcome {
    /// Operation result.
    pub result: StoreResult<OperationValue>,
    /// Advisory warnings.
    pub warnings: Vec<Warning>,
}

impl OperationOutcome {
    pub(crate) const fn failed(err: CredentialStoreError) -> Self {
        Self {
            result: Err(err),
            warnings: Vec::new(),
        }
    }

    /// Whether the operation succeeded.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Discards the warnings and returns the result.
    ///
    /// # Errors
    ///
    /// Returns the operation's error.
    pub fn into_result(self) -> StoreResult<OperationValue> {
        self.result
    }
}

/// Runs `operation` with the store's configured readiness window.
pub fn dispatch(service: &CredentialStoreService, operation: StoreOperation) -> OperationOutcome {
    dispatch_with_timeout(service, operation, service.readiness_timeout())
}

/// Runs `operation`, waiting at most `timeout` for the store to be ready.
#[tracing::instrument(skip_all, fields(store = %service.name(), operation = operation.name()))]
pub fn dispatch_with_timeout(
    service: &CredentialStoreService,
    operation: StoreOperation,
    timeout: Duration,
) -> OperationOutcome {
    let mut warnings = Vec::new();
    let result = execute(service, operation, timeout, &mut warnings);
    match &result {
        Ok(_) => debug!("operation completed"),
        Err(err) => warn!(error = %err, "operation failed"),
    }
    OperationOutcome { result, warnings }
}

fn execute(
    service: &CredentialStoreService,
    operation: StoreOperation,
    timeout: Duration,
    warnings: &mut Vec<Warning>,
) -> StoreResult<OperationValue> {
    match operation {
        StoreOperation::Reload => {
            service.await_ready(timeout)?;
            service.reload()?;
            Ok(OperationValue::Done)
        }
        StoreOperation::ReadAliases => service
            .read(timeout, CredentialStoreHandle::aliases)
            .map(OperationValue::Aliases),
        StoreOperation::AddAlias {
            alias,
            entry_type,
            secret,
        } => service
            .write(timeout, |handle| {
                add_alias(handle, &alias, entry_type, &secret)
            })
            .map(|()| OperationValue::Done),
        StoreOperation::RemoveAlias { alias, entry_type } => service
            .write(timeout, |handle| {
                remove_alias(handle, &alias, entry_type, warnings)
            })
            .map(|()| OperationValue::Done),
        StoreOperation::SetSecret {
            alias,
            entry_type,
            secret,
        } => service
            .write(timeout, |handle| {
                set_secret(handle, &alias, entry_type, &secret, warnings)
            })
            .map(|()| OperationValue::Done),
        StoreOperation::GenerateSecretKey { alias, key_size } => service
            .write(timeout, |handle| {
                let key = codec::generate(key_size)
                    .map_err(|err| err.in_store(handle.store_name(), &alias))?;
                let fingerprint = key.fingerprint();
                handle.store_and_flush(&alias, Credential::SecretKey(key))?;
                info!(store = %handle.store_name(), alias = %alias, key_size, %fingerprint, "generated secret key");
                Ok(())
            })
            .map(|()| OperationValue::Done),
        StoreOperation::ImportSecretKey { alias, key } => service
            .write(timeout, |handle| {
                let key = codec::import(key.expose_secret())
                    .map_err(|err| err.in_store(handle.store_name(), &alias))?;
                let fingerprint = key.fingerprint();
                handle.store_and_flush(&alias, Credential::SecretKey(key))?;
                info!(store = %handle.store_name(), alias = %alias, %fingerprint, "imported secret key");
                Ok(())
            })
            .map(|()| OperationValue::Done),
        StoreOperation::ExportSecretKey { alias } => service
            .read(timeout, |handle| export_secret_key(handle, &alias))
            .map(OperationValue::ExportedKey),
    }
}

fn require_password(handle: &CredentialStoreHandle, entry_type: CredentialKind) -> StoreResult<()> {
    match entry_type {
        CredentialKind::Password => Ok(()),
        other => Err(CredentialStoreError::UnsupportedEntryType {
            store: handle.store_name().clone(),
            entry_type: other.to_string(),
        }),
    }
}

fn add_alias(
    handle: &mut CredentialStoreHandle,
    alias: &Alias,
    entry_type: CredentialKind,
    secret: &SecretString,
) -> StoreResult<()> {
    require_password(handle, entry_type)?;
    if let Some(existing) = handle.entry(alias)? {
        return Err(CredentialStoreError::AlreadyExists {
            store: handle.store_name().clone(),
            alias: alias.clone(),
            kind: existing.kind(),
        });
    }
    let password = PasswordCredential::new(secret.expose_secret());
    handle.store_and_flush(alias, Credential::Password(password))?;
    info!(store = %handle.store_name(), alias = %alias, "added password");
    Ok(())
}

fn remove_alias(
    handle: &mut CredentialStoreHandle,
    alias: &Alias,
    entry_type: CredentialKind,
    warnings: &mut Vec<Warning>,
) -> StoreResult<()> {
    let store = handle.store_name().clone();
    let Some(removed) = handle.retrieve(alias, entry_type)? else {
        return Err(CredentialStoreError::NotFound {
            store,
            alias: alias.clone(),
            kind: entry_type,
        });
    };
    handle.remove(alias, entry_type)?;
    warnings.push(Warning::UpdateDependants {
        store: store.clone(),
        alias: alias.clone(),
    });

    if let Err(err) = handle.flush() {
        let err = err.for_alias(alias);
        match handle.store(alias, removed) {
            Ok(()) => warn!(store = %store, alias = %alias, error = %err, "flush failed after remove, entry restored"),
            Err(restore) => error!(
                store = %store,
                alias = %alias,
                error = %err,
                restore_error = %restore,
                "flush failed after remove and the entry could not be restored"
            ),
        }
        return Err(err);
    }
    info!(store = %store, alias = %alias, kind = %entry_type, "removed entry");
    Ok(())
}

fn set_secret(
    handle: &mut CredentialStoreHandle,
    alias: &Alias,
    entry_type: CredentialKind,
    secret: &SecretString,
    warnings: &mut Vec<Warning>,
) -> StoreResult<()> {
    require_password(handle, entry_type)?;
    if !handle.exists(alias, entry_type)? {
        return Err(CredentialStoreError::NotFound {
            store: handle.store_name().clone(),
            alias: alias.clone(),
            kind: entry_type,
        });
    }
    let password = PasswordCredential::new(secret.expose_secret());
    handle.store_and_flush(alias, Credential::Password(password))?;
    warnings.push(Warning::ReloadDependants {
        store: handle.store_name().clone(),
        alias: alias.clone(),
    });
    info!(store = %handle.store_name(), alias = %alias, "updated password");
    Ok(())
}

fn export_secret_key(handle: &CredentialStoreHandle, alias: &Alias) -> StoreResult<String> {
    match handle.retrieve(alias, CredentialKind::SecretKey)? {
        Some(Credential::SecretKey(key)) => Ok(codec::export(&key)),
        _ => Err(CredentialStoreError::NotFound {
            store: handle.store_name().clone(),
            alias: alias.clone(),
            kind: CredentialKind::SecretKey,
        }),
    }
}

/// Reads the password at `alias`; used to resolve credential references that
/// point into another store.
pub(crate) fn lookup_password(
    service: &CredentialStoreService,
    alias: &Alias,
) -> StoreResult<PasswordCredential> {
    service.read(service.readiness_timeout(), |handle| {
        match handle.retrieve(alias, CredentialKind::Password)? {
            Some(Credential::Password(password)) => Ok(password),
            _ => Err(CredentialStoreError::NotFound {
                store: handle.store_name().clone(),
                alias: alias.clone(),
                kind: CredentialKind::Password,
            }),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::StoreConfig;

    fn alias(name: &str) -> Alias {
        Alias::new(name).expect("alias")
    }

    fn started(backend: &MemoryBackend) -> CredentialStoreService {
        let service = CredentialStoreService::new(
            StoreName::new("main").expect("store"),
            StoreConfig::memory(),
            Arc::new(backend.clone()),
        );
        service.start().expect("start");
        service
    }

    #[test]
    fn test_operation_names() {
        assert_eq!(StoreOperation::Reload.name(), "reload");
        assert_eq!(StoreOperation::ReadAliases.name(), "read-aliases");
        assert_eq!(
            StoreOperation::generate_secret_key(alias("k")).name(),
            "generate-secret-key"
        );
        assert_eq!(
            StoreOperation::export_secret_key(alias("k")).name(),
            "export-secret-key"
        );
        assert!(!StoreOperation::ReadAliases.is_mutating());
        assert!(StoreOperation::Reload.is_mutating());
    }

    #[test]
    fn test_add_then_read_aliases() {
        let backend = MemoryBackend::new();
        let service = started(&backend);

        let outcome = dispatch(&service, StoreOperation::add_password(alias("db"), "s3cret"));
        assert!(outcome.is_ok());
        assert!(outcome.warnings.is_empty());

        let aliases = dispatch(&service, StoreOperation::ReadAliases)
            .into_result()
            .expect("read");
        assert_eq!(
            aliases,
            OperationValue::Aliases(BTreeSet::from([alias("db")]))
        );
        assert_eq!(
            backend.persisted(&alias("db")),
            Some(Credential::Password(PasswordCredential::new("s3cret")))
        );
    }

    #[test]
    fn test_add_rejects_secret_key_entry_type() {
        let backend = MemoryBackend::new();
        let service = started(&backend);
        let outcome = dispatch(
            &service,
            StoreOperation::AddAlias {
                alias: alias("k"),
                entry_type: CredentialKind::SecretKey,
                secret: SecretString::from("x".to_owned()),
            },
        );
        assert!(matches!(
            outcome.result,
            Err(CredentialStoreError::UnsupportedEntryType { .. })
        ));
        assert_eq!(backend.flush_count(), 0);
    }

    #[test]
    fn test_add_does_not_replace_secret_key() {
        let backend = MemoryBackend::new();
        let service = started(&backend);
        dispatch(&service, StoreOperation::generate_secret_key(alias("k")))
            .into_result()
            .expect("generate");
        let exported = dispatch(&service, StoreOperation::export_secret_key(alias("k")))
            .into_result()
            .expect("export");
        let flushes = backend.flush_count();

        let outcome = dispatch(&service, StoreOperation::add_password(alias("k"), "pw"));
        assert!(matches!(
            outcome.result,
            Err(CredentialStoreError::AlreadyExists {
                kind: CredentialKind::SecretKey,
                ..
            })
        ));
        assert_eq!(backend.flush_count(), flushes);
        assert_eq!(
            dispatch(&service, StoreOperation::export_secret_key(alias("k")))
                .into_result()
                .expect("export after rejected add"),
            exported
        );
    }

    #[test]
    fn test_set_secret_warns_dependants() {
        let backend = MemoryBackend::new();
        let service = started(&backend);
        dispatch(&service, StoreOperation::add_password(alias("db"), "old"))
            .into_result()
            .expect("add");

        let outcome = dispatch(&service, StoreOperation::set_password(alias("db"), "new"));
        assert!(outcome.is_ok());
        assert_eq!(
            outcome.warnings,
            vec![Warning::ReloadDependants {
                store: service.name().clone(),
                alias: alias("db"),
            }]
        );
    }

    #[test]
    fn test_set_secret_requires_existing_entry() {
        let backend = MemoryBackend::new();
        let service = started(&backend);
        let outcome = dispatch(&service, StoreOperation::set_password(alias("db"), "new"));
        assert!(matches!(
            outcome.result,
            Err(CredentialStoreError::NotFound { .. })
        ));
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn test_export_of_password_is_not_found() {
        let backend = MemoryBackend::new();
        let service = started(&backend);
        dispatch(&service, StoreOperation::add_password(alias("db"), "pw"))
            .into_result()
            .expect("add");
        let outcome = dispatch(&service, StoreOperation::export_secret_key(alias("db")));
        assert!(matches!(
            outcome.result,
            Err(CredentialStoreError::NotFound {
                kind: CredentialKind::SecretKey,
                ..
            })
        ));
    }

    #[test]
    fn test_warning_messages_name_store_and_alias() {
        let warning = Warning::UpdateDependants {
            store: StoreName::new("main").expect("store"),
            alias: alias("db"),
        };
        let message = warning.to_string();
        assert!(message.contains("'main'"));
        assert!(message.contains("'db'"));
    }
}
