//! Encrypted file stores driven through the registry.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use credstore_core::{
    Alias, BackendError, CredentialReference, CredentialStoreError, OperationValue, StoreConfig,
    StoreName, StoreOperation, StoreRegistry,
};
use credstore_file::{
    FileBackend, FILE_STORE_TYPE, KDF_ITERATIONS_PROPERTY, KDF_MEMORY_PROPERTY,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn registry() -> StoreRegistry {
    init_tracing();
    let registry = StoreRegistry::with_defaults();
    registry.register_provider(FILE_STORE_TYPE, Arc::new(FileBackend::new()));
    registry
}

fn file_config(path: &Path, password: &str) -> StoreConfig {
    StoreConfig::file(path)
        .with_create(true)
        .with_property(KDF_MEMORY_PROPERTY, "64")
        .with_property(KDF_ITERATIONS_PROPERTY, "1")
        .with_credential_reference(CredentialReference::clear_text(password))
}

fn name(value: &str) -> StoreName {
    StoreName::new(value).expect("store name")
}

fn alias(value: &str) -> Alias {
    Alias::new(value).expect("alias")
}

#[test]
fn test_file_store_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("main.cs");
    let registry = registry();
    let main = name("main");

    registry
        .add_store(main.clone(), file_config(&path, "changeit"))
        .expect("add store");
    registry
        .dispatch(&main, StoreOperation::add_password(alias("db"), "s3cret"))
        .into_result()
        .expect("add password");
    registry
        .dispatch(&main, StoreOperation::generate_secret_key(alias("k")))
        .into_result()
        .expect("generate");
    let exported = registry
        .dispatch(&main, StoreOperation::export_secret_key(alias("k")))
        .into_result()
        .expect("export");

    registry
        .dispatch(&main, StoreOperation::Reload)
        .into_result()
        .expect("reload");
    assert_eq!(
        registry
            .dispatch(&main, StoreOperation::ReadAliases)
            .into_result()
            .expect("read"),
        OperationValue::Aliases(BTreeSet::from([alias("db"), alias("k")]))
    );
    assert_eq!(
        registry
            .dispatch(&main, StoreOperation::export_secret_key(alias("k")))
            .into_result()
            .expect("export after reload"),
        exported
    );

    // A fresh registry reading the same file sees the same contents.
    registry.remove_store(&main).expect("remove store");
    let second = self::registry();
    second
        .add_store(main.clone(), file_config(&path, "changeit").with_create(false))
        .expect("reopen");
    assert_eq!(
        second
            .dispatch(&main, StoreOperation::export_secret_key(alias("k")))
            .into_result()
            .expect("export from reopened store"),
        exported
    );
}

#[test]
fn test_file_store_rejects_wrong_password() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("main.cs");
    let registry = registry();
    let main = name("main");

    registry
        .add_store(main.clone(), file_config(&path, "changeit"))
        .expect("add store");
    registry
        .dispatch(&main, StoreOperation::add_password(alias("db"), "s3cret"))
        .into_result()
        .expect("add password");
    registry.remove_store(&main).expect("remove store");

    match registry.add_store(main.clone(), file_config(&path, "letmein")) {
        Err(CredentialStoreError::Backend {
            source: BackendError::Crypto(_),
            ..
        }) => {}
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(registry.names().is_empty());
}

#[test]
fn test_file_store_requires_location_and_existing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = registry();

    let no_location = StoreConfig {
        location: None,
        ..file_config(&dir.path().join("unused.cs"), "changeit")
    };
    assert!(matches!(
        registry.add_store(name("a"), no_location),
        Err(CredentialStoreError::InvalidConfig { .. })
    ));

    let missing = file_config(&dir.path().join("absent.cs"), "changeit").with_create(false);
    assert!(matches!(
        registry.add_store(name("b"), missing),
        Err(CredentialStoreError::Backend {
            source: BackendError::Missing(_),
            ..
        })
    ));
}

#[test]
fn test_file_store_password_from_memory_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("main.cs");
    let registry = registry();

    let vault = name("vault");
    registry
        .add_store(vault.clone(), StoreConfig::memory())
        .expect("vault");
    registry
        .dispatch(
            &vault,
            StoreOperation::add_password(alias("main-pw"), "changeit"),
        )
        .into_result()
        .expect("add");

    let config = StoreConfig {
        credential_reference: Some(CredentialReference::store_entry("vault", "main-pw")),
        ..file_config(&path, "ignored")
    };
    registry
        .add_store(name("main"), config)
        .expect("store unlocked through vault entry");
}

#[test]
fn test_relative_location() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = registry();
    let config = StoreConfig {
        relative_to: Some(dir.path().to_path_buf()),
        ..file_config(Path::new("stores/main.cs"), "changeit")
    };
    let main = name("main");
    registry.add_store(main.clone(), config).expect("add store");
    registry
        .dispatch(&main, StoreOperation::add_password(alias("db"), "pw"))
        .into_result()
        .expect("add password");
    assert!(dir.path().join("stores").join("main.cs").exists());
}
