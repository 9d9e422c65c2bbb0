//! Common test utilities shared across integration tests.

#![allow(dead_code, missing_docs)]

use std::sync::Arc;

use credstore_core::backend::MemoryBackend;
use credstore_core::{
    Alias, CredentialStoreService, StoreConfig, StoreName, StoreOperation, StoreRegistry,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub fn store_name(name: &str) -> StoreName {
    StoreName::new(name).expect("store name")
}

pub fn alias(name: &str) -> Alias {
    Alias::new(name).expect("alias")
}

/// A registry with one in-memory store whose backend stays reachable for
/// inspection and fault injection.
pub struct MemoryFixture {
    pub registry: StoreRegistry,
    pub backend: MemoryBackend,
    pub service: Arc<CredentialStoreService>,
}

impl MemoryFixture {
    pub fn new(name: &str) -> Self {
        Self::with_backend(name, MemoryBackend::new(), StoreConfig::memory())
    }

    pub fn with_backend(name: &str, backend: MemoryBackend, config: StoreConfig) -> Self {
        init_tracing();
        let registry = StoreRegistry::new();
        registry.register_provider("memory", Arc::new(backend.clone()));
        let service = registry
            .add_store(store_name(name), config)
            .expect("add store");
        Self {
            registry,
            backend,
            service,
        }
    }

    pub fn name(&self) -> &StoreName {
        self.service.name()
    }

    pub fn add_password(&self, alias_name: &str, secret: &str) {
        self.registry
            .dispatch(
                self.name(),
                StoreOperation::add_password(alias(alias_name), secret),
            )
            .into_result()
            .expect("add password");
    }

    pub fn persisted_password(&self, alias_name: &str) -> Option<String> {
        self.backend
            .persisted(&alias(alias_name))
            .and_then(|credential| {
                credential
                    .as_password()
                    .map(|password| password.expose_secret().to_owned())
            })
    }
}
