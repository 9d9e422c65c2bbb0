//! Encrypted single-file backend for credential stores.
//!
//! Register [`FileBackend`] under [`FILE_STORE_TYPE`] and configure stores
//! with a `location` and a `credential-reference`:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use credstore_core::{CredentialReference, StoreConfig, StoreName, StoreRegistry};
//! use credstore_file::{FileBackend, FILE_STORE_TYPE};
//!
//! let registry = StoreRegistry::with_defaults();
//! registry.register_provider(FILE_STORE_TYPE, Arc::new(FileBackend::new()));
//!
//! let config = StoreConfig::file("/var/lib/app/main.cs")
//!     .with_create(true)
//!     .with_credential_reference(CredentialReference::clear_text("changeit"));
//! registry.add_store(StoreName::new("main")?, config)?;
//! # Ok::<(), credstore_core::CredentialStoreError>(())
//! ```
//!
//! Key derivation cost is fixed when a store file is created and can be tuned
//! through the implementation properties [`KDF_MEMORY_PROPERTY`],
//! [`KDF_ITERATIONS_PROPERTY`] and [`KDF_PARALLELISM_PROPERTY`].

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod format;
mod store;

pub use format::{KDF_ITERATIONS_PROPERTY, KDF_MEMORY_PROPERTY, KDF_PARALLELISM_PROPERTY};
pub use store::{FileBackend, FILE_STORE_TYPE};
