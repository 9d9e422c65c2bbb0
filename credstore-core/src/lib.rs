//! Named credential stores holding passwords and secret keys.
//!
//! A credential store is a named, persistent collection of credentials keyed
//! by alias. This crate manages stores at runtime:
//!
//! - [`StoreRegistry`] keeps the running stores and the backend providers,
//!   keyed by store type
//! - [`CredentialStoreService`] owns one loaded store and gates every access
//!   on its lifecycle state
//! - [`dispatch`] runs administrative [`StoreOperation`]s (add, remove and
//!   update passwords; generate, import and export secret keys; reload)
//! - [`codec`] generates symmetric keys and converts them to and from text
//!
//! Backends implement [`BackendProvider`] and [`BackendStore`]. An in-memory
//! backend ships here; the encrypted file backend is in `credstore-file`.
//!
//! ```rust
//! use credstore_core::{Alias, StoreConfig, StoreName, StoreOperation, StoreRegistry};
//!
//! let registry = StoreRegistry::with_defaults();
//! let name = StoreName::new("main")?;
//! registry.add_store(name.clone(), StoreConfig::memory())?;
//!
//! let db = Alias::new("db")?;
//! registry
//!     .dispatch(&name, StoreOperation::add_password(db, "s3cret"))
//!     .into_result()?;
//! # Ok::<(), credstore_core::CredentialStoreError>(())
//! ```

#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod backend;
pub mod codec;
pub mod config;
pub mod dispatcher;
mod error;
pub mod handle;
pub mod logger;
pub mod registry;
pub mod service;
mod types;

pub use backend::{BackendError, BackendProvider, BackendResult, BackendStore, LoadParameters};
pub use config::{CredentialReference, StoreConfig};
pub use dispatcher::{
    dispatch, dispatch_with_timeout, OperationOutcome, OperationValue, StoreOperation, Warning,
};
pub use error::{CredentialStoreError, StoreResult};
pub use registry::StoreRegistry;
pub use service::{CredentialSource, CredentialStoreService, StoreState};
pub use types::{
    Alias, Credential, CredentialKind, KeySize, PasswordCredential, SecretKeyCredential,
    StoreName, CREDENTIAL_STORE_ADDRESS_KEY,
};
