//! Core type definitions for credential stores.
//!
//! This module contains the identifiers used to address stores and entries,
//! the entry-type selector and the two credential variants a store can hold.

use std::fmt;
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::codec::CodecError;
use crate::error::{CredentialStoreError, StoreResult};

/// Address element that names a credential store in a management address.
pub const CREDENTIAL_STORE_ADDRESS_KEY: &str = "credential-store";

// Identifiers

/// Name of a credential store, unique within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreName(String);

impl StoreName {
    /// Creates a store name.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::InvalidIdentifier`] if `name` is empty.
    pub fn new(name: impl Into<String>) -> StoreResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(CredentialStoreError::InvalidIdentifier { kind: "store name" });
        }
        Ok(Self(name))
    }

    /// Resolves a store name from a management address such as
    /// `subsystem=credentials/credential-store=main`.
    ///
    /// The address is scanned from the end and the first
    /// `credential-store=<name>` element found wins. The leading element names
    /// the owning subsystem and is never considered.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::MissingAddressKey`] if no element names a
    /// credential store, or [`CredentialStoreError::InvalidIdentifier`] if the
    /// element has an empty value.
    pub fn from_address(address: &str) -> StoreResult<Self> {
        let segments: Vec<&str> = address
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();
        segments
            .iter()
            .skip(1)
            .rev()
            .find_map(|segment| match segment.split_once('=') {
                Some((key, value)) if key == CREDENTIAL_STORE_ADDRESS_KEY => Some(value),
                _ => None,
            })
            .ok_or_else(|| CredentialStoreError::MissingAddressKey {
                address: address.to_owned(),
                key: CREDENTIAL_STORE_ADDRESS_KEY,
            })
            .and_then(Self::new)
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StoreName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Name of one entry within a store. Case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alias(String);

impl Alias {
    /// Creates an alias.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::InvalidIdentifier`] if `alias` is empty.
    pub fn new(alias: impl Into<String>) -> StoreResult<Self> {
        let alias = alias.into();
        if alias.is_empty() {
            return Err(CredentialStoreError::InvalidIdentifier { kind: "alias" });
        }
        Ok(Self(alias))
    }

    /// Returns the alias as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Alias {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Entry types

/// The credential variant an entry holds, also used as the entry-type
/// parameter of administrative operations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
pub enum CredentialKind {
    /// A [`PasswordCredential`].
    #[default]
    #[strum(
        to_string = "PasswordCredential",
        serialize = "org.wildfly.security.credential.PasswordCredential",
        serialize = "password"
    )]
    Password,
    /// A [`SecretKeyCredential`].
    #[strum(
        to_string = "SecretKeyCredential",
        serialize = "org.wildfly.security.credential.SecretKeyCredential",
        serialize = "secret-key"
    )]
    SecretKey,
}

impl CredentialKind {
    /// Resolves a textual entry type for `store`.
    ///
    /// Accepted values are the simple and fully qualified credential class
    /// names (`PasswordCredential`,
    /// `org.wildfly.security.credential.PasswordCredential`, and the same for
    /// `SecretKeyCredential`) plus the short forms `password` and `secret-key`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::UnsupportedEntryType`] naming the store
    /// and the offending value for anything else.
    pub fn from_entry_type(store: &StoreName, entry_type: &str) -> StoreResult<Self> {
        Self::from_str(entry_type).map_err(|_| CredentialStoreError::UnsupportedEntryType {
            store: store.clone(),
            entry_type: entry_type.to_owned(),
        })
    }

    /// Like [`Self::from_entry_type`], defaulting to [`Self::Password`] when no
    /// entry type was supplied.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialStoreError::UnsupportedEntryType`] for an unknown value.
    pub fn from_optional_entry_type(
        store: &StoreName,
        entry_type: Option<&str>,
    ) -> StoreResult<Self> {
        entry_type.map_or(Ok(Self::default()), |value| {
            Self::from_entry_type(store, value)
        })
    }
}

/// Allowed symmetric key sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeySize {
    /// 128-bit key.
    Bits128,
    /// 192-bit key.
    Bits192,
    /// 256-bit key.
    #[default]
    Bits256,
}

impl KeySize {
    /// Every supported size, smallest first.
    pub const ALL: [Self; 3] = [Self::Bits128, Self::Bits192, Self::Bits256];

    /// Returns the size in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Bits128 => 128,
            Self::Bits192 => 192,
            Self::Bits256 => 256,
        }
    }

    /// Returns the size in bytes.
    #[must_use]
    pub const fn byte_len(self) -> usize {
        match self {
            Self::Bits128 => 16,
            Self::Bits192 => 24,
            Self::Bits256 => 32,
        }
    }

    /// Maps a bit count to a supported size.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            128 => Some(Self::Bits128),
            192 => Some(Self::Bits192),
            256 => Some(Self::Bits256),
            _ => None,
        }
    }

    /// Maps a key length in bytes to a supported size.
    #[must_use]
    pub const fn from_byte_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(Self::Bits128),
            24 => Some(Self::Bits192),
            32 => Some(Self::Bits256),
            _ => None,
        }
    }
}

impl TryFrom<u32> for KeySize {
    type Error = CodecError;

    fn try_from(bits: u32) -> Result<Self, Self::Error> {
        Self::from_bits(bits).ok_or(CodecError::UnsupportedKeySize { bits })
    }
}

impl fmt::Display for KeySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

// Credentials

/// A password held in a store.
pub struct PasswordCredential {
    secret: SecretString,
}

impl PasswordCredential {
    /// Wraps a clear-text secret.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
        }
    }

    /// Returns the clear-text secret. Treat this as sensitive material.
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl From<SecretString> for PasswordCredential {
    fn from(secret: SecretString) -> Self {
        Self { secret }
    }
}

impl Clone for PasswordCredential {
    fn clone(&self) -> Self {
        Self::new(self.expose_secret().to_owned())
    }
}

impl PartialEq for PasswordCredential {
    fn eq(&self, other: &Self) -> bool {
        self.expose_secret()
            .as_bytes()
            .ct_eq(other.expose_secret().as_bytes())
            .into()
    }
}

impl Eq for PasswordCredential {}

impl fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredential")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// A symmetric key held in a store.
///
/// The key material is zeroized on drop and never printed.
#[derive(Clone)]
pub struct SecretKeyCredential {
    key: Zeroizing<Vec<u8>>,
    size: KeySize,
}

impl SecretKeyCredential {
    /// Wraps raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedKeySize`] unless the key is 16, 24 or
    /// 32 bytes long.
    pub fn from_bytes(bytes: impl Into<Zeroizing<Vec<u8>>>) -> Result<Self, CodecError> {
        let key = bytes.into();
        let size = KeySize::from_byte_len(key.len()).ok_or_else(|| {
            CodecError::UnsupportedKeySize {
                bits: u32::try_from(key.len().saturating_mul(8)).unwrap_or(u32::MAX),
            }
        })?;
        Ok(Self { key, size })
    }

    /// Returns the key size.
    #[must_use]
    pub const fn size(&self) -> KeySize {
        self.size
    }

    /// Returns the key size in bits.
    #[must_use]
    pub const fn bit_size(&self) -> u32 {
        self.size.bits()
    }

    /// Returns the raw key bytes. Treat this as sensitive material.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Short SHA-256 fingerprint of the key, safe to log.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key.as_slice());
        hex::encode(&digest[..8])
    }
}

impl PartialEq for SecretKeyCredential {
    fn eq(&self, other: &Self) -> bool {
        self.size == other.size && bool::from(self.key.as_slice().ct_eq(other.key.as_slice()))
    }
}

impl Eq for SecretKeyCredential {}

impl fmt::Debug for SecretKeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKeyCredential")
            .field("size", &self.size)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// One entry of a credential store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// A password.
    Password(PasswordCredential),
    /// A symmetric key.
    SecretKey(SecretKeyCredential),
}

impl Credential {
    /// Returns the variant of this credential.
    #[must_use]
    pub const fn kind(&self) -> CredentialKind {
        match self {
            Self::Password(_) => CredentialKind::Password,
            Self::SecretKey(_) => CredentialKind::SecretKey,
        }
    }

    /// Returns the password, if this is one.
    #[must_use]
    pub const fn as_password(&self) -> Option<&PasswordCredential> {
        match self {
            Self::Password(password) => Some(password),
            Self::SecretKey(_) => None,
        }
    }

    /// Returns the secret key, if this is one.
    #[must_use]
    pub const fn as_secret_key(&self) -> Option<&SecretKeyCredential> {
        match self {
            Self::SecretKey(key) => Some(key),
            Self::Password(_) => None,
        }
    }
}

impl From<PasswordCredential> for Credential {
    fn from(password: PasswordCredential) -> Self {
        Self::Password(password)
    }
}

impl From<SecretKeyCredential> for Credential {
    fn from(key: SecretKeyCredential) -> Self {
        Self::SecretKey(key)
    }
}
