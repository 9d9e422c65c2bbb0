//! Secret key codec.
//!
//! Generates symmetric keys and converts them to and from a portable text
//! form. The export format is standard base64 over a short header followed by
//! the raw key:
//!
//! ```text
//! "CSK" | version (0x01) | kind ('K') | key bytes (16, 24 or 32)
//! ```
//!
//! These functions hold no state and never log key material.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::error::CredentialStoreError;
use crate::types::{Alias, KeySize, SecretKeyCredential, StoreName};

const EXPORT_MAGIC: &[u8; 3] = b"CSK";
const EXPORT_VERSION: u8 = 1;
const EXPORT_KIND_SECRET_KEY: u8 = b'K';
const HEADER_LEN: usize = EXPORT_MAGIC.len() + 2;

/// Errors raised by the key codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Key size is not 128, 192 or 256 bits.
    #[error("unsupported key size {bits} (expected 128, 192 or 256)")]
    UnsupportedKeySize {
        /// Requested or observed size in bits.
        bits: u32,
    },

    /// The text is not a key export produced by [`export`].
    #[error("malformed key encoding: {0}")]
    MalformedKeyEncoding(String),

    /// The random source failed.
    #[error("crypto provider failure: {0}")]
    CryptoProvider(String),
}

impl CodecError {
    /// Lifts the codec error into a store error naming `store` and `alias`.
    #[must_use]
    pub fn in_store(self, store: &StoreName, alias: &Alias) -> CredentialStoreError {
        let store = store.clone();
        let alias = alias.clone();
        match self {
            Self::UnsupportedKeySize { bits } => {
                CredentialStoreError::UnsupportedKeySize { store, alias, bits }
            }
            Self::MalformedKeyEncoding(reason) => CredentialStoreError::MalformedKeyEncoding {
                store,
                alias,
                reason,
            },
            Self::CryptoProvider(reason) => CredentialStoreError::CryptoProvider {
                store,
                alias,
                reason,
            },
        }
    }
}

/// Generates a fresh key of `bits` bits from the operating system RNG.
///
/// # Errors
///
/// Returns [`CodecError::UnsupportedKeySize`] for sizes other than 128, 192
/// and 256, or [`CodecError::CryptoProvider`] if the RNG fails.
pub fn generate(bits: u32) -> Result<SecretKeyCredential, CodecError> {
    let size = KeySize::try_from(bits)?;
    let mut key = Zeroizing::new(vec![0u8; size.byte_len()]);
    OsRng
        .try_fill_bytes(key.as_mut_slice())
        .map_err(|err| CodecError::CryptoProvider(err.to_string()))?;
    SecretKeyCredential::from_bytes(key)
}

/// Encodes a key into its portable text form.
#[must_use]
pub fn export(key: &SecretKeyCredential) -> String {
    let mut raw = Zeroizing::new(Vec::with_capacity(HEADER_LEN + key.as_bytes().len()));
    raw.extend_from_slice(EXPORT_MAGIC);
    raw.push(EXPORT_VERSION);
    raw.push(EXPORT_KIND_SECRET_KEY);
    raw.extend_from_slice(key.as_bytes());
    STANDARD.encode(raw.as_slice())
}

/// Decodes a key produced by [`export`]. Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`CodecError::MalformedKeyEncoding`] if the text is not base64 or
/// the header is wrong, or [`CodecError::UnsupportedKeySize`] if the embedded
/// key has an unsupported length.
pub fn import(encoded: &str) -> Result<SecretKeyCredential, CodecError> {
    let raw = Zeroizing::new(
        STANDARD
            .decode(encoded.trim())
            .map_err(|err| CodecError::MalformedKeyEncoding(err.to_string()))?,
    );
    if raw.len() < HEADER_LEN {
        return Err(CodecError::MalformedKeyEncoding(
            "encoding is too short".to_owned(),
        ));
    }
    let (header, key) = raw.split_at(HEADER_LEN);
    if &header[..EXPORT_MAGIC.len()] != EXPORT_MAGIC {
        return Err(CodecError::MalformedKeyEncoding(
            "unrecognised key header".to_owned(),
        ));
    }
    let version = header[EXPORT_MAGIC.len()];
    if version != EXPORT_VERSION {
        return Err(CodecError::MalformedKeyEncoding(format!(
            "unsupported encoding version {version}"
        )));
    }
    if header[EXPORT_MAGIC.len() + 1] != EXPORT_KIND_SECRET_KEY {
        return Err(CodecError::MalformedKeyEncoding(
            "encoding does not hold a secret key".to_owned(),
        ));
    }
    SecretKeyCredential::from_bytes(key.to_vec())
}
