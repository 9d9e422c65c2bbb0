//! On-disk envelope for file stores.
//!
//! The file is a CBOR-encoded [`StoreEnvelope`]:
//!
//! ```text
//! { version, kdf: { salt, memory-kib, iterations, parallelism }, nonce, ciphertext }
//! ```
//!
//! `ciphertext` is XChaCha20-Poly1305 over the CBOR-encoded entry list. The
//! key is Argon2id of the store password with the recorded salt and cost, so
//! a store keeps opening after the defaults change. The associated data binds
//! the format label and the salt.

use std::collections::BTreeMap;

use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use credstore_core::{
    Alias, BackendError, BackendResult, Credential, CredentialKind, PasswordCredential,
    SecretKeyCredential,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const FORMAT_VERSION: u32 = 1;

/// Implementation property overriding the Argon2 memory cost, in KiB.
pub const KDF_MEMORY_PROPERTY: &str = "kdf-memory-kib";
/// Implementation property overriding the Argon2 pass count.
pub const KDF_ITERATIONS_PROPERTY: &str = "kdf-iterations";
/// Implementation property overriding the Argon2 lane count.
pub const KDF_PARALLELISM_PROPERTY: &str = "kdf-parallelism";

const STORE_AD_LABEL: &[u8] = b"credstore:file-store:v1";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
pub const KEY_LEN: usize = 32;

pub type StoreKey = Zeroizing<[u8; KEY_LEN]>;
pub type Entries = BTreeMap<Alias, Credential>;

/// Argon2id parameters recorded in the store file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KdfParams {
    salt: Vec<u8>,
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

impl KdfParams {
    /// Fresh parameters with a random salt and cost taken from the
    /// implementation properties, or the Argon2 defaults.
    pub fn generate(properties: &BTreeMap<String, String>) -> BackendResult<Self> {
        let mut salt = vec![0u8; SALT_LEN];
        OsRng
            .try_fill_bytes(&mut salt)
            .map_err(|err| BackendError::Crypto(err.to_string()))?;
        Ok(Self {
            salt,
            memory_kib: property(properties, KDF_MEMORY_PROPERTY, Params::DEFAULT_M_COST)?,
            iterations: property(properties, KDF_ITERATIONS_PROPERTY, Params::DEFAULT_T_COST)?,
            parallelism: property(properties, KDF_PARALLELISM_PROPERTY, Params::DEFAULT_P_COST)?,
        })
    }

    /// Derives the store key from `password`.
    pub fn derive_key(&self, password: &PasswordCredential) -> BackendResult<StoreKey> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|err| BackendError::Crypto(format!("invalid kdf parameters: {err}")))?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
            .hash_password_into(
                password.expose_secret().as_bytes(),
                &self.salt,
                key.as_mut_slice(),
            )
            .map_err(|err| BackendError::Crypto(format!("key derivation failed: {err}")))?;
        Ok(key)
    }

    fn associated_data(&self) -> Vec<u8> {
        let mut aad = Vec::with_capacity(STORE_AD_LABEL.len() + self.salt.len());
        aad.extend_from_slice(STORE_AD_LABEL);
        aad.extend_from_slice(&self.salt);
        aad
    }
}

fn property(properties: &BTreeMap<String, String>, name: &str, default: u32) -> BackendResult<u32> {
    properties.get(name).map_or(Ok(default), |value| {
        value.trim().parse().map_err(|_| BackendError::InvalidProperty {
            name: name.to_owned(),
            value: value.clone(),
        })
    })
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredEntry {
    alias: String,
    #[zeroize(skip)]
    kind: CredentialKind,
    secret: Vec<u8>,
}

impl StoredEntry {
    fn new(alias: &Alias, credential: &Credential) -> Self {
        let secret = match credential {
            Credential::Password(password) => password.expose_secret().as_bytes().to_vec(),
            Credential::SecretKey(key) => key.as_bytes().to_vec(),
        };
        Self {
            alias: alias.as_str().to_owned(),
            kind: credential.kind(),
            secret,
        }
    }

    fn into_entry(mut self) -> BackendResult<(Alias, Credential)> {
        let alias = Alias::new(std::mem::take(&mut self.alias))
            .map_err(|err| BackendError::Corrupted(err.to_string()))?;
        let secret = Zeroizing::new(std::mem::take(&mut self.secret));
        let credential = match self.kind {
            CredentialKind::Password => {
                let password = std::str::from_utf8(&secret).map_err(|_| {
                    BackendError::Corrupted(format!("password at alias '{alias}' is not UTF-8"))
                })?;
                Credential::Password(PasswordCredential::new(password))
            }
            CredentialKind::SecretKey => Credential::SecretKey(
                SecretKeyCredential::from_bytes(secret.to_vec())
                    .map_err(|err| BackendError::Corrupted(format!("alias '{alias}': {err}")))?,
            ),
        };
        Ok((alias, credential))
    }
}

/// Serialized form of a whole store.
#[derive(Serialize, Deserialize)]
pub struct StoreEnvelope {
    version: u32,
    kdf: KdfParams,
    nonce: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl StoreEnvelope {
    /// Encrypts `entries` under `key`.
    pub fn seal(kdf: &KdfParams, key: &StoreKey, entries: &Entries) -> BackendResult<Self> {
        let stored: Vec<StoredEntry> = entries
            .iter()
            .map(|(alias, credential)| StoredEntry::new(alias, credential))
            .collect();
        let mut plaintext = Zeroizing::new(Vec::new());
        ciborium::ser::into_writer(&stored, &mut *plaintext)
            .map_err(|err| BackendError::Serialization(err.to_string()))?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|err| BackendError::Crypto(err.to_string()))?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let aad = kdf.associated_data();
        let ciphertext = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: &plaintext,
                    aad: &aad,
                },
            )
            .map_err(|err| BackendError::Crypto(err.to_string()))?;

        Ok(Self {
            version: FORMAT_VERSION,
            kdf: kdf.clone(),
            nonce: nonce.to_vec(),
            ciphertext,
        })
    }

    /// Decrypts the entries with `key`.
    pub fn open(&self, key: &StoreKey) -> BackendResult<Entries> {
        if self.nonce.len() != NONCE_LEN {
            return Err(BackendError::Corrupted(format!(
                "nonce has {} bytes, expected {NONCE_LEN}",
                self.nonce.len()
            )));
        }
        let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let aad = self.kdf.associated_data();
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(
                    XNonce::from_slice(&self.nonce),
                    Payload {
                        msg: &self.ciphertext,
                        aad: &aad,
                    },
                )
                .map_err(|_| {
                    BackendError::Crypto(
                        "decryption failed: wrong password or tampered store".to_owned(),
                    )
                })?,
        );
        let stored: Vec<StoredEntry> = ciborium::de::from_reader(plaintext.as_slice())
            .map_err(|err| BackendError::Serialization(err.to_string()))?;
        stored.into_iter().map(StoredEntry::into_entry).collect()
    }

    /// KDF parameters the store was sealed with.
    pub const fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn serialize(&self) -> BackendResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| BackendError::Serialization(err.to_string()))?;
        Ok(bytes)
    }

    pub fn deserialize(bytes: &[u8]) -> BackendResult<Self> {
        let envelope: Self = ciborium::de::from_reader(bytes)
            .map_err(|err| BackendError::Serialization(err.to_string()))?;
        if envelope.version != FORMAT_VERSION {
            return Err(BackendError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}
