//! File-backed store provider.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use credstore_core::{
    Alias, BackendError, BackendProvider, BackendResult, BackendStore, Credential, CredentialKind,
    LoadParameters,
};
use tracing::{debug, info};

use crate::format::{Entries, KdfParams, StoreEnvelope, StoreKey};

/// Store type the file backend is registered under.
pub const FILE_STORE_TYPE: &str = "file";

/// Provider for encrypted single-file stores.
///
/// Each store lives in one file at its configured location and is unlocked
/// with the password from the store's credential reference. A missing file is
/// created on first flush when `create` is set.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileBackend;

impl FileBackend {
    /// Creates the provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl BackendProvider for FileBackend {
    fn load(&self, params: &LoadParameters<'_>) -> BackendResult<Box<dyn BackendStore>> {
        let path = params.location.clone().ok_or_else(|| {
            BackendError::Unavailable(format!("store '{}' has no location", params.store))
        })?;
        let password = params.credential_source.ok_or_else(|| {
            BackendError::Crypto(format!(
                "store '{}' needs a credential reference to unlock its file",
                params.store
            ))
        })?;

        let (kdf, key, entries) = match fs::read(&path) {
            Ok(bytes) => {
                let envelope = StoreEnvelope::deserialize(&bytes)?;
                let key = envelope.kdf().derive_key(password)?;
                let entries = envelope.open(&key)?;
                (envelope.kdf().clone(), key, entries)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if !params.create {
                    return Err(BackendError::Missing(path.display().to_string()));
                }
                let kdf = KdfParams::generate(params.implementation_properties)?;
                let key = kdf.derive_key(password)?;
                info!(store = %params.store, path = %path.display(), "creating new file store");
                (kdf, key, Entries::new())
            }
            Err(err) => {
                return Err(BackendError::io(
                    format!("reading '{}'", path.display()),
                    err,
                ))
            }
        };
        debug!(
            store = %params.store,
            path = %path.display(),
            entries = entries.len(),
            "loaded file store"
        );

        Ok(Box::new(FileStore {
            path,
            kdf,
            key,
            entries,
            modifiable: params.modifiable,
        }))
    }
}

struct FileStore {
    path: PathBuf,
    kdf: KdfParams,
    key: StoreKey,
    entries: Entries,
    modifiable: bool,
}

impl FileStore {
    const fn ensure_modifiable(&self) -> BackendResult<()> {
        if self.modifiable {
            Ok(())
        } else {
            Err(BackendError::NotModifiable)
        }
    }
}

impl BackendStore for FileStore {
    fn exists(&self, alias: &Alias, kind: CredentialKind) -> BackendResult<bool> {
        Ok(self
            .entries
            .get(alias)
            .is_some_and(|credential| credential.kind() == kind))
    }

    fn retrieve(&self, alias: &Alias, kind: CredentialKind) -> BackendResult<Option<Credential>> {
        Ok(self
            .entries
            .get(alias)
            .filter(|credential| credential.kind() == kind)
            .cloned())
    }

    fn store(&mut self, alias: &Alias, credential: Credential) -> BackendResult<()> {
        self.ensure_modifiable()?;
        self.entries.insert(alias.clone(), credential);
        Ok(())
    }

    fn remove(&mut self, alias: &Alias, kind: CredentialKind) -> BackendResult<()> {
        self.ensure_modifiable()?;
        if self.exists(alias, kind)? {
            self.entries.remove(alias);
        }
        Ok(())
    }

    fn flush(&mut self) -> BackendResult<()> {
        self.ensure_modifiable()?;
        let bytes = StoreEnvelope::seal(&self.kdf, &self.key, &self.entries)?.serialize()?;
        write_atomic(&self.path, &bytes)?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "flushed file store");
        Ok(())
    }

    fn aliases(&self) -> BackendResult<BTreeSet<Alias>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

/// Replaces `path` with `bytes` via a synced temporary file and a rename, so
/// readers see either the old or the new content. The parent directory is
/// synced afterwards so the rename survives a crash.
fn write_atomic(path: &Path, bytes: &[u8]) -> BackendResult<()> {
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(directory).map_err(|e| {
        BackendError::io(format!("creating directory '{}'", directory.display()), e)
    })?;

    let temp_path = temp_path(path);
    let written = write_synced(&temp_path, bytes);
    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written?;

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        BackendError::io(
            format!("renaming '{}' to '{}'", temp_path.display(), path.display()),
            e,
        )
    })?;
    sync_directory(directory)
}

fn write_synced(path: &Path, bytes: &[u8]) -> BackendResult<()> {
    let mut file = open_private(path).map_err(|e| {
        BackendError::io(format!("creating temporary file '{}'", path.display()), e)
    })?;
    file.write_all(bytes)
        .map_err(|e| BackendError::io(format!("writing '{}'", path.display()), e))?;
    file.sync_all()
        .map_err(|e| BackendError::io(format!("syncing '{}'", path.display()), e))
}

#[cfg(unix)]
fn sync_directory(directory: &Path) -> BackendResult<()> {
    File::open(directory)
        .and_then(|handle| handle.sync_all())
        .map_err(|e| BackendError::io(format!("syncing directory '{}'", directory.display()), e))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
const fn sync_directory(_directory: &Path) -> BackendResult<()> {
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn open_private(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
