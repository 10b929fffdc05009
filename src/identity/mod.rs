use std::{
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info};

pub mod fs_wallet;
pub mod in_memory_wallet;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Alias `{alias}` is already bound to a different identity")]
    IdentityConflict { alias: String },
    #[error("No identity stored under alias `{alias}`")]
    IdentityNotFound { alias: String },
    #[error("Alias `{alias}` cannot name a wallet entry")]
    InvalidAlias { alias: String },
    #[error("Keystore `{}` must contain exactly one private key file, found {found} entries", keystore.display())]
    AmbiguousKeyMaterial { keystore: PathBuf, found: usize },
    #[error("Failed to read credential `{}`: {source}", path.display())]
    CredentialRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Identity storage failure at `{}`: {source}", path.display())]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Stored identity `{}` is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// X.509 identity: PEM encoded certificate and matching private key, plus
/// the membership service provider of the issuing organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub msp_id: String,
    pub certificate: String,
    pub private_key: String,
}

/// Holder of named identities. An alias is bound at most once and the
/// binding never changes afterwards.
pub trait IdentityStore {
    fn exists(&self, alias: &str) -> Result<bool, IdentityError>;

    /// Binds `identity` to `alias`. Storing the same identity again is a
    /// no-op, storing a different one is an [`IdentityError::IdentityConflict`].
    fn put(&mut self, alias: &str, identity: Identity) -> Result<(), IdentityError>;

    fn load(&self, alias: &str) -> Result<Identity, IdentityError>;

    fn list(&self) -> Result<Vec<String>, IdentityError>;
}

/// On-disk MSP material of a single user.
#[derive(Debug, Clone)]
pub struct CredentialBundle {
    pub certificate_path: PathBuf,
    pub keystore_dir: PathBuf,
}

impl CredentialBundle {
    pub fn from_msp_dir(msp_dir: impl AsRef<Path>) -> Self {
        let msp_dir = msp_dir.as_ref();
        Self {
            certificate_path: msp_dir.join("signcerts").join("cert.pem"),
            keystore_dir: msp_dir.join("keystore"),
        }
    }

    pub fn read(&self, msp_id: &str) -> Result<Identity, IdentityError> {
        let certificate = read_credential(&self.certificate_path)?;
        let key_path = self.single_key_file()?;
        let private_key = read_credential(&key_path)?;
        Ok(Identity {
            msp_id: msp_id.to_string(),
            certificate,
            private_key,
        })
    }

    fn single_key_file(&self) -> Result<PathBuf, IdentityError> {
        let entries =
            fs::read_dir(&self.keystore_dir).map_err(|source| IdentityError::CredentialRead {
                path: self.keystore_dir.clone(),
                source,
            })?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| IdentityError::CredentialRead {
                path: self.keystore_dir.clone(),
                source,
            })?;
            files.push(entry.path());
        }
        match <[PathBuf; 1]>::try_from(files) {
            Ok([key]) => Ok(key),
            Err(files) => Err(IdentityError::AmbiguousKeyMaterial {
                keystore: self.keystore_dir.clone(),
                found: files.len(),
            }),
        }
    }
}

fn read_credential(path: &Path) -> Result<String, IdentityError> {
    fs::read_to_string(path).map_err(|source| IdentityError::CredentialRead {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads the credential bundle and binds it to `alias`.
pub fn provision_identity(
    store: &mut impl IdentityStore,
    bundle: &CredentialBundle,
    alias: &str,
    msp_id: &str,
) -> Result<Identity, IdentityError> {
    let identity = bundle.read(msp_id)?;
    store.put(alias, identity.clone())?;
    info!(alias, msp_id, "identity provisioned");
    Ok(identity)
}

/// Loads `alias`, provisioning it from the bundle first if the store does
/// not know it yet.
pub fn ensure_identity(
    store: &mut impl IdentityStore,
    bundle: &CredentialBundle,
    alias: &str,
    msp_id: &str,
) -> Result<Identity, IdentityError> {
    if store.exists(alias)? {
        debug!(alias, "identity already present");
        return store.load(alias);
    }
    provision_identity(store, bundle, alias, msp_id)
}
