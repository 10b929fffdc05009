use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use super::{Identity, IdentityError, IdentityStore};

const IDENTITY_EXTENSION: &str = "id";
const X509_TYPE: &str = "X.509";

/// On-disk layout of a single wallet entry, `<alias>.id`.
#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    version: u32,
    #[serde(rename = "mspId")]
    msp_id: String,
    #[serde(rename = "type")]
    kind: String,
    credentials: Credentials,
}

#[derive(Debug, Serialize, Deserialize)]
struct Credentials {
    certificate: String,
    #[serde(rename = "privateKey")]
    private_key: String,
}

impl From<&Identity> for IdentityFile {
    fn from(identity: &Identity) -> Self {
        Self {
            version: 1,
            msp_id: identity.msp_id.clone(),
            kind: X509_TYPE.to_string(),
            credentials: Credentials {
                certificate: identity.certificate.clone(),
                private_key: identity.private_key.clone(),
            },
        }
    }
}

impl From<IdentityFile> for Identity {
    fn from(file: IdentityFile) -> Self {
        Self {
            msp_id: file.msp_id,
            certificate: file.credentials.certificate,
            private_key: file.credentials.private_key,
        }
    }
}

/// Directory backed wallet, one JSON file per alias.
#[derive(Debug)]
pub struct FileSystemWallet {
    dir: PathBuf,
}

impl FileSystemWallet {
    /// Opens the wallet, creating the directory when missing.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, IdentityError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| IdentityError::Storage {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Aliases must stay a single file name inside the wallet directory.
    fn entry_path(&self, alias: &str) -> Result<PathBuf, IdentityError> {
        if alias.is_empty() || alias.contains(['/', '\\']) || alias.contains("..") {
            return Err(IdentityError::InvalidAlias {
                alias: alias.to_string(),
            });
        }
        Ok(self.dir.join(format!("{alias}.{IDENTITY_EXTENSION}")))
    }

    fn read_entry(&self, path: &Path) -> Result<Identity, IdentityError> {
        let contents = fs::read(path).map_err(|source| IdentityError::Storage {
            path: path.to_path_buf(),
            source,
        })?;
        let file: IdentityFile =
            serde_json::from_slice(&contents).map_err(|source| IdentityError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(file.into())
    }

    /// Writes next to the target, renames, then syncs the directory so the
    /// rename itself is on disk. A crash never leaves a half written entry.
    fn write_entry(&self, path: &Path, identity: &Identity) -> Result<(), IdentityError> {
        let storage_err = |source| IdentityError::Storage {
            path: path.to_path_buf(),
            source,
        };
        let contents = serde_json::to_vec_pretty(&IdentityFile::from(identity)).map_err(|source| {
            IdentityError::Corrupt {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let tmp_path = path.with_extension("id.tmp");
        let mut file = File::create(&tmp_path).map_err(storage_err)?;
        file.write_all(&contents).map_err(storage_err)?;
        file.sync_all().map_err(storage_err)?;
        fs::rename(&tmp_path, path).map_err(storage_err)?;
        self.sync_dir()
    }

    #[cfg(unix)]
    fn sync_dir(&self) -> Result<(), IdentityError> {
        File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .map_err(|source| IdentityError::Storage {
                path: self.dir.clone(),
                source,
            })
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<(), IdentityError> {
        Ok(())
    }
}

impl IdentityStore for FileSystemWallet {
    fn exists(&self, alias: &str) -> Result<bool, IdentityError> {
        let path = self.entry_path(alias)?;
        path.try_exists()
            .map_err(|source| IdentityError::Storage { path, source })
    }

    fn put(&mut self, alias: &str, identity: Identity) -> Result<(), IdentityError> {
        let path = self.entry_path(alias)?;
        if self.exists(alias)? {
            return if self.read_entry(&path)? == identity {
                Ok(())
            } else {
                Err(IdentityError::IdentityConflict {
                    alias: alias.to_string(),
                })
            };
        }
        self.write_entry(&path, &identity)
    }

    fn load(&self, alias: &str) -> Result<Identity, IdentityError> {
        if !self.exists(alias)? {
            return Err(IdentityError::IdentityNotFound {
                alias: alias.to_string(),
            });
        }
        self.read_entry(&self.entry_path(alias)?)
    }

    fn list(&self) -> Result<Vec<String>, IdentityError> {
        let storage_err = |source| IdentityError::Storage {
            path: self.dir.clone(),
            source,
        };
        let mut aliases = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(storage_err)? {
            let path = entry.map_err(storage_err)?.path();
            if path.extension().is_some_and(|ext| ext == IDENTITY_EXTENSION) {
                if let Some(alias) = path.file_stem().and_then(|stem| stem.to_str()) {
                    aliases.push(alias.to_string());
                }
            }
        }
        aliases.sort();
        Ok(aliases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{provision_identity, tests::write_msp_dir};

    fn identity(key: &str) -> Identity {
        Identity {
            msp_id: "Org1MSP".to_string(),
            certificate: "-----BEGIN CERTIFICATE-----\n".to_string(),
            private_key: key.to_string(),
        }
    }

    #[test]
    fn identities_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut wallet = FileSystemWallet::open(dir.path().join("wallet")).unwrap();
        wallet.put("appUser", identity("k1")).unwrap();

        let reopened = FileSystemWallet::open(dir.path().join("wallet")).unwrap();
        assert!(reopened.exists("appUser").unwrap());
        assert_eq!(reopened.load("appUser").unwrap(), identity("k1"));
        assert_eq!(reopened.list().unwrap(), vec!["appUser".to_string()]);
    }

    #[test]
    fn entry_uses_x509_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut wallet = FileSystemWallet::open(dir.path()).unwrap();
        wallet.put("appUser", identity("k1")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(dir.path().join("appUser.id")).unwrap()).unwrap();
        assert_eq!(raw["type"], "X.509");
        assert_eq!(raw["mspId"], "Org1MSP");
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["credentials"]["privateKey"], "k1");
        assert!(!dir.path().join("appUser.id.tmp").exists());
    }

    #[test]
    fn no_silent_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut wallet = FileSystemWallet::open(dir.path()).unwrap();
        wallet.put("appUser", identity("k1")).unwrap();
        wallet.put("appUser", identity("k1")).unwrap();

        let err = wallet.put("appUser", identity("k2")).unwrap_err();
        assert!(matches!(err, IdentityError::IdentityConflict { .. }));
        assert_eq!(wallet.load("appUser").unwrap(), identity("k1"));
    }

    #[test]
    fn missing_and_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = FileSystemWallet::open(dir.path()).unwrap();
        assert!(matches!(
            wallet.load("appUser").unwrap_err(),
            IdentityError::IdentityNotFound { .. }
        ));

        fs::write(dir.path().join("broken.id"), "{not json").unwrap();
        assert!(matches!(
            wallet.load("broken").unwrap_err(),
            IdentityError::Corrupt { .. }
        ));
    }

    #[test]
    fn aliases_cannot_escape_the_wallet() {
        let dir = tempfile::tempdir().unwrap();
        let mut wallet = FileSystemWallet::open(dir.path().join("wallet")).unwrap();

        for alias in ["../appUser", "nested/appUser", "nested\\appUser", "..", ""] {
            let err = wallet.put(alias, identity("k1")).unwrap_err();
            assert!(matches!(err, IdentityError::InvalidAlias { .. }), "{alias}");
            assert!(wallet.load(alias).is_err());
        }
        assert!(!dir.path().join("appUser.id").exists());
        assert!(wallet.list().unwrap().is_empty());
    }

    #[test]
    fn provisioning_twice_keeps_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = write_msp_dir(&dir.path().join("msp"), &["priv_sk"]);
        let mut wallet = FileSystemWallet::open(dir.path().join("wallet")).unwrap();

        provision_identity(&mut wallet, &bundle, "appUser", "Org1MSP").unwrap();
        provision_identity(&mut wallet, &bundle, "appUser", "Org1MSP").unwrap();
        assert_eq!(wallet.list().unwrap(), vec!["appUser".to_string()]);
        assert_eq!(fs::read_dir(wallet.dir()).unwrap().count(), 1);
    }
}
