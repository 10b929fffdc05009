use std::collections::{HashMap, hash_map::Entry};

use super::{Identity, IdentityError, IdentityStore};

#[derive(Debug, Default)]
pub struct InMemoryWallet {
    identities: HashMap<String, Identity>,
}

impl IdentityStore for InMemoryWallet {
    fn exists(&self, alias: &str) -> Result<bool, IdentityError> {
        Ok(self.identities.contains_key(alias))
    }

    fn put(&mut self, alias: &str, identity: Identity) -> Result<(), IdentityError> {
        match self.identities.entry(alias.to_string()) {
            Entry::Occupied(stored) if *stored.get() != identity => {
                Err(IdentityError::IdentityConflict {
                    alias: alias.to_string(),
                })
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(entry) => {
                entry.insert(identity);
                Ok(())
            }
        }
    }

    fn load(&self, alias: &str) -> Result<Identity, IdentityError> {
        self.identities
            .get(alias)
            .cloned()
            .ok_or_else(|| IdentityError::IdentityNotFound {
                alias: alias.to_string(),
            })
    }

    fn list(&self) -> Result<Vec<String>, IdentityError> {
        let mut aliases: Vec<String> = self.identities.keys().cloned().collect();
        aliases.sort();
        Ok(aliases)
    }
}
