//! Keypair lifecycle, run once per login.
//!
//! The private half never leaves local storage; the public half is
//! published on the profile. A missing or unusable local key is replaced
//! with a fresh pair, which makes anything encrypted to the old key
//! unreadable.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use tandem_remote::RemoteStore;
use tandem_shared::keys::{self, KeyPair};
use tandem_shared::{KeyError, UserId};
use tandem_store::LocalStorage;

use crate::error::ClientError;
use crate::layout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// The persisted private key was imported.
    Loaded,
    /// No key was stored; this is the user's first login on this device.
    Generated,
    /// A stored key existed but could not be imported.
    Regenerated,
}

#[derive(Debug, Clone)]
pub struct KeySession {
    pub keypair: KeyPair,
    pub status: KeyStatus,
    /// Whether the profile holds our public key after this login.
    pub published: bool,
}

pub struct KeyManager {
    storage: Arc<dyn LocalStorage>,
    remote: Arc<dyn RemoteStore>,
}

fn private_key_slot(user: &UserId) -> String {
    format!("private_key:{user}")
}

impl KeyManager {
    pub fn new(storage: Arc<dyn LocalStorage>, remote: Arc<dyn RemoteStore>) -> Self {
        Self { storage, remote }
    }

    /// Load the user's keypair, generating and publishing a new one if the
    /// local copy is missing or broken. Publication and local persistence
    /// failures are logged, not returned.
    pub async fn ensure_keypair(&self, user: &UserId) -> Result<KeySession, ClientError> {
        let slot = private_key_slot(user);
        let stored = self.storage.get(&slot).unwrap_or_else(|e| {
            warn!(user = %user, error = %e, "Could not read stored private key");
            None
        });

        let (keypair, status) = match stored {
            Some(pem) => match load(pem).await {
                Ok(keypair) => (keypair, KeyStatus::Loaded),
                Err(e) => {
                    warn!(user = %user, error = %e, "Stored private key unusable, regenerating");
                    (generate().await?, KeyStatus::Regenerated)
                }
            },
            None => (generate().await?, KeyStatus::Generated),
        };

        if status != KeyStatus::Loaded {
            let pem = keys::export_private_key(keypair.private_key())?;
            if let Err(e) = self.storage.set(&slot, &pem) {
                warn!(user = %user, error = %e, "Failed to persist private key");
            }
        }

        let public_pem = keys::export_public_key(keypair.public_key())?;
        let published = self
            .publish(user, &public_pem, status != KeyStatus::Loaded)
            .await;

        info!(
            user = %user,
            ?status,
            fingerprint = %keypair.fingerprint(),
            published,
            "Keypair ready"
        );

        Ok(KeySession {
            keypair,
            status,
            published,
        })
    }

    /// Make sure the profile carries `public_pem`. Unless `force` is set the
    /// profile is read first and only rewritten if it differs.
    async fn publish(&self, user: &UserId, public_pem: &str, force: bool) -> bool {
        let path = layout::public_key(user);

        if !force {
            match self.remote.get(&path).await {
                Ok(Some(Value::String(current))) if current.trim() == public_pem.trim() => {
                    return true;
                }
                Ok(_) => {
                    info!(user = %user, "Profile public key missing or stale, republishing");
                }
                Err(e) => {
                    warn!(user = %user, error = %e, "Could not read published public key");
                    return false;
                }
            }
        }

        match self
            .remote
            .set(&path, Value::String(public_pem.to_string()))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(user = %user, error = %e, "Failed to publish public key");
                false
            }
        }
    }
}

async fn generate() -> Result<KeyPair, KeyError> {
    tokio::task::spawn_blocking(KeyPair::generate)
        .await
        .map_err(|e| KeyError::Generation(e.to_string()))?
}

async fn load(pem: String) -> Result<KeyPair, KeyError> {
    tokio::task::spawn_blocking(move || keys::import_private_key(&pem).map(KeyPair::from_private))
        .await
        .map_err(|e| KeyError::Import(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    use tandem_remote::{FaultOp, MemoryTree};
    use tandem_store::MemoryStorage;

    fn existing() -> &'static KeyPair {
        static PAIR: OnceLock<KeyPair> = OnceLock::new();
        PAIR.get_or_init(|| KeyPair::generate().unwrap())
    }

    fn manager() -> (KeyManager, Arc<MemoryStorage>, Arc<MemoryTree>) {
        let storage = Arc::new(MemoryStorage::new());
        let tree = Arc::new(MemoryTree::new());
        (KeyManager::new(storage.clone(), tree.clone()), storage, tree)
    }

    #[tokio::test]
    async fn test_loads_stored_key_without_republishing() {
        let (manager, storage, tree) = manager();
        let user = UserId::from("u1");
        let pair = existing();
        let public = keys::export_public_key(pair.public_key()).unwrap();
        storage
            .set("private_key:u1", &keys::export_private_key(pair.private_key()).unwrap())
            .unwrap();
        tree.set("users/u1/publicKey", Value::String(public)).await.unwrap();
        tree.fail_always(FaultOp::Write, "users");

        let session = manager.ensure_keypair(&user).await.unwrap();
        assert_eq!(session.status, KeyStatus::Loaded);
        assert!(session.published);
        assert_eq!(session.keypair.fingerprint(), pair.fingerprint());
    }

    #[tokio::test]
    async fn test_republishes_when_profile_key_differs() {
        let (manager, storage, tree) = manager();
        let pair = existing();
        storage
            .set("private_key:u1", &keys::export_private_key(pair.private_key()).unwrap())
            .unwrap();
        tree.set("users/u1/publicKey", Value::String("stale".into()))
            .await
            .unwrap();

        let session = manager.ensure_keypair(&UserId::from("u1")).await.unwrap();
        assert_eq!(session.status, KeyStatus::Loaded);
        assert_eq!(
            tree.get("users/u1/publicKey").await.unwrap(),
            Some(Value::String(keys::export_public_key(pair.public_key()).unwrap()))
        );
    }

    #[tokio::test]
    async fn test_first_login_generates_and_persists() {
        let (manager, storage, tree) = manager();
        let user = UserId::from("fresh");

        let session = manager.ensure_keypair(&user).await.unwrap();
        assert_eq!(session.status, KeyStatus::Generated);
        assert!(session.published);

        let stored = storage.get("private_key:fresh").unwrap().unwrap();
        let reloaded = keys::import_private_key(&stored).unwrap();
        assert_eq!(
            KeyPair::from_private(reloaded).fingerprint(),
            session.keypair.fingerprint()
        );
        assert!(tree.get("users/fresh/publicKey").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_publish_failure_does_not_fail_login() {
        let (manager, storage, tree) = manager();
        let pair = existing();
        storage
            .set("private_key:u1", &keys::export_private_key(pair.private_key()).unwrap())
            .unwrap();
        tree.fail_always(FaultOp::Read, "users");

        let session = manager.ensure_keypair(&UserId::from("u1")).await.unwrap();
        assert_eq!(session.status, KeyStatus::Loaded);
        assert!(!session.published);
    }
}
