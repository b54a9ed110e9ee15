use async_trait::async_trait;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::IdentityError;
use crate::storage::KeyValueStore;

const SESSION_KEY: &str = "localUserSession";
const CREDENTIAL_SERVICE: &str = "riskchat_account";
pub const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub username: String,
    pub email: String,
}

impl UserIdentity {
    pub fn local(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            username: id.clone(),
            email: format!("{}@example.com", id),
            id,
        }
    }
}

/// Secret storage for account passwords.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<String>, IdentityError>;
    async fn set(&self, user_id: &str, password: &str) -> Result<(), IdentityError>;
}

pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self {
            service: CREDENTIAL_SERVICE.to_string(),
        }
    }

    fn entry(&self, user_id: &str) -> Result<Entry, IdentityError> {
        Entry::new(&self.service, user_id).map_err(|e| IdentityError::CredentialStore(e.to_string()))
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn get(&self, user_id: &str) -> Result<Option<String>, IdentityError> {
        match self.entry(user_id)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => {
                log::error!("Failed to read credential for '{}': {}", user_id, e);
                Err(IdentityError::CredentialStore(e.to_string()))
            }
        }
    }

    async fn set(&self, user_id: &str, password: &str) -> Result<(), IdentityError> {
        self.entry(user_id)?
            .set_password(password)
            .map_err(|e| IdentityError::CredentialStore(e.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    passwords: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_password(mut self, user_id: &str, password: &str) -> Self {
        self.passwords
            .get_mut()
            .insert(user_id.to_string(), password.to_string());
        self
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, user_id: &str) -> Result<Option<String>, IdentityError> {
        Ok(self.passwords.read().await.get(user_id).cloned())
    }

    async fn set(&self, user_id: &str, password: &str) -> Result<(), IdentityError> {
        self.passwords
            .write()
            .await
            .insert(user_id.to_string(), password.to_string());
        Ok(())
    }
}

/// Who is signed in, and account maintenance. The chat core only ever sees `UserIdentity::id`.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn current(&self) -> Result<Option<UserIdentity>, IdentityError>;
    async fn login(&self, username: &str, password: &str) -> Result<UserIdentity, IdentityError>;
    async fn logout(&self) -> Result<(), IdentityError>;
    async fn update_username(&self, new_username: &str) -> Result<UserIdentity, IdentityError>;
    async fn change_password(&self, current_password: &str, new_password: &str) -> Result<(), IdentityError>;
}

/// Single local account. The signed-in profile lives in the key-value store,
/// the password in a `CredentialStore`.
pub struct LocalIdentityStore {
    store: Arc<dyn KeyValueStore>,
    credentials: Arc<dyn CredentialStore>,
    account: RwLock<UserIdentity>,
}

impl LocalIdentityStore {
    pub fn new(store: Arc<dyn KeyValueStore>, credentials: Arc<dyn CredentialStore>, account: UserIdentity) -> Self {
        Self {
            store,
            credentials,
            account: RwLock::new(account),
        }
    }

    async fn write_session(&self, identity: &UserIdentity) -> Result<(), IdentityError> {
        let json = serde_json::to_string(identity)
            .map_err(|e| IdentityError::CredentialStore(format!("Failed to encode session: {}", e)))?;
        self.store.set(SESSION_KEY, &json).await?;
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for LocalIdentityStore {
    async fn current(&self) -> Result<Option<UserIdentity>, IdentityError> {
        let Some(raw) = self.store.get(SESSION_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<UserIdentity>(&raw) {
            Ok(identity) if !identity.id.is_empty() && !identity.username.is_empty() => {
                // A renamed session carries the account's current username
                self.account.write().await.username = identity.username.clone();
                Ok(Some(identity))
            }
            Ok(_) | Err(_) => {
                log::warn!("Discarding unreadable session record");
                self.store.remove(SESSION_KEY).await?;
                Ok(None)
            }
        }
    }

    async fn login(&self, username: &str, password: &str) -> Result<UserIdentity, IdentityError> {
        let account = self.account.read().await.clone();
        let stored = self.credentials.get(&account.id).await?;
        let valid = username == account.username && stored.as_deref().is_some_and(|p| p == password);
        if !valid {
            log::info!("Rejected login attempt for '{}'", username);
            return Err(IdentityError::InvalidCredentials);
        }
        self.write_session(&account).await?;
        log::info!("User '{}' signed in", account.username);
        Ok(account)
    }

    async fn logout(&self) -> Result<(), IdentityError> {
        self.store.remove(SESSION_KEY).await?;
        Ok(())
    }

    async fn update_username(&self, new_username: &str) -> Result<UserIdentity, IdentityError> {
        let new_username = new_username.trim();
        if new_username.is_empty() {
            return Err(IdentityError::UsernameRequired);
        }
        let mut session = self.current().await?.ok_or(IdentityError::NotSignedIn)?;
        session.username = new_username.to_string();
        self.write_session(&session).await?;
        self.account.write().await.username = session.username.clone();
        Ok(session)
    }

    /// With no stored password yet, the first change sets it.
    async fn change_password(&self, current_password: &str, new_password: &str) -> Result<(), IdentityError> {
        let account_id = self.account.read().await.id.clone();
        match self.credentials.get(&account_id).await? {
            Some(stored) if stored != current_password => return Err(IdentityError::CurrentPasswordIncorrect),
            Some(_) => {}
            None => log::info!("Setting initial password for '{}'", account_id),
        }
        if new_password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(IdentityError::PasswordTooShort(MIN_PASSWORD_CHARS));
        }
        self.credentials.set(&account_id, new_password).await
    }
}
