use std::sync::Arc;

use chrono::Duration;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, StoreError};
use crate::models::{Entity, User};
use crate::repository::users::check_unique;
use crate::storage::{keys, KeyValueStore};

/// Length of generated session tokens
const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub token: String,
}

/// Random alphanumeric token for a new session
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct SessionStore {
    store: Arc<KeyValueStore>,
    /// Cache TTL of the registered users collection
    users_ttl: Option<Duration>,
}

impl SessionStore {
    pub fn new(store: Arc<KeyValueStore>) -> Self {
        Self {
            store,
            users_ttl: None,
        }
    }

    /// Cache `registeredUsers` with the same TTL as the user repository.
    pub fn with_users_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.users_ttl = ttl;
        self
    }

    fn check_token(token: &str) -> Result<()> {
        if token.trim().is_empty() {
            return Err(StoreError::validation("session token is empty"));
        }
        Ok(())
    }

    /// Persist user and token together.
    pub async fn sign_in(&self, user: &User, token: &str) -> Result<()> {
        user.validate()?;
        Self::check_token(token)?;
        let entries = vec![
            KeyValueStore::encode(keys::USER, user)?,
            KeyValueStore::encode(keys::TOKEN, token)?,
        ];
        self.store.set_many(entries).await?;
        info!(user = %user.id(), role = %user.role(), "Signed in");
        Ok(())
    }

    /// Add `user` to the registered users and sign them in, as one write.
    pub async fn register(&self, user: User, token: &str) -> Result<()> {
        user.validate()?;
        Self::check_token(token)?;

        let locks = self
            .store
            .lock_keys(&[keys::REGISTERED_USERS, keys::USER, keys::TOKEN])
            .await;
        let mut users: Vec<User> = self
            .store
            .fetch(keys::REGISTERED_USERS)
            .await?
            .unwrap_or_default();
        check_unique(&users, &user)?;
        users.push(user.clone());

        let (users_key, users_doc) = KeyValueStore::encode(keys::REGISTERED_USERS, &users)?;
        let (user_key, user_doc) = KeyValueStore::encode(keys::USER, &user)?;
        let (token_key, token_doc) = KeyValueStore::encode(keys::TOKEN, token)?;
        let entries = vec![
            (users_key, users_doc, self.users_ttl),
            (user_key, user_doc, None),
            (token_key, token_doc, None),
        ];
        self.store.commit_each(&locks, entries).await?;
        info!(user = %user.id(), role = %user.role(), "Registered and signed in");
        Ok(())
    }

    pub async fn current_user(&self) -> Option<User> {
        self.store.get(keys::USER).await
    }

    pub async fn token(&self) -> Option<String> {
        self.store.get(keys::TOKEN).await
    }

    /// Both halves of the session, or `None` if either is missing
    pub async fn load(&self) -> Option<Session> {
        let user = self.current_user().await?;
        let token = self.token().await?;
        Some(Session { user, token })
    }

    pub async fn is_authenticated(&self) -> bool {
        self.load().await.is_some()
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.store.remove_many(&[keys::USER, keys::TOKEN]).await?;
        info!("Signed out");
        Ok(())
    }
}
