//! Identity directory: canonical user records and credentials.
//!
//! Users are never hard-deleted; deactivation sets `disabled_at`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub password_hash: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub disabled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            email: self.email.clone(),
            full_name: self.full_name.clone(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: HashMap<Uuid, User>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredDirectoryState {
    users: Vec<User>,
}

impl From<StoredDirectoryState> for DirectoryState {
    fn from(value: StoredDirectoryState) -> Self {
        Self {
            users: value.users.into_iter().map(|user| (user.id, user)).collect(),
        }
    }
}

impl From<&DirectoryState> for StoredDirectoryState {
    fn from(value: &DirectoryState) -> Self {
        Self {
            users: value.users.values().cloned().collect(),
        }
    }
}

/// File-backed user store shared across request handlers.
#[derive(Clone)]
pub struct DirectoryStore {
    state: Arc<RwLock<DirectoryState>>,
    file_path: PathBuf,
}

impl DirectoryStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|err| Error::Storage(format!("Failed to create data directory: {}", err)))?;
        let file_path = base_dir.join("users.json");
        let state = load_state(&file_path).await?;
        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            file_path,
        })
    }

    /// Create a new identity with a verified email. Fails with `Conflict`
    /// when the email is already registered.
    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        full_name: Option<String>,
    ) -> Result<User> {
        let normalized_email = normalize_email(email)?;
        validate_password(password)?;

        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|user| user.email == normalized_email)
        {
            return Err(Error::Conflict(format!(
                "User '{}' already exists",
                normalized_email
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: normalized_email,
            full_name: sanitize_optional_string(full_name),
            password_hash: hash_password(password),
            email_verified: true,
            created_at: Utc::now(),
            disabled_at: None,
        };
        state.users.insert(user.id, user.clone());
        persist_state(&self.file_path, &state).await?;
        Ok(user)
    }

    /// Verify a credential pair. All failure modes collapse into the same
    /// error so callers cannot distinguish unknown emails from bad
    /// passwords.
    pub async fn verify_credentials(&self, email: &str, password: &str) -> Result<User> {
        let normalized_email = normalize_email(email).map_err(|_| Error::InvalidCredentials)?;
        let state = self.state.read().await;
        let user = state
            .users
            .values()
            .find(|user| user.email == normalized_email)
            .cloned()
            .ok_or(Error::InvalidCredentials)?;
        if user.disabled_at.is_some() || !verify_password(&user.password_hash, password) {
            return Err(Error::InvalidCredentials);
        }
        Ok(user)
    }

    pub async fn get(&self, user_id: Uuid) -> Result<User> {
        let state = self.state.read().await;
        state
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("User not found".to_string()))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let normalized_email = normalize_email(email)?;
        let state = self.state.read().await;
        Ok(state
            .users
            .values()
            .find(|user| user.email == normalized_email)
            .cloned())
    }

    pub async fn set_password(&self, user_id: Uuid, password: &str) -> Result<()> {
        validate_password(password)?;
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or_else(|| Error::NotFound("User not found".to_string()))?;
        user.password_hash = hash_password(password);
        persist_state(&self.file_path, &state).await?;
        Ok(())
    }
}

/// Generate a user-friendly credential for invited members.
pub fn generate_password() -> String {
    let mut bytes = [0_u8; 9];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn normalize_email(email: &str) -> Result<String> {
    let normalized = email.trim().to_lowercase();
    if normalized.is_empty() || !normalized.contains('@') {
        return Err(Error::InvalidInput("Invalid email".to_string()));
    }
    Ok(normalized)
}

fn validate_password(password: &str) -> Result<()> {
    if password.len() < 8 {
        return Err(Error::InvalidInput(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

fn sanitize_optional_string(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn hash_password(password: &str) -> String {
    let mut salt = [0_u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);

    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();

    format!(
        "v1${}${}",
        URL_SAFE_NO_PAD.encode(salt),
        URL_SAFE_NO_PAD.encode(digest)
    )
}

fn verify_password(stored_hash: &str, password: &str) -> bool {
    let mut parts = stored_hash.split('$');
    if parts.next() != Some("v1") {
        return false;
    }
    let (Some(encoded_salt), Some(encoded_digest)) = (parts.next(), parts.next()) else {
        return false;
    };

    let Ok(salt) = URL_SAFE_NO_PAD.decode(encoded_salt) else {
        return false;
    };
    let Ok(expected_digest) = URL_SAFE_NO_PAD.decode(encoded_digest) else {
        return false;
    };

    let mut hasher = Sha256::new();
    hasher.update(&salt);
    hasher.update(password.as_bytes());
    let actual_digest = hasher.finalize();
    expected_digest == actual_digest.as_slice()
}

async fn load_state(path: &Path) -> Result<DirectoryState> {
    if !path.exists() {
        return Ok(DirectoryState::default());
    }
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| Error::Storage(format!("Failed to read user store: {}", err)))?;
    if content.trim().is_empty() {
        return Ok(DirectoryState::default());
    }
    let stored: StoredDirectoryState = serde_json::from_str(&content)
        .map_err(|err| Error::Storage(format!("Failed to parse user store: {}", err)))?;
    Ok(stored.into())
}

async fn persist_state(path: &Path, state: &DirectoryState) -> Result<()> {
    let content = serde_json::to_string_pretty(&StoredDirectoryState::from(state))
        .map_err(|err| Error::Storage(format!("Failed to serialize user store: {}", err)))?;
    tokio::fs::write(path, content)
        .await
        .map_err(|err| Error::Storage(format!("Failed to write user store: {}", err)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn build_store() -> (DirectoryStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = DirectoryStore::new(temp_dir.path().join("directory"))
            .await
            .unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn create_and_verify_credentials() {
        let (store, _tmp) = build_store().await;
        let user = store
            .create_user("A@X.com", "Passw0rd1", Some("Ada".to_string()))
            .await
            .unwrap();
        assert_eq!(user.email, "a@x.com");

        let verified = store.verify_credentials("a@x.com", "Passw0rd1").await.unwrap();
        assert_eq!(verified.id, user.id);
    }

    #[tokio::test]
    async fn bad_password_and_unknown_email_are_indistinguishable() {
        let (store, _tmp) = build_store().await;
        store
            .create_user("a@x.com", "Passw0rd1", None)
            .await
            .unwrap();

        let wrong_password = store.verify_credentials("a@x.com", "nope-nope").await;
        let unknown_email = store.verify_credentials("b@x.com", "Passw0rd1").await;
        assert!(matches!(wrong_password, Err(Error::InvalidCredentials)));
        assert!(matches!(unknown_email, Err(Error::InvalidCredentials)));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let (store, _tmp) = build_store().await;
        store
            .create_user("a@x.com", "Passw0rd1", None)
            .await
            .unwrap();
        let second = store.create_user("A@x.com ", "Passw0rd2", None).await;
        assert!(matches!(second, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn password_reset_replaces_credential() {
        let (store, _tmp) = build_store().await;
        let user = store
            .create_user("a@x.com", "Passw0rd1", None)
            .await
            .unwrap();
        store.set_password(user.id, "NewPassw0rd").await.unwrap();

        assert!(store.verify_credentials("a@x.com", "Passw0rd1").await.is_err());
        assert!(store.verify_credentials("a@x.com", "NewPassw0rd").await.is_ok());
    }

    #[test]
    fn generated_passwords_meet_minimum_length() {
        let password = generate_password();
        assert!(password.len() >= 8);
    }
}
