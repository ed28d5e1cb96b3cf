//! 会话模式的用户记录：JSON 文件持久化，argon2 密码哈希。

use argon2::Argon2;
use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;

use crate::atomic::AtomicFile;

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("Username already exists")]
    UsernameTaken,
    #[error("Email already exists")]
    EmailTaken,
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("user file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug)]
pub struct UserStore {
    path: PathBuf,
    users: Mutex<Vec<UserRecord>>,
}

impl UserStore {
    /// 打开用户文件；文件不存在时从空列表开始。
    pub async fn open(path: PathBuf) -> Result<Self, UserStoreError> {
        let users = match fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        info!(path = ?path, count = users.len(), "user store loaded");
        Ok(Self {
            path,
            users: Mutex::new(users),
        })
    }

    /// 注册新用户。用户名区分大小写，邮箱不区分。
    pub async fn create(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserRecord, UserStoreError> {
        let password = password.to_string();
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|err| UserStoreError::Hash(err.to_string()))??;

        let mut users = self.users.lock().await;
        if users.iter().any(|user| user.username == username) {
            return Err(UserStoreError::UsernameTaken);
        }
        if users
            .iter()
            .any(|user| user.email.eq_ignore_ascii_case(email))
        {
            return Err(UserStoreError::EmailTaken);
        }
        let record = UserRecord {
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
        };
        users.push(record.clone());
        if let Err(err) = self.persist(&users).await {
            users.pop();
            return Err(err);
        }
        info!(username, "user created");
        Ok(record)
    }

    pub async fn find(&self, username: &str) -> Option<UserRecord> {
        let users = self.users.lock().await;
        users.iter().find(|user| user.username == username).cloned()
    }

    /// 校验用户名与密码，成功时返回用户记录。
    pub async fn authenticate(&self, username: &str, password: &str) -> Option<UserRecord> {
        let user = self.find(username).await?;
        let hash = user.password_hash.clone();
        let password = password.to_string();
        let ok = tokio::task::spawn_blocking(move || verify_password(&hash, &password))
            .await
            .unwrap_or(false);
        ok.then_some(user)
    }

    async fn persist(&self, users: &[UserRecord]) -> Result<(), UserStoreError> {
        let bytes = serde_json::to_vec_pretty(users)?;
        let mut atomic = AtomicFile::new(&self.path).await?;
        if let Err(err) = atomic.file_mut().write_all(&bytes).await {
            atomic.cleanup().await;
            return Err(err.into());
        }
        atomic.finalize().await?;
        Ok(())
    }
}

pub fn hash_password(password: &str) -> Result<String, UserStoreError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| UserStoreError::Hash(err.to_string()))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter22").expect("hash");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(&hash, "hunter22"));
        assert!(!verify_password(&hash, "hunter23"));
        assert!(!verify_password("not-a-phc-string", "hunter22"));
    }

    #[tokio::test]
    async fn create_persists_and_reloads() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("users.json");
        let store = UserStore::open(path.clone()).await.expect("open");
        store
            .create("alice", "alice@example.com", "password1")
            .await
            .expect("create");

        let reopened = UserStore::open(path).await.expect("reopen");
        let user = reopened
            .authenticate("alice", "password1")
            .await
            .expect("authenticate");
        assert_eq!(user.email, "alice@example.com");
        assert!(reopened.authenticate("alice", "wrong").await.is_none());
        assert!(reopened.authenticate("bob", "password1").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_username_and_email_are_rejected() {
        let temp = tempdir().expect("tempdir");
        let store = UserStore::open(temp.path().join("users.json"))
            .await
            .expect("open");
        store
            .create("alice", "alice@example.com", "password1")
            .await
            .expect("create");

        let same_name = store.create("alice", "other@example.com", "password1").await;
        assert!(matches!(same_name, Err(UserStoreError::UsernameTaken)));
        let same_email = store.create("bob", "ALICE@example.com", "password1").await;
        assert!(matches!(same_email, Err(UserStoreError::EmailTaken)));
    }
}
