//! Authentication boundary.
//!
//! Signup/login over bcrypt-hashed users plus opaque session tokens in
//! an in-memory cache. The fan-out core never sees credentials; it only
//! ever receives the user identity a token resolves to.

use std::collections::HashMap;
use std::sync::Arc;

use bcrypt::{hash, verify, DEFAULT_COST};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::session::UserId;
use crate::store::ChatStore;

/// Identity a session token resolves to.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub user_id: UserId,
    pub username: String,
}

pub struct AuthManager {
    store: Arc<ChatStore>,
    sessions: RwLock<HashMap<String, AuthedUser>>,
}

impl AuthManager {
    pub fn new(store: Arc<ChatStore>) -> Self {
        Self {
            store,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn signup(&self, username: &str, password: &str) -> Result<(UserId, String)> {
        if username.is_empty() || password.is_empty() {
            return Err(Error::BadRequest("username and password required".into()));
        }
        if self.store.user_by_username(username).await?.is_some() {
            return Err(Error::BadRequest("username already taken".into()));
        }

        let password_hash =
            hash(password, DEFAULT_COST).map_err(|e| Error::Internal(e.to_string()))?;
        let user_id = self.store.create_user(username, &password_hash).await?;
        info!("[Auth] New user {} ({})", username, user_id);

        let token = self.issue_token(user_id, username).await;
        Ok((user_id, token))
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(UserId, String)> {
        let user = self
            .store
            .user_by_username(username)
            .await?
            .ok_or(Error::LoginFail)?;
        let ok = verify(password, &user.password_hash).map_err(|_| Error::LoginFail)?;
        if !ok {
            return Err(Error::LoginFail);
        }
        info!("[Auth] User {} logged in", username);

        let token = self.issue_token(user.id, &user.username).await;
        Ok((user.id, token))
    }

    /// Resolve a session token. `None` means the caller stays at the
    /// door; the directory never registers an anonymous connection.
    pub async fn resolve(&self, token: &str) -> Option<AuthedUser> {
        self.sessions.read().await.get(token).cloned()
    }

    pub async fn logout(&self, token: &str) {
        self.sessions.write().await.remove(token);
    }

    async fn issue_token(&self, user_id: UserId, username: &str) -> String {
        let token = Uuid::new_v4().to_string();
        self.sessions.write().await.insert(
            token.clone(),
            AuthedUser {
                user_id,
                username: username.to_string(),
            },
        );
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn manager() -> (TempDir, AuthManager) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            ChatStore::new(&dir.path().join("chat.sqlite"))
                .await
                .unwrap(),
        );
        (dir, AuthManager::new(store))
    }

    #[tokio::test]
    async fn signup_then_login_resolves_same_identity() {
        let (_dir, auth) = manager().await;
        let (id, token) = auth.signup("ana", "secret").await.unwrap();
        assert_eq!(auth.resolve(&token).await.unwrap().user_id, id);

        let (login_id, token2) = auth.login("ana", "secret").await.unwrap();
        assert_eq!(login_id, id);
        assert_eq!(auth.resolve(&token2).await.unwrap().username, "ana");
    }

    #[tokio::test]
    async fn wrong_password_fails_login() {
        let (_dir, auth) = manager().await;
        auth.signup("ana", "secret").await.unwrap();
        assert!(matches!(
            auth.login("ana", "nope").await,
            Err(Error::LoginFail)
        ));
        assert!(matches!(
            auth.login("ghost", "secret").await,
            Err(Error::LoginFail)
        ));
    }

    #[tokio::test]
    async fn duplicate_username_rejected() {
        let (_dir, auth) = manager().await;
        auth.signup("ana", "secret").await.unwrap();
        assert!(matches!(
            auth.signup("ana", "other").await,
            Err(Error::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn unknown_token_resolves_to_none() {
        let (_dir, auth) = manager().await;
        assert!(auth.resolve("not-a-token").await.is_none());
    }
}
