//! In-memory session state for the application
//!
//! Holds the authenticated user snapshot next to the [`AuthService`] that
//! produced it. The snapshot is never persisted; `restore` fetches it again
//! from the stored access token.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::service::{AuthService, CurrentUser};
use crate::types::{Credentials, User};
use crate::Result;

pub struct Session {
    auth: Arc<AuthService>,
    user: RwLock<Option<User>>,
}

impl Session {
    pub fn new(auth: Arc<AuthService>) -> Self {
        Self {
            auth,
            user: RwLock::new(None),
        }
    }

    pub fn auth(&self) -> &Arc<AuthService> {
        &self.auth
    }

    /// Log in and remember the user
    pub async fn login(&self, credentials: Credentials) -> Result<User> {
        let payload = self.auth.login(credentials).await?;
        *self.user.write().await = Some(payload.user.clone());
        Ok(payload.user)
    }

    pub async fn logout(&self) {
        self.auth.logout().await;
        self.user.write().await.take();
    }

    /// Re-fetch the user for a stored session
    ///
    /// An unreachable server keeps the previous snapshot; a missing or expired
    /// session drops it.
    pub async fn restore(&self) -> CurrentUser {
        let current = self.auth.current_user().await;
        match &current {
            CurrentUser::SignedIn(user) => *self.user.write().await = Some(user.clone()),
            CurrentUser::SignedOut | CurrentUser::Expired => {
                self.user.write().await.take();
            }
            CurrentUser::Unavailable(reason) => {
                tracing::debug!(
                    reason = %reason,
                    "keeping cached user while the api is unavailable"
                )
            }
        }
        current
    }

    pub async fn user(&self) -> Option<User> {
        self.user.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated().await
    }
}
