//! Token persistence
//!
//! Provides:
//! - `KeyValueStorage`, the storage port over named string entries
//! - `MemoryStorage` and `FileStorage` implementations
//! - `TokenStore`, which maps a [`TokenPair`] onto three entries

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

use crate::config::StorageKeys;
use crate::token::TokenPair;
use crate::StorageError;

/// Durable string key-value storage
#[async_trait]
pub trait KeyValueStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Process-lifetime storage
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Storage backed by a JSON object file
///
/// Every mutation rewrites the file through a temporary sibling and a rename,
/// so a crash leaves either the old or the new contents on disk.
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileStorage {
    /// Open the file, starting empty when it does not exist yet
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            "opened token storage file"
        );

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(entries)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Bearer tokens: readable by the owner only
        let tmp = self.path.with_extension("tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStorage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(());
        }
        let mut next = entries.clone();
        next.remove(key);
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }
}

/// Persists the session token pair as three independent entries
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn KeyValueStorage>,
    keys: StorageKeys,
}

impl TokenStore {
    pub fn new(storage: Arc<dyn KeyValueStorage>, keys: StorageKeys) -> Self {
        Self { storage, keys }
    }

    /// Store over fresh in-memory storage with the default key names
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()), StorageKeys::default())
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    /// Write the pair, replacing whatever was stored before
    ///
    /// The access token entry is removed first and written last: a pair only
    /// reads back once every other entry is in place.
    pub async fn store(&self, pair: &TokenPair) -> Result<(), StorageError> {
        self.storage.remove(&self.keys.access_token).await?;

        match pair.refresh_token() {
            Some(refresh_token) => {
                self.storage
                    .set(&self.keys.refresh_token, refresh_token)
                    .await?
            }
            None => self.storage.remove(&self.keys.refresh_token).await?,
        }

        self.storage
            .set(&self.keys.expires_at, &pair.expires_at.to_rfc3339())
            .await?;
        self.storage
            .set(&self.keys.access_token, &pair.access_token)
            .await?;
        Ok(())
    }

    /// Read the stored pair
    ///
    /// A missing or unparseable expiry reads back as already expired; the
    /// refresh path then decides what happens to the session.
    pub async fn read(&self) -> Result<Option<TokenPair>, StorageError> {
        let Some(access_token) = self
            .storage
            .get(&self.keys.access_token)
            .await?
            .filter(|t| !t.is_empty())
        else {
            return Ok(None);
        };

        let refresh_token = self
            .storage
            .get(&self.keys.refresh_token)
            .await?
            .filter(|t| !t.is_empty());

        let expires_at = match self.storage.get(&self.keys.expires_at).await? {
            Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(at) => at.with_timezone(&Utc),
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "stored token expiry is unparseable, treating token as expired"
                    );
                    DateTime::<Utc>::default()
                }
            },
            None => {
                tracing::warn!("stored access token has no expiry, treating token as expired");
                DateTime::<Utc>::default()
            }
        };

        Ok(Some(TokenPair {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    /// Refresh token of the stored pair, if any
    pub async fn refresh_token(&self) -> Result<Option<String>, StorageError> {
        Ok(self.read().await?.and_then(|pair| pair.refresh_token))
    }

    /// Remove every entry; idempotent
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.storage.remove(&self.keys.access_token).await?;
        self.storage.remove(&self.keys.refresh_token).await?;
        self.storage.remove(&self.keys.expires_at).await?;
        Ok(())
    }
}
