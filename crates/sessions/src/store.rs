use std::{collections::HashMap, future::Future};

use {async_trait::async_trait, tokio::sync::RwLock, tokio_util::sync::CancellationToken};

use crate::error::{Error, Result};

/// Byte-oriented key/value contract the session middleware depends on.
///
/// `get` distinguishes "not found" (`Ok(None)`) from failure. Every call
/// takes the caller's cancellation token and gives up with
/// [`Error::Cancelled`] once it fires.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, cancel: &CancellationToken, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, cancel: &CancellationToken, key: &str, value: &[u8]) -> Result<()>;

    /// Removing a missing key is not an error.
    async fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<()>;
}

/// Race `fut` against `cancel`.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::Cancelled),
        out = fut => out,
    }
}

/// Process-local store. State is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, cancel: &CancellationToken, key: &str) -> Result<Option<Vec<u8>>> {
        cancellable(cancel, async { Ok(self.entries.read().await.get(key).cloned()) }).await
    }

    async fn set(&self, cancel: &CancellationToken, key: &str, value: &[u8]) -> Result<()> {
        cancellable(cancel, async {
            self.entries
                .write()
                .await
                .insert(key.to_string(), value.to_vec());
            Ok(())
        })
        .await
    }

    async fn delete(&self, cancel: &CancellationToken, key: &str) -> Result<()> {
        cancellable(cancel, async {
            self.entries.write().await.remove(key);
            Ok(())
        })
        .await
    }
}
