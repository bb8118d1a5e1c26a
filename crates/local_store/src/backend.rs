//! Storage backend abstraction
//!
//! A backend persists opaque JSON documents under short slot keys. The
//! trait takes `&self` everywhere; implementations handle their own locking.

use crate::{Result, StoreError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

/// Key/value persistence used by [`crate::LocalStore`].
pub trait StorageBackend: Send + Sync {
    /// Read the document stored under `key`, if any.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Durably store `contents` under `key`, replacing any previous document.
    fn write(&self, key: &str, contents: &str) -> Result<()>;

    /// Delete the document under `key`. Missing keys are not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Short description for log lines.
    fn describe(&self) -> String;
}

/// In-memory backend for tests and ephemeral sessions.
///
/// Can be switched unavailable to simulate a full or missing storage medium.
#[derive(Debug)]
pub struct MemoryBackend {
    documents: RwLock<HashMap<String, String>>,
    available: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Make every subsequent call succeed (`true`) or fail (`false`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Raw document under `key`, bypassing availability.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn check_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory backend disabled".to_string()))
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        Ok(self.raw(key))
    }

    fn write(&self, key: &str, contents: &str) -> Result<()> {
        self.check_available()?;
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), contents.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.documents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

impl<B: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<B> {
    fn read(&self, key: &str) -> Result<Option<String>> {
        (**self).read(key)
    }

    fn write(&self, key: &str, contents: &str) -> Result<()> {
        (**self).write(key, contents)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
