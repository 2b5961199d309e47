// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local settings cache (the offline-available working copy).

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;

use crate::error::AppError;
use crate::models::SettingsRecord;

/// Device-local storage for the settings record.
#[async_trait]
pub trait LocalCache: Send + Sync {
    async fn load(&self) -> Result<Option<SettingsRecord>, AppError>;
    async fn save(&self, record: &SettingsRecord) -> Result<(), AppError>;
    async fn clear(&self) -> Result<(), AppError>;
}

/// JSON file cache.
#[derive(Debug, Clone)]
pub struct FileSettingsCache {
    path: PathBuf,
}

impl FileSettingsCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LocalCache for FileSettingsCache {
    async fn load(&self) -> Result<Option<SettingsRecord>, AppError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::LocalStorage(format!("read failed: {}", e))),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AppError::LocalStorage(format!("corrupt settings cache: {}", e)))
    }

    async fn save(&self, record: &SettingsRecord) -> Result<(), AppError> {
        let bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| AppError::LocalStorage(format!("encode failed: {}", e)))?;

        // Write-then-rename so a crash never leaves a torn file. Each save
        // gets its own temp file.
        let tmp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| AppError::LocalStorage(format!("write failed: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::LocalStorage(format!("rename failed: {}", e)))
    }

    async fn clear(&self) -> Result<(), AppError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::LocalStorage(format!("remove failed: {}", e))),
        }
    }
}

/// In-process cache, for embedding without a filesystem and for tests.
#[derive(Debug, Default)]
pub struct MemorySettingsCache {
    record: RwLock<Option<SettingsRecord>>,
}

impl MemorySettingsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: SettingsRecord) -> Self {
        Self {
            record: RwLock::new(Some(record)),
        }
    }
}

#[async_trait]
impl LocalCache for MemorySettingsCache {
    async fn load(&self) -> Result<Option<SettingsRecord>, AppError> {
        Ok(self.record.read().await.clone())
    }

    async fn save(&self, record: &SettingsRecord) -> Result<(), AppError> {
        *self.record.write().await = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), AppError> {
        *self.record.write().await = None;
        Ok(())
    }
}
