// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local-first settings synchronization.
//!
//! The local cache holds the working copy and is always read first. The
//! remote store holds a replica that is reconciled by last-writer-wins on
//! `updated_at`:
//! - remote strictly newer: local cache and memory take the remote record
//! - local strictly newer: the local record is pushed
//! - equal: nothing is written in either direction
//!
//! Local mutations never wait on, or roll back because of, the network.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::db::FirestoreDb;
use crate::error::AppError;
use crate::models::{SettingChange, SettingsRecord, SyncStatus};
use crate::services::settings_cache::{FileSettingsCache, LocalCache};

/// Buffered remote notifications per subscription.
pub const SUBSCRIPTION_BUFFER: usize = 16;

/// Live remote change feed. Dropping it cancels the subscription.
pub struct RemoteSubscription {
    pub updates: mpsc::Receiver<SettingsRecord>,
    _cancel: Option<oneshot::Sender<()>>,
}

impl RemoteSubscription {
    pub fn new(updates: mpsc::Receiver<SettingsRecord>, cancel: Option<oneshot::Sender<()>>) -> Self {
        Self {
            updates,
            _cancel: cancel,
        }
    }
}

/// Durable per-user document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<Option<SettingsRecord>, AppError>;
    async fn push(&self, user_id: &str, record: &SettingsRecord) -> Result<(), AppError>;
    async fn subscribe(&self, user_id: &str) -> Result<RemoteSubscription, AppError>;
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Remote was newer and replaced the local copy
    PulledRemote,
    /// Local was newer (or remote empty) and was pushed
    PushedLocal,
    /// Timestamps equal; nothing written
    InSync,
    /// No identity or remote unreachable
    Skipped,
}

struct Inner {
    local: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteStore>,
    /// Held across cache writes so the cache never falls behind memory
    state: RwLock<SettingsRecord>,
    user: RwLock<Option<String>>,
    status: watch::Sender<SyncStatus>,
    listener: Mutex<Option<JoinHandle<()>>>,
    /// Serializes pushes so an older record never lands after a newer one
    push_lock: Mutex<()>,
    /// Last local cache write failed; `Synced` is reported as `Error` until one succeeds
    local_failed: AtomicBool,
}

/// Keeps the local settings record and its remote replica convergent.
#[derive(Clone)]
pub struct SettingsSyncEngine {
    inner: Arc<Inner>,
}

impl SettingsSyncEngine {
    pub fn new(local: Arc<dyn LocalCache>, remote: Arc<dyn RemoteStore>) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                local,
                remote,
                state: RwLock::new(SettingsRecord::default()),
                user: RwLock::new(None),
                status,
                listener: Mutex::new(None),
                push_lock: Mutex::new(()),
                local_failed: AtomicBool::new(false),
            }),
        }
    }

    /// Entry point for embedding applications: file cache at
    /// `SETTINGS_CACHE_PATH` backed by Firestore in `GCP_PROJECT_ID`. An
    /// unreachable Firestore leaves the engine local-only.
    pub async fn connect(config: &Config) -> Self {
        match FirestoreDb::new(&config.gcp_project_id).await {
            Ok(db) => Self::new(
                Arc::new(FileSettingsCache::new(&config.settings_cache_path)),
                Arc::new(db),
            ),
            Err(e) => {
                tracing::warn!(error = %e, "Firestore unavailable, settings stay local");
                Self::local_only(config)
            }
        }
    }

    /// File cache at `SETTINGS_CACHE_PATH` with no reachable remote.
    pub fn local_only(config: &Config) -> Self {
        Self::new(
            Arc::new(FileSettingsCache::new(&config.settings_cache_path)),
            Arc::new(FirestoreDb::new_mock()),
        )
    }

    pub fn status(&self) -> SyncStatus {
        *self.inner.status.borrow()
    }

    /// Status feed for a non-blocking indicator.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.status.subscribe()
    }

    fn set_status(&self, status: SyncStatus) {
        let status = match status {
            SyncStatus::Synced if self.inner.local_failed.load(Ordering::SeqCst) => {
                SyncStatus::Error
            }
            other => other,
        };
        self.inner.status.send_replace(status);
    }

    /// Write the cache, recording the outcome. Callers hold the `state` write
    /// guard so writes land in the same order as the mutations.
    async fn save_local(&self, record: &SettingsRecord) -> bool {
        match self.inner.local.save(record).await {
            Ok(()) => {
                self.inner.local_failed.store(false, Ordering::SeqCst);
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to write local settings cache");
                self.inner.local_failed.store(true, Ordering::SeqCst);
                self.set_status(SyncStatus::Error);
                false
            }
        }
    }

    /// In-memory working copy.
    pub async fn current(&self) -> SettingsRecord {
        self.inner.state.read().await.clone()
    }

    pub async fn user(&self) -> Option<String> {
        self.inner.user.read().await.clone()
    }

    /// Read the local cache into memory and return it. Never touches the network.
    pub async fn load(&self) -> SettingsRecord {
        match self.inner.local.load().await {
            Ok(Some(record)) => *self.inner.state.write().await = record,
            Ok(None) => {}
            Err(e) => {
                tracing::error!(error = %e, "Failed to read local settings cache");
                self.set_status(SyncStatus::Error);
            }
        }

        if self.inner.user.read().await.is_none() {
            self.set_status(SyncStatus::Offline);
        }
        self.current().await
    }

    /// Begin remote sync for an authenticated user: reconcile, then follow
    /// remote changes.
    pub async fn start(&self, user_id: impl Into<String>) -> ReconcileOutcome {
        let user_id = user_id.into();
        *self.inner.user.write().await = Some(user_id.clone());
        tracing::info!(user_id = %user_id, "Starting settings sync");

        let outcome = self.reconcile().await;
        self.subscribe(&user_id).await;
        outcome
    }

    /// Re-run reconciliation on demand.
    pub async fn force_sync(&self) -> ReconcileOutcome {
        self.reconcile().await
    }

    async fn reconcile(&self) -> ReconcileOutcome {
        let Some(user_id) = self.user().await else {
            self.set_status(SyncStatus::Offline);
            return ReconcileOutcome::Skipped;
        };
        self.set_status(SyncStatus::Syncing);

        let remote = match self.inner.remote.fetch(&user_id).await {
            Ok(remote) => remote,
            Err(e) => {
                tracing::warn!(error = %e, "Remote settings unreachable, staying local");
                self.set_status(SyncStatus::Offline);
                return ReconcileOutcome::Skipped;
            }
        };
        let local = self.current().await;

        let outcome = match remote {
            Some(remote) if remote.updated_at > local.updated_at => {
                tracing::info!(
                    local = local.updated_at,
                    remote = remote.updated_at,
                    "Remote settings newer, pulling"
                );
                let mut state = self.inner.state.write().await;
                // An update may have landed since `local` was read.
                if remote.updated_at > state.updated_at {
                    *state = remote.clone();
                    self.save_local(&remote).await;
                }
                ReconcileOutcome::PulledRemote
            }
            Some(remote) if remote.updated_at == local.updated_at => {
                if remote.fingerprint() != local.fingerprint() {
                    tracing::warn!(
                        updated_at = local.updated_at,
                        "Settings diverge at equal timestamps, leaving both sides unchanged"
                    );
                }
                ReconcileOutcome::InSync
            }
            _ => {
                if let Err(e) = self.push(&user_id, local).await {
                    tracing::warn!(error = %e, "Failed to push local settings");
                    self.set_status(SyncStatus::Offline);
                    return ReconcileOutcome::Skipped;
                }
                ReconcileOutcome::PushedLocal
            }
        };

        self.set_status(SyncStatus::Synced);
        outcome
    }

    async fn subscribe(&self, user_id: &str) {
        let mut subscription = match self.inner.remote.subscribe(user_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(error = %e, "Settings subscription failed, staying local");
                self.set_status(SyncStatus::Offline);
                return;
            }
        };

        let engine = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(record) = subscription.updates.recv().await {
                engine.apply_remote(record).await;
            }
            tracing::debug!("Settings subscription closed");
        });

        if let Some(previous) = self.inner.listener.lock().await.replace(handle) {
            previous.abort();
        }
    }

    /// Apply a pushed remote record if it is strictly newer than what this
    /// device holds. Returns whether it was applied.
    pub async fn apply_remote(&self, record: SettingsRecord) -> bool {
        let cached = match self.inner.local.load().await {
            Ok(cached) => cached.map(|r| r.updated_at).unwrap_or(i64::MIN),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to re-read local cache, using memory");
                i64::MIN
            }
        };

        let mut state = self.inner.state.write().await;
        let local_ts = cached.max(state.updated_at);
        if record.updated_at <= local_ts {
            tracing::debug!(
                local = local_ts,
                remote = record.updated_at,
                "Ignoring stale remote settings"
            );
            return false;
        }

        *state = record.clone();
        if self.save_local(&record).await {
            self.set_status(SyncStatus::Synced);
        }
        true
    }

    /// Optimistic local mutation.
    ///
    /// Memory and the local cache are updated before this returns; the remote
    /// push runs in the background and is returned for callers that want to
    /// await it.
    pub async fn update(&self, change: SettingChange) -> Option<JoinHandle<()>> {
        let record = {
            let mut state = self.inner.state.write().await;
            state.apply(change);
            self.save_local(&state).await;
            state.clone()
        };

        let user_id = self.user().await?;
        let engine = self.clone();
        Some(tokio::spawn(async move {
            engine.set_status(SyncStatus::Syncing);
            match engine.push(&user_id, record).await {
                Ok(()) => engine.set_status(SyncStatus::Synced),
                Err(e) => {
                    tracing::warn!(error = %e, "Settings push failed, keeping local copy");
                    engine.set_status(SyncStatus::Offline);
                }
            }
        }))
    }

    /// Every remote write goes through here, one at a time.
    async fn push(&self, user_id: &str, record: SettingsRecord) -> Result<(), AppError> {
        let _guard = self.inner.push_lock.lock().await;
        if self.inner.state.read().await.updated_at > record.updated_at {
            // A newer mutation will push itself.
            return Ok(());
        }
        self.inner.remote.push(user_id, &record).await
    }

    /// Sign-out teardown: stop following the remote, wipe the local cache and
    /// reset memory to defaults.
    pub async fn stop(&self) {
        if let Some(handle) = self.inner.listener.lock().await.take() {
            handle.abort();
        }
        *self.inner.user.write().await = None;

        let mut state = self.inner.state.write().await;
        if let Err(e) = self.inner.local.clear().await {
            tracing::error!(error = %e, "Failed to clear local settings cache");
        }
        *state = SettingsRecord::default();
        drop(state);
        self.inner.local_failed.store(false, Ordering::SeqCst);
        self.set_status(SyncStatus::Idle);
        tracing::info!("Settings sync stopped");
    }
}

/// In-process remote store with change notifications.
///
/// Used when no durable backend is configured, and in tests to simulate
/// other devices and outages.
#[derive(Default)]
pub struct MemoryRemoteStore {
    documents: dashmap::DashMap<String, SettingsRecord>,
    subscribers: dashmap::DashMap<String, Vec<mpsc::Sender<SettingsRecord>>>,
    unavailable: AtomicBool,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the remote becoming unreachable (or reachable again).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn get(&self, user_id: &str) -> Option<SettingsRecord> {
        self.documents.get(user_id).map(|r| r.clone())
    }

    fn check_available(&self) -> Result<(), AppError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::RemoteSync("remote store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn fetch(&self, user_id: &str) -> Result<Option<SettingsRecord>, AppError> {
        self.check_available()?;
        Ok(self.get(user_id))
    }

    /// Same last-writer-wins guard as the Firestore store: a record no newer
    /// than the stored one is dropped without notifying anyone.
    async fn push(&self, user_id: &str, record: &SettingsRecord) -> Result<(), AppError> {
        self.check_available()?;
        match self.documents.entry(user_id.to_string()) {
            Entry::Occupied(stored) if stored.get().updated_at >= record.updated_at => {
                tracing::debug!(
                    stored = stored.get().updated_at,
                    pushed = record.updated_at,
                    "Remote settings already current, skipping write"
                );
                return Ok(());
            }
            Entry::Occupied(mut stored) => {
                stored.insert(record.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }

        let senders = self
            .subscribers
            .get(user_id)
            .map(|s| s.clone())
            .unwrap_or_default();
        for sender in senders {
            let _ = sender.send(record.clone()).await;
        }
        if let Some(mut senders) = self.subscribers.get_mut(user_id) {
            senders.retain(|s| !s.is_closed());
        }
        Ok(())
    }

    async fn subscribe(&self, user_id: &str) -> Result<RemoteSubscription, AppError> {
        self.check_available()?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.subscribers
            .entry(user_id.to_string())
            .or_default()
            .push(tx);
        Ok(RemoteSubscription::new(rx, None))
    }
}
