// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Holds the remote replica of each user's settings record, one document per
//! user in `user_settings`, and serves live change notifications for it.

use async_trait::async_trait;
use firestore::{FirestoreListenEvent, FirestoreListenerTarget, FirestoreMemListenStateStorage};
use tokio::sync::{mpsc, oneshot};

use crate::db::collections;
use crate::error::AppError;
use crate::models::SettingsRecord;
use crate::services::settings_sync::{RemoteStore, RemoteSubscription, SUBSCRIPTION_BUFFER};

/// Listener target id for settings subscriptions.
const SETTINGS_LISTENER_TARGET: u32 = 17;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::RemoteSync(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Emulator connection with a dummy bearer token.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let client = firestore::FirestoreDb::with_options_token_source(
            firestore::FirestoreDbOptions::new(project_id.to_string()),
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::RemoteSync(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(project = project_id, "Connected to Firestore emulator");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Offline client: every operation fails with a remote-sync error, which
    /// the sync engine treats as "stay local".
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::RemoteSync("Database not connected (offline mode)".to_string()))
    }

    // ─── Settings Operations ─────────────────────────────────────

    pub async fn get_settings(&self, user_id: &str) -> Result<Option<SettingsRecord>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::USER_SETTINGS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::RemoteSync(e.to_string()))
    }

    /// Write `record` unless the stored document is at least as new.
    ///
    /// The freshness check runs inside the write's transaction window, so a
    /// stale device pushing late does not clobber a newer record. Returns
    /// whether it wrote.
    pub async fn set_settings(
        &self,
        user_id: &str,
        record: &SettingsRecord,
    ) -> Result<bool, AppError> {
        let client = self.get_client()?;
        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::RemoteSync(format!("Failed to begin transaction: {}", e)))?;

        let current: Option<SettingsRecord> = client
            .fluent()
            .select()
            .by_id_in(collections::USER_SETTINGS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| {
                AppError::RemoteSync(format!("Failed to read settings in transaction: {}", e))
            })?;

        if let Some(current) = current {
            if current.updated_at >= record.updated_at {
                tracing::debug!(
                    user_id,
                    stored = current.updated_at,
                    pushed = record.updated_at,
                    "Remote settings already current, skipping write"
                );
                let _ = transaction.rollback().await;
                return Ok(false);
            }
        }

        client
            .fluent()
            .update()
            .in_col(collections::USER_SETTINGS)
            .document_id(user_id)
            .object(record)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::RemoteSync(format!("Failed to add settings to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::RemoteSync(format!("Transaction commit failed: {}", e)))?;

        tracing::info!(user_id, updated_at = record.updated_at, "Settings pushed");
        Ok(true)
    }

    pub async fn delete_settings(&self, user_id: &str) -> Result<(), AppError> {
        self.get_client()?
            .fluent()
            .delete()
            .from(collections::USER_SETTINGS)
            .document_id(user_id)
            .execute()
            .await
            .map_err(|e| AppError::RemoteSync(e.to_string()))?;
        Ok(())
    }

    /// Follow one user's settings document.
    ///
    /// Each change is decoded and forwarded on the returned channel. The
    /// listener shuts down when the subscription is dropped.
    pub async fn listen_settings(&self, user_id: &str) -> Result<RemoteSubscription, AppError> {
        let client = self.get_client()?;

        let mut listener = client
            .create_listener(FirestoreMemListenStateStorage::new())
            .await
            .map_err(|e| AppError::RemoteSync(format!("Failed to create listener: {}", e)))?;

        client
            .fluent()
            .select()
            .by_id_in(collections::USER_SETTINGS)
            .batch_listen([user_id])
            .add_target(
                FirestoreListenerTarget::new(SETTINGS_LISTENER_TARGET),
                &mut listener,
            )
            .map_err(|e| AppError::RemoteSync(format!("Failed to add listen target: {}", e)))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        listener
            .start(move |event| {
                let tx = tx.clone();
                async move {
                    if let FirestoreListenEvent::DocumentChange(change) = event {
                        if let Some(doc) = change.document {
                            match firestore::FirestoreDb::deserialize_doc_to::<SettingsRecord>(&doc)
                            {
                                Ok(record) => {
                                    let _ = tx.send(record).await;
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "Undecodable settings document")
                                }
                            }
                        }
                    }
                    Ok(())
                }
            })
            .await
            .map_err(|e| AppError::RemoteSync(format!("Failed to start listener: {}", e)))?;

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let owner = user_id.to_string();
        tokio::spawn(async move {
            // Resolves on explicit cancel or when the sender is dropped.
            let _ = cancel_rx.await;
            if let Err(e) = listener.shutdown().await {
                tracing::warn!(user_id = %owner, error = %e, "Listener shutdown failed");
            }
        });

        Ok(RemoteSubscription::new(rx, Some(cancel_tx)))
    }
}

#[async_trait]
impl RemoteStore for FirestoreDb {
    async fn fetch(&self, user_id: &str) -> Result<Option<SettingsRecord>, AppError> {
        self.get_settings(user_id).await
    }

    async fn push(&self, user_id: &str, record: &SettingsRecord) -> Result<(), AppError> {
        self.set_settings(user_id, record).await.map(|_| ())
    }

    async fn subscribe(&self, user_id: &str) -> Result<RemoteSubscription, AppError> {
        self.listen_settings(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_client_reports_remote_sync_errors() {
        let db = FirestoreDb::new_mock();
        assert!(!db.is_connected());
        assert!(matches!(
            db.fetch("user").await,
            Err(AppError::RemoteSync(_))
        ));
        assert!(matches!(
            db.push("user", &SettingsRecord::default()).await,
            Err(AppError::RemoteSync(_))
        ));
        assert!(db.subscribe("user").await.is_err());
    }
}
