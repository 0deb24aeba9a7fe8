/// Typed access to per-key pipeline state
///
/// Wraps the session store with the pipeline's settings so callers deal in
/// status transitions instead of raw field writes.
use chrono::Utc;
use std::sync::Arc;

use crate::{
    config::PipelineSettings,
    db::SessionStore,
    error::{AppResult, RoundError},
    models::{RoundStatus, SessionFields, SessionKey, SessionUpdate},
};

#[derive(Clone)]
pub struct SessionState {
    store: Arc<dyn SessionStore>,
    settings: PipelineSettings,
}

impl SessionState {
    pub fn new(store: Arc<dyn SessionStore>, settings: PipelineSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn get(&self, key: &SessionKey) -> AppResult<SessionFields> {
        self.store.get(key).await
    }

    pub async fn set(&self, key: &SessionKey, update: SessionUpdate) -> AppResult<()> {
        self.store.set(key, update).await
    }

    /// Writes a field without waiting for it to land; failures are only logged
    pub fn set_in_background(&self, key: &SessionKey, update: SessionUpdate) {
        let store = self.store.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let field = update.field_name();
            if let Err(e) = store.set(&key, update).await {
                tracing::error!(error = %e, key = %key, field = %field, "Background session write failed");
            }
        });
    }

    /// Whether a live round currently holds the key
    pub async fn is_processing(&self, key: &SessionKey) -> AppResult<bool> {
        Ok(self
            .store
            .get(key)
            .await?
            .is_processing(self.settings.processing_lease))
    }

    /// Takes ownership of the round for a key
    ///
    /// With the atomic guard this is a single conditional update. Without it
    /// the status is read first and the processing marker is written after,
    /// so two callers can both pass the check.
    pub async fn claim(&self, key: &SessionKey) -> AppResult<bool> {
        let lease = self.settings.processing_lease;

        if self.settings.atomic_processing_guard {
            return self.store.try_claim(key, Utc::now(), lease).await;
        }

        if self.is_processing(key).await? {
            return Ok(false);
        }
        self.store
            .set(key, SessionUpdate::Status(RoundStatus::processing_now()))
            .await?;
        Ok(true)
    }

    /// Marks an additional key as processing without the guard
    pub async fn mark_processing(&self, key: &SessionKey) -> AppResult<()> {
        self.store
            .set(key, SessionUpdate::Status(RoundStatus::processing_now()))
            .await
    }

    /// Marks every key of a round as succeeded
    pub async fn mark_succeeded(&self, keys: &[SessionKey]) {
        for key in keys {
            if let Err(e) = self
                .store
                .set(key, SessionUpdate::Status(RoundStatus::Succeeded))
                .await
            {
                tracing::error!(error = %e, key = %key, "Failed to clear processing status");
            }
        }
    }

    /// Records a round failure on every key of the round
    pub async fn mark_failed(&self, keys: &[SessionKey], error: &RoundError) {
        let status = match error {
            RoundError::User(reason) => RoundStatus::FailedUser {
                reason: reason.clone(),
            },
            RoundError::Technical(reason) => RoundStatus::FailedTechnical {
                reason: reason.clone(),
            },
        };

        for key in keys {
            if let Err(e) = self
                .store
                .set(key, SessionUpdate::Status(status.clone()))
                .await
            {
                tracing::error!(error = %e, key = %key, "Failed to record round failure");
            }
        }
    }
}
