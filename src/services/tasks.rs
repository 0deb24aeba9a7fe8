/// Registry of background generation rounds
///
/// Each round runs in its own task under a supervisor. A round that panics
/// has its keys marked as technically failed so they never stay claimed.
use std::future::Future;
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    error::RoundError,
    models::SessionKey,
    services::{orchestrator::RoundOutcome, session_state::SessionState},
};

#[derive(Clone, Default)]
pub struct RoundTracker {
    rounds: Arc<Mutex<Vec<(SessionKey, JoinHandle<()>)>>>,
}

impl RoundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a claimed round; `keys` are released as failed if the round panics
    pub async fn spawn<F>(&self, keys: Vec<SessionKey>, state: SessionState, round: F)
    where
        F: Future<Output = RoundOutcome> + Send + 'static,
    {
        let Some(primary) = keys.first().cloned() else {
            return;
        };

        let worker = tokio::spawn(round);
        let label = primary.clone();
        let supervisor = tokio::spawn(async move {
            match worker.await {
                Ok(outcome) => {
                    tracing::debug!(key = %label, outcome = ?outcome, "Round finished");
                }
                Err(e) => {
                    tracing::error!(error = %e, key = %label, "Round aborted");
                    let error = RoundError::Technical("Recommendation generation stopped unexpectedly".to_string());
                    state.mark_failed(&keys, &error).await;
                }
            }
        });

        let mut rounds = self.rounds.lock().await;
        rounds.retain(|(_, handle)| !handle.is_finished());
        rounds.push((primary, supervisor));
    }

    /// Number of rounds still running
    pub async fn in_flight(&self) -> usize {
        let rounds = self.rounds.lock().await;
        rounds.iter().filter(|(_, handle)| !handle.is_finished()).count()
    }

    /// Waits for every tracked round to finish
    pub async fn shutdown(&self) {
        let rounds = std::mem::take(&mut *self.rounds.lock().await);
        tracing::info!(rounds = rounds.len(), "Waiting for background rounds");

        for (key, handle) in rounds {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, key = %key, "Round supervisor failed");
            }
        }
    }
}
