use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, AppResult};

pub mod enrichment;
pub mod geocoding;
pub mod intent;
pub mod llm;
pub mod orchestrator;
pub mod pagination;
pub mod providers;
pub mod recommendations;
pub mod session_state;
pub mod tasks;

#[cfg(test)]
pub(crate) mod test_support;

pub use enrichment::EnrichmentPipeline;
pub use intent::IntentExtractor;
pub use orchestrator::{FetchOrchestrator, RoundOutcome, RoundRequest};
pub use pagination::{PaginationReader, ReadOutcome};
pub use recommendations::{Collaborators, RecommendationService, RetryOutcome};
pub use session_state::SessionState;
pub use tasks::RoundTracker;

/// Runs an external call under its own deadline; an elapsed deadline is a technical failure
pub async fn with_timeout<T, F>(service: &str, limit: Duration, call: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(service = %service, timeout_ms = limit.as_millis() as u64, "External call timed out");
            Err(AppError::Timeout(service.to_string()))
        }
    }
}
