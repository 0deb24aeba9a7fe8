use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::{AppError, AppResult},
    middleware::RequestId,
    models::Category,
    routes::AppState,
    services::{RetryOutcome, RoundRequest},
};

#[derive(Debug, Deserialize)]
pub struct RecommendationFetchRequest {
    pub session_id: String,
    pub selected_category: String,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub is_tags_only: bool,
    #[serde(default)]
    pub selected_tag_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DetailsQuery {
    pub recommendation_category: String,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub selected_tag_id: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
}

/// HTTP rendering of a read outcome
pub struct RecommendationsResponse(RetryOutcome);

impl IntoResponse for RecommendationsResponse {
    fn into_response(self) -> Response {
        match self.0 {
            RetryOutcome::Ready(page) => (StatusCode::OK, Json(page)).into_response(),
            RetryOutcome::NotFound { error } => (
                StatusCode::NOT_FOUND,
                Json(json!({ "recommendations": {}, "error": error })),
            )
                .into_response(),
        }
    }
}

fn parse_category(raw: &str) -> AppResult<Category> {
    if raw.trim().is_empty() {
        return Err(AppError::InvalidInput("Recommendation category is required".to_string()));
    }
    raw.parse::<Category>()
        .ok()
        .filter(Category::is_public)
        .ok_or_else(|| AppError::InvalidInput(format!("Invalid recommendation category: {}", raw)))
}

fn require_session(session_id: &str) -> AppResult<()> {
    if session_id.trim().is_empty() {
        return Err(AppError::InvalidInput("Session ID is required".to_string()));
    }
    Ok(())
}

/// Handler for submitting a recommendation request
pub async fn submit(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(request): Json<RecommendationFetchRequest>,
) -> AppResult<RecommendationsResponse> {
    require_session(&request.session_id)?;
    let category = parse_category(&request.selected_category)?;

    let round = RoundRequest {
        session_id: request.session_id.trim().to_string(),
        category,
        user_message: request.user_message,
        tag_id: request.selected_tag_id,
        is_tags_only: request.is_tags_only,
    };

    tracing::info!(
        request_id = %request_id,
        session_id = %round.session_id,
        category = %category,
        tags_only = round.tags_only(),
        "Recommendation request"
    );

    let outcome = state.recommendations.submit(&round).await?;
    Ok(RecommendationsResponse(outcome))
}

/// Handler for reading a page of recommendations
pub async fn details(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<DetailsQuery>,
) -> AppResult<RecommendationsResponse> {
    require_session(&session_id)?;
    let category = parse_category(&query.recommendation_category)?;
    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(AppError::InvalidInput("Page numbers start at 1".to_string()));
    }

    let round = RoundRequest {
        session_id: session_id.trim().to_string(),
        category,
        is_tags_only: query
            .user_message
            .as_deref()
            .map_or(true, |m| m.trim().is_empty()),
        user_message: query.user_message,
        tag_id: query.selected_tag_id,
    };

    let outcome = state.recommendations.poll(&round, page).await?;
    Ok(RecommendationsResponse(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_category_rejects_hidden_and_unknown() {
        assert_eq!(parse_category("TV Shows").unwrap(), Category::TvShows);
        assert!(matches!(parse_category("Destinations"), Err(AppError::InvalidInput(_))));
        assert!(matches!(parse_category("Podcasts"), Err(AppError::InvalidInput(_))));
        assert!(matches!(parse_category(" "), Err(AppError::InvalidInput(_))));
    }
}
