use crate::services::RecommendationService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub recommendations: RecommendationService,
}

impl AppState {
    pub fn new(recommendations: RecommendationService) -> Self {
        Self { recommendations }
    }
}
