/// Recommendation data provider abstraction
///
/// The pipeline needs three upstream lookups: free-text search, tag-based
/// recommendations, and resolving a generic term to one representative tag.
/// Providers return entities already mapped into `Candidate`s.
use crate::{
    error::AppResult,
    models::{Candidate, Category, LocationDetails},
};

pub mod qloo;
pub mod transform;

pub use qloo::QlooProvider;

/// Free-text search request
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub category: Category,
    pub query: String,
    pub location: Option<LocationDetails>,
    pub page: u32,
}

/// Tag-based lookup request
#[derive(Debug, Clone, PartialEq)]
pub struct TagQuery {
    pub category: Category,
    pub tag_id: String,
    pub page: u32,
    pub location: Option<LocationDetails>,
    pub should_be_recent: bool,
}

/// Trait for recommendation data providers
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RecommendationProvider: Send + Sync {
    /// Searches entities of a category by query text
    async fn search(&self, query: &SearchQuery) -> AppResult<Vec<Candidate>>;

    /// Fetches entities associated with a tag
    async fn recommend_by_tag(&self, query: &TagQuery) -> AppResult<Vec<Candidate>>;

    /// Resolves a generic term such as "comedy" to a single tag id
    async fn resolve_tag(&self, category: Category, term: &str) -> AppResult<Option<String>>;
}
