/// Qloo Insights API provider
///
/// API Flow:
/// 1. Specific requests: /search → entities matching free text
/// 2. Tag requests: /v2/insights → entities associated with a tag
/// 3. Generic terms: /v2/tags → one representative tag id, cached per category
///
/// Entity mapping runs on the blocking pool since description cleanup and
/// tag partitioning are CPU-bound.
use crate::{
    cached,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::{Candidate, Category, LocationDetails, UpstreamTag},
    services::providers::{transform, RecommendationProvider, SearchQuery, TagQuery},
};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value;

const DEFAULT_RADIUS_KM: u32 = 900;
const RECENT_YEAR_FLOOR: &str = "2020";
const DEFAULT_YEAR_FLOOR: &str = "2000";

#[derive(Clone)]
pub struct QlooProvider {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    cache: Cache,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Deserialize)]
struct InsightsResponse {
    #[serde(default)]
    results: InsightsResults,
}

#[derive(Deserialize, Default)]
struct InsightsResults {
    #[serde(default)]
    entities: Vec<Value>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    results: TagsResults,
}

#[derive(Deserialize, Default)]
struct TagsResults {
    #[serde(default)]
    tags: Vec<UpstreamTag>,
}

impl QlooProvider {
    pub fn new(cache: Cache, api_key: String, api_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
            cache,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> AppResult<T> {
        let url = format!("{}{}", self.api_url, path);

        let response = self
            .http_client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .query(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "Qloo API returned status {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }

    async fn to_candidates(category: Category, entities: Vec<Value>) -> AppResult<Vec<Candidate>> {
        tokio::task::spawn_blocking(move || transform::to_candidates(category, entities))
            .await
            .map_err(|e| AppError::Internal(format!("Entity mapping task failed: {}", e)))
    }

    async fn fetch_tag(&self, category: Category, term: &str) -> AppResult<Option<String>> {
        let response: TagsResponse = self.get("/v2/tags", &tag_params(category, term)).await?;
        Ok(select_tag(category, &response.results.tags))
    }
}

fn search_params(query: &SearchQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("query".to_string(), query.query.clone()),
        ("types".to_string(), query.category.entity_urn().to_string()),
        ("page".to_string(), query.page.to_string()),
        ("sort_by".to_string(), "popularity".to_string()),
    ];

    if query.category.is_place_like() {
        if let Some((lat, lng)) = query.location.as_ref().and_then(LocationDetails::coordinates) {
            params.push(("filter.location".to_string(), format!("{},{}", lat, lng)));
        }
    }

    params
}

fn insights_params(query: &TagQuery) -> Vec<(String, String)> {
    let mut params = vec![
        ("filter.type".to_string(), query.category.entity_urn().to_string()),
        ("filter.tags".to_string(), query.tag_id.clone()),
        ("page".to_string(), query.page.to_string()),
    ];

    let floor = if query.should_be_recent {
        RECENT_YEAR_FLOOR
    } else {
        DEFAULT_YEAR_FLOOR
    };
    match query.category {
        Category::Movies | Category::TvShows => {
            params.push(("filter.release_year.min".to_string(), floor.to_string()))
        }
        Category::Books => {
            params.push(("filter.publication_year.min".to_string(), floor.to_string()))
        }
        Category::Places | Category::Destinations => {}
    }

    if let Some(location) = &query.location {
        if query.category.is_place_like() {
            if let Some(code) = &location.country_code {
                params.push(("filter.geocode.country_code".to_string(), code.clone()));
            }
            if let Some(state) = &location.state {
                params.push(("filter.geocode.admin1_region".to_string(), state.clone()));
            }
        } else if let Some((lat, lng)) = location.coordinates() {
            let radius = location.max_radius.unwrap_or(DEFAULT_RADIUS_KM);
            params.push(("signal.location".to_string(), format!("POINT({} {})", lng, lat)));
            params.push(("signal.location.radius".to_string(), radius.to_string()));
        }
    }

    params
}

fn tag_params(category: Category, term: &str) -> Vec<(String, String)> {
    vec![
        ("feature.typo_tolerance".to_string(), "true".to_string()),
        ("filter.parents.types".to_string(), category.entity_urn().to_string()),
        ("filter.query".to_string(), term.trim().to_string()),
    ]
}

/// Media categories only accept genre tags; others take the first usable tag
fn select_tag(category: Category, tags: &[UpstreamTag]) -> Option<String> {
    tags.iter()
        .filter(|tag| tag.id.as_deref().is_some_and(|id| !id.is_empty()))
        .find(|tag| {
            !category.prefers_genre_tags()
                || tag
                    .tag_type
                    .as_deref()
                    .is_some_and(|t| t.split(':').any(|part| part == "genre"))
        })
        .and_then(|tag| tag.id.clone())
}

#[async_trait::async_trait]
impl RecommendationProvider for QlooProvider {
    async fn search(&self, query: &SearchQuery) -> AppResult<Vec<Candidate>> {
        tracing::debug!(category = %query.category, query = %query.query, page = query.page, "Qloo search");

        let response: SearchResponse = self.get("/search", &search_params(query)).await?;
        Self::to_candidates(query.category, response.results).await
    }

    async fn recommend_by_tag(&self, query: &TagQuery) -> AppResult<Vec<Candidate>> {
        tracing::debug!(category = %query.category, tag_id = %query.tag_id, page = query.page, "Qloo insights");

        let response: InsightsResponse = self.get("/v2/insights", &insights_params(query)).await?;
        Self::to_candidates(query.category, response.results.entities).await
    }

    async fn resolve_tag(&self, category: Category, term: &str) -> AppResult<Option<String>> {
        let key = CacheKey::TagLookup {
            category,
            term: term.to_string(),
        };

        cached!(self.cache, key, async move {
            self.fetch_tag(category, term).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn lagos() -> LocationDetails {
        LocationDetails {
            country: Some("Nigeria".to_string()),
            country_code: Some("NG".to_string()),
            state: Some("Lagos".to_string()),
            latitude: Some(6.5244),
            longitude: Some(3.3792),
            ..LocationDetails::default()
        }
    }

    fn tag(id: &str, tag_type: &str) -> UpstreamTag {
        UpstreamTag {
            id: Some(id.to_string()),
            name: Some(id.rsplit(':').next().unwrap_or(id).to_string()),
            tag_type: Some(tag_type.to_string()),
        }
    }

    #[test]
    fn test_search_params_add_coordinates_for_places_only() {
        let mut query = SearchQuery {
            category: Category::Places,
            query: "jollof".to_string(),
            location: Some(lagos()),
            page: 2,
        };
        let params = search_params(&query);
        assert_eq!(param(&params, "types"), Some("urn:entity:place"));
        assert_eq!(param(&params, "page"), Some("2"));
        assert_eq!(param(&params, "filter.location"), Some("6.5244,3.3792"));

        query.category = Category::Movies;
        assert_eq!(param(&search_params(&query), "filter.location"), None);
    }

    #[test]
    fn test_insights_params_year_floor() {
        let query = TagQuery {
            category: Category::Movies,
            tag_id: "urn:tag:genre:media:comedy".to_string(),
            page: 1,
            location: None,
            should_be_recent: true,
        };
        let params = insights_params(&query);
        assert_eq!(param(&params, "filter.release_year.min"), Some("2020"));
        assert_eq!(param(&params, "filter.tags"), Some("urn:tag:genre:media:comedy"));

        let books = TagQuery {
            category: Category::Books,
            should_be_recent: false,
            ..query
        };
        assert_eq!(param(&insights_params(&books), "filter.publication_year.min"), Some("2000"));
        assert_eq!(param(&insights_params(&books), "filter.release_year.min"), None);
    }

    #[test]
    fn test_insights_params_location_scoping() {
        let places = TagQuery {
            category: Category::Places,
            tag_id: "urn:tag:genre:place:restaurant".to_string(),
            page: 1,
            location: Some(lagos()),
            should_be_recent: false,
        };
        let params = insights_params(&places);
        assert_eq!(param(&params, "filter.geocode.country_code"), Some("NG"));
        assert_eq!(param(&params, "filter.geocode.admin1_region"), Some("Lagos"));
        assert_eq!(param(&params, "signal.location"), None);

        let shows = TagQuery {
            category: Category::TvShows,
            ..places
        };
        let params = insights_params(&shows);
        assert_eq!(param(&params, "signal.location"), Some("POINT(3.3792 6.5244)"));
        assert_eq!(param(&params, "signal.location.radius"), Some("900"));
    }

    #[test]
    fn test_select_tag_prefers_genre_for_media() {
        let tags = vec![
            tag("urn:tag:keyword:media:comedy_club", "urn:tag:keyword:media"),
            tag("urn:tag:genre:media:comedy", "urn:tag:genre:media"),
        ];

        assert_eq!(
            select_tag(Category::Movies, &tags).as_deref(),
            Some("urn:tag:genre:media:comedy")
        );
        assert_eq!(
            select_tag(Category::Places, &tags).as_deref(),
            Some("urn:tag:keyword:media:comedy_club")
        );
        assert_eq!(select_tag(Category::Books, &tags[..1]), None);
    }

    #[test]
    fn test_tags_response_shape() {
        let json = r#"{"results":{"tags":[{"id":"urn:tag:genre:media:drama","name":"Drama","type":"urn:tag:genre:media"}]}}"#;
        let response: TagsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            select_tag(Category::TvShows, &response.results.tags).as_deref(),
            Some("urn:tag:genre:media:drama")
        );
    }
}
