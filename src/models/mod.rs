use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

pub mod intent;
pub mod recommendation;
pub mod session;

pub use intent::{FetchIntent, LocationDetails};
pub use recommendation::{
    Candidate, EnrichedRecommendation, Page, RecommendationFilter, RecommendationPayload,
    RecommendationView, Score, TagRef, UpstreamTag,
};
pub use session::{normalize_message, RoundStatus, SessionFields, SessionKey, SessionUpdate};

/// Recommendation category offered to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Movies,
    TvShows,
    Books,
    Places,
    Destinations,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Movies,
        Category::TvShows,
        Category::Books,
        Category::Places,
        Category::Destinations,
    ];

    /// Wire token used in storage keys and query parameters
    pub fn token(&self) -> &'static str {
        match self {
            Category::Movies => "movies",
            Category::TvShows => "tv_shows",
            Category::Books => "books",
            Category::Places => "places",
            Category::Destinations => "destinations",
        }
    }

    /// Name shown to users
    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Movies => "Movies",
            Category::TvShows => "TV Shows",
            Category::Books => "Books",
            Category::Places => "Places",
            Category::Destinations => "Destinations",
        }
    }

    /// Qloo entity type URN
    pub fn entity_urn(&self) -> &'static str {
        match self {
            Category::Movies => "urn:entity:movie",
            Category::TvShows => "urn:entity:tv_show",
            Category::Books => "urn:entity:book",
            Category::Places => "urn:entity:place",
            Category::Destinations => "urn:entity:destination",
        }
    }

    /// Country-level categories skip per-place geocoding on the tag path
    pub fn is_country_level(&self) -> bool {
        matches!(self, Category::Movies | Category::Books)
    }

    /// Tag resolution prefers genre tags for media categories
    pub fn prefers_genre_tags(&self) -> bool {
        matches!(self, Category::Movies | Category::TvShows | Category::Books)
    }

    /// Places and destinations are scoped by coordinates
    pub fn is_place_like(&self) -> bool {
        matches!(self, Category::Places | Category::Destinations)
    }

    /// Destinations are currently disabled in the public surface
    pub fn is_public(&self) -> bool {
        !matches!(self, Category::Destinations)
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Accepts either the wire token or the display name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| {
                c.token().eq_ignore_ascii_case(trimmed)
                    || c.display_name().eq_ignore_ascii_case(trimmed)
            })
            .ok_or_else(|| format!("Unknown recommendation category: {}", s))
    }
}
