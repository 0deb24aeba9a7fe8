use serde::{Deserialize, Deserializer, Serialize};

/// Structured search intent extracted from a user message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchIntent {
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub is_specific: bool,
    #[serde(default)]
    pub keyword: String,
    #[serde(default)]
    pub generic_term: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub should_be_recent: bool,
    /// Single-word fallbacks, tried in order when the main query finds nothing
    #[serde(default, deserialize_with = "keyword_list")]
    pub backup_keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_details: Option<LocationDetails>,
}

impl FetchIntent {
    /// Keyword when present, otherwise the generic term
    pub fn search_query(&self) -> &str {
        if self.keyword.trim().is_empty() {
            self.generic_term.trim()
        } else {
            self.keyword.trim()
        }
    }

    /// Term used to resolve a representative tag for non-specific requests
    pub fn tag_query(&self) -> &str {
        if self.generic_term.trim().is_empty() {
            self.keyword.trim()
        } else {
            self.generic_term.trim()
        }
    }

    pub fn has_location(&self) -> bool {
        !self.location.trim().is_empty()
    }
}

/// Models return backup keywords either as "a,b,c" or as a JSON list
fn keyword_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Keywords {
        Joined(String),
        List(Vec<String>),
        Missing(()),
    }

    let raw = match Keywords::deserialize(deserializer)? {
        Keywords::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        Keywords::List(list) => list,
        Keywords::Missing(()) => Vec::new(),
    };

    Ok(raw
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect())
}

/// Resolved geocoding result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationDetails {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub state_abbr: Option<String>,
    #[serde(default)]
    pub county: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Search radius in kilometres for point-based lookups
    #[serde(default)]
    pub max_radius: Option<u32>,
}

impl LocationDetails {
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }

    /// Drops everything below country granularity
    pub fn country_only(self) -> Self {
        Self {
            country: self.country,
            country_code: self.country_code,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_keywords_from_comma_string() {
        let json = r#"{
            "is_valid": true,
            "is_specific": true,
            "keyword": "superhero thriller",
            "generic_term": "",
            "location": "",
            "backup_keywords": "superhero, thriller ,batman,"
        }"#;

        let intent: FetchIntent = serde_json::from_str(json).unwrap();
        assert_eq!(intent.backup_keywords, vec!["superhero", "thriller", "batman"]);
        assert!(!intent.should_be_recent);
        assert_eq!(intent.location_details, None);
    }

    #[test]
    fn test_backup_keywords_from_list_or_null() {
        let intent: FetchIntent =
            serde_json::from_str(r#"{"is_valid": true, "backup_keywords": ["jollof", " rice "]}"#)
                .unwrap();
        assert_eq!(intent.backup_keywords, vec!["jollof", "rice"]);

        let intent: FetchIntent =
            serde_json::from_str(r#"{"is_valid": true, "backup_keywords": null}"#).unwrap();
        assert!(intent.backup_keywords.is_empty());
    }

    #[test]
    fn test_search_query_prefers_keyword() {
        let mut intent: FetchIntent = serde_json::from_str(
            r#"{"is_valid": true, "keyword": "J.K. Rowling", "generic_term": "fantasy"}"#,
        )
        .unwrap();
        assert_eq!(intent.search_query(), "J.K. Rowling");
        assert_eq!(intent.tag_query(), "fantasy");

        intent.keyword = "  ".to_string();
        assert_eq!(intent.search_query(), "fantasy");
    }

    #[test]
    fn test_country_only_strips_local_fields() {
        let details = LocationDetails {
            country: Some("Nigeria".to_string()),
            country_code: Some("NG".to_string()),
            state: Some("Lagos".to_string()),
            latitude: Some(6.5),
            longitude: Some(3.4),
            ..LocationDetails::default()
        };

        let country = details.country_only();
        assert_eq!(country.country_code.as_deref(), Some("NG"));
        assert_eq!(country.state, None);
        assert_eq!(country.coordinates(), None);
    }
}
