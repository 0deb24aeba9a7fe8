/// Mapping of raw Qloo entities into category-specific candidates
///
/// Pure CPU work; callers run it off the async executor.
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::models::{Candidate, Category, RecommendationPayload, TagRef, UpstreamTag};
use crate::models::recommendation::OpeningHours;

/// Raw entity as returned by Qloo search and insights endpoints
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QlooEntity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub popularity: Option<f64>,
    #[serde(default)]
    pub disambiguation: Option<String>,
    #[serde(default)]
    pub properties: QlooProperties,
    #[serde(default)]
    pub tags: Vec<UpstreamTag>,
    #[serde(default)]
    pub external: BTreeMap<String, Value>,
    #[serde(default)]
    pub location: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct QlooProperties {
    pub description: Option<String>,
    pub release_date: Option<String>,
    pub publication_date: Option<String>,
    pub image: Option<Value>,
    pub images: Option<Value>,
    pub duration: Option<i64>,
    pub content_rating: Option<String>,
    pub publisher: Option<String>,
    pub page_count: Option<i64>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub business_rating: Option<f64>,
    pub price_level: Option<i64>,
    pub is_closed: Option<bool>,
    pub hours: Option<BTreeMap<String, Vec<RawHours>>>,
    #[serde(default)]
    pub specialty_dishes: Vec<UpstreamTag>,
    #[serde(default)]
    pub good_for: Vec<UpstreamTag>,
    #[serde(default)]
    pub external: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHours {
    pub opens: Option<String>,
    pub closes: Option<String>,
}

/// Maps raw JSON entities, skipping any that fail to parse or lack a title or id
pub fn to_candidates(category: Category, entities: Vec<Value>) -> Vec<Candidate> {
    entities
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<QlooEntity>(raw) {
            Ok(entity) => to_candidate(category, entity),
            Err(e) => {
                tracing::debug!(error = %e, category = %category, "Skipping unparseable entity");
                None
            }
        })
        .collect()
}

pub fn to_candidate(category: Category, entity: QlooEntity) -> Option<Candidate> {
    match category {
        Category::Movies | Category::TvShows => screen_candidate(entity),
        Category::Books => book_candidate(entity),
        Category::Places | Category::Destinations => place_candidate(entity),
    }
}

/// Complete tags only: name, type and id all present
fn complete(tag: &UpstreamTag) -> Option<(&str, &str, &str)> {
    match (tag.name.as_deref(), tag.tag_type.as_deref(), tag.id.as_deref()) {
        (Some(name), Some(tag_type), Some(id))
            if !name.is_empty() && !tag_type.is_empty() && !id.is_empty() =>
        {
            Some((name, tag_type, id))
        }
        _ => None,
    }
}

fn tag_ref(name: &str, id: &str) -> TagRef {
    TagRef {
        id: id.to_string(),
        name: name.to_string(),
    }
}

fn identity(entity: &QlooEntity) -> Option<(String, String)> {
    let title = entity.name.clone().filter(|n| !n.trim().is_empty())?;
    let id = entity.id.clone().or_else(|| entity.entity_id.clone())?;
    Some((id, title))
}

/// First object of each external source list, without its upstream id
fn external_summary(external: &BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    external
        .iter()
        .filter_map(|(source, value)| {
            let first = value.as_array()?.first()?.as_object()?;
            let mut summary = first.clone();
            summary.remove("id");
            Some((source.clone(), Value::Object(summary)))
        })
        .collect()
}

fn screen_candidate(entity: QlooEntity) -> Option<Candidate> {
    let (entity_id, title) = identity(&entity)?;

    let mut tags = Vec::new();
    let mut where_to_watch = Vec::new();
    let mut genre = None;
    for tag in &entity.tags {
        let Some((name, tag_type, id)) = complete(tag) else {
            continue;
        };
        if tag_type.contains("streaming_service") {
            where_to_watch.push(name.to_string());
        } else if tag_type.contains("genre") {
            tags.push(tag_ref(name, id));
            genre.get_or_insert_with(|| name.to_string());
        } else if tag_type.contains("keyword") && !name.trim().contains(' ') {
            tags.push(tag_ref(name, id));
        }
    }

    let properties = entity.properties;
    Some(Candidate {
        entity_id,
        title,
        description: properties.description.as_deref().map(strip_html),
        popularity: entity.popularity,
        tags,
        details: RecommendationPayload::Screen {
            release_date: properties.release_date,
            genre,
            image: properties.image,
            duration: properties.duration,
            content_rating: properties.content_rating,
            where_to_watch,
            external: external_summary(&entity.external),
        },
        raw_tags: entity.tags,
    })
}

fn book_candidate(entity: QlooEntity) -> Option<Candidate> {
    let (entity_id, title) = identity(&entity)?;

    let tags = entity
        .tags
        .iter()
        .filter_map(complete)
        .filter(|(_, tag_type, _)| tag_type.contains("genre") || tag_type.contains("keyword"))
        .map(|(name, _, id)| tag_ref(name, id))
        .collect();

    let properties = entity.properties;
    Some(Candidate {
        entity_id,
        title,
        description: properties.description.as_deref().map(strip_html),
        popularity: entity.popularity,
        tags,
        details: RecommendationPayload::Book {
            author: entity.disambiguation.as_deref().map(clean_author),
            publication_date: properties.publication_date,
            image: properties.image,
            publisher: properties.publisher,
            page_count: properties.page_count,
            external: external_summary(&entity.external),
        },
        raw_tags: entity.tags,
    })
}

fn place_candidate(entity: QlooEntity) -> Option<Candidate> {
    let (entity_id, title) = identity(&entity)?;
    let properties = entity.properties;

    let mut seen = HashSet::new();
    let mut tags = Vec::new();
    let all_tags = entity
        .tags
        .iter()
        .chain(properties.specialty_dishes.iter())
        .chain(properties.good_for.iter());
    for tag in all_tags {
        let Some((name, tag_type, id)) = complete(tag) else {
            continue;
        };
        if seen.insert(name.to_string()) {
            tags.push(tag_ref(name, &place_tag_id(id, tag_type)));
        }
    }

    let hours = properties
        .hours
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(day, entries)| {
            let cleaned: Vec<OpeningHours> = entries
                .into_iter()
                .map(|entry| OpeningHours {
                    opens: entry.opens.map(|t| t.replace('T', "")),
                    closes: entry.closes.map(|t| t.replace('T', "")),
                })
                .filter(|entry| entry.opens.is_some() || entry.closes.is_some())
                .collect();
            (!cleaned.is_empty()).then_some((day, cleaned))
        })
        .collect();

    let external = if entity.external.is_empty() {
        external_summary(&properties.external)
    } else {
        external_summary(&entity.external)
    };

    // Places carry either an image list or a single image object
    let image = match properties.images.or(properties.image) {
        Some(Value::Array(images)) => images.into_iter().next(),
        Some(image @ Value::Object(_)) => Some(image),
        _ => None,
    };

    Some(Candidate {
        entity_id,
        title,
        description: properties.description.as_deref().map(strip_html),
        popularity: entity.popularity,
        tags,
        details: RecommendationPayload::Place {
            address: properties.address,
            image,
            website: properties.website.filter(|w| !w.is_empty()),
            phone: properties.phone.filter(|p| !p.is_empty()),
            business_rating: properties.business_rating,
            price_level: properties.price_level,
            is_closed: properties.is_closed,
            location: entity.location,
            hours,
            external,
        },
        raw_tags: entity.tags,
    })
}

/// Inserts the `place` segment right after the tag type path when it is missing,
/// e.g. `urn:tag:genre:restaurant` with type `urn:tag:genre` becomes
/// `urn:tag:genre:place:restaurant`.
pub fn place_tag_id(tag_id: &str, tag_type: &str) -> String {
    let mut id_parts: Vec<&str> = tag_id.split(':').collect();
    let insert_at = tag_type.split(':').count();

    if insert_at >= id_parts.len() || id_parts[insert_at] == "place" {
        return tag_id.to_string();
    }

    id_parts.insert(insert_at, "place");
    id_parts.join(":")
}

/// Book disambiguations look like "1997, J.K. Rowling"
pub fn clean_author(disambiguation: &str) -> String {
    let trimmed = disambiguation.trim();
    let bytes = trimmed.as_bytes();
    if bytes.len() > 5 && bytes[..4].iter().all(u8::is_ascii_digit) && bytes[4] == b',' {
        trimmed[5..].trim_start().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Removes markup, dropping the content of italic, script and style elements
pub fn strip_html(html: &str) -> String {
    const DROP_CONTENT: [&str; 4] = ["i", "em", "script", "style"];

    let mut text = String::with_capacity(html.len());
    let mut skipping: Option<String> = None;
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        if skipping.is_none() {
            text.push_str(&rest[..open]);
        }
        let after = &rest[open + 1..];
        let starts_tag = after
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '/' || c == '!');
        let close = after.find('>').filter(|_| starts_tag);
        let Some(close) = close else {
            // A bare `<` in prose
            if skipping.is_none() {
                text.push('<');
            }
            rest = after;
            continue;
        };
        let tag = &after[..close];
        rest = &after[close + 1..];

        let is_closing = tag.starts_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        match &skipping {
            Some(skipped) if is_closing && *skipped == name => skipping = None,
            Some(_) => {}
            None if !is_closing && DROP_CONTENT.contains(&name.as_str()) && !tag.ends_with('/') => {
                skipping = Some(name)
            }
            None => text.push(' '),
        }
    }
    if skipping.is_none() {
        text.push_str(rest);
    }

    decode_entities(&text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Decodes named basics and numeric character references; unknown ones stay as written
fn decode_entities(text: &str) -> String {
    let mut decoded = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        decoded.push_str(&rest[..amp]);
        let candidate = &rest[amp + 1..];
        let entity = candidate
            .find(';')
            .filter(|&end| end > 0 && end <= 10)
            .map(|end| (&candidate[..end], end));

        let replacement = entity.and_then(|(name, _)| match name {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => {
                let code = match name.strip_prefix('#') {
                    Some(hex) if hex.starts_with(['x', 'X']) => u32::from_str_radix(&hex[1..], 16).ok(),
                    Some(dec) => dec.parse().ok(),
                    None => None,
                };
                code.and_then(char::from_u32)
            }
        });

        match (replacement, entity) {
            (Some(c), Some((_, end))) => {
                decoded.push(c);
                rest = &candidate[end + 1..];
            }
            _ => {
                decoded.push('&');
                rest = candidate;
            }
        }
    }
    decoded.push_str(rest);
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strip_html_drops_italic_content() {
        let html = "<p>A thief <b>steals</b> secrets <i>(source: Wikipedia)</i></p>";
        assert_eq!(strip_html(html), "A thief steals secrets");
        assert_eq!(strip_html("plain text"), "plain text");
        assert_eq!(strip_html("<script>alert(1)</script>Hello"), "Hello");
    }

    #[test]
    fn test_strip_html_decodes_entities_and_keeps_bare_angles() {
        assert_eq!(
            strip_html("<p>Tom &amp; Jerry&#39;s &quot;best&quot; &#x263A;</p>"),
            "Tom & Jerry's \"best\" \u{263A}"
        );
        assert_eq!(strip_html("Rated 4 < 5 stars, <b>loved</b>"), "Rated 4 < 5 stars, loved");
        assert_eq!(strip_html("R&D at AT&T; &bogus;"), "R&D at AT&T; &bogus;");
        assert_eq!(strip_html("&lt;b&gt; is markup"), "<b> is markup");
    }

    #[test]
    fn test_clean_author_strips_year_prefix() {
        assert_eq!(clean_author("1997, J.K. Rowling"), "J.K. Rowling");
        assert_eq!(clean_author("Chinua Achebe"), "Chinua Achebe");
    }

    #[test]
    fn test_place_tag_id_insertion() {
        assert_eq!(
            place_tag_id("urn:tag:genre:restaurant", "urn:tag:genre"),
            "urn:tag:genre:place:restaurant"
        );
        assert_eq!(
            place_tag_id("urn:tag:genre:place:restaurant", "urn:tag:genre"),
            "urn:tag:genre:place:restaurant"
        );
    }

    #[test]
    fn test_screen_candidate_splits_tags() {
        let raw = json!({
            "name": "The Dark Knight Rises",
            "entity_id": "E-TDKR",
            "popularity": 0.98,
            "properties": {
                "description": "<p>Batman returns</p>",
                "release_date": "2012-07-20",
                "duration": 165
            },
            "tags": [
                {"id": "urn:tag:genre:media:action", "name": "Action", "type": "urn:tag:genre:media"},
                {"id": "urn:tag:genre:media:thriller", "name": "Thriller", "type": "urn:tag:genre:media"},
                {"id": "urn:tag:keyword:media:vigilante", "name": "vigilante", "type": "urn:tag:keyword:media"},
                {"id": "urn:tag:keyword:media:masked_hero", "name": "masked hero", "type": "urn:tag:keyword:media"},
                {"id": "urn:tag:streaming_service:media:max", "name": "Max", "type": "urn:tag:streaming_service:media"},
                {"name": "incomplete"}
            ],
            "external": {"imdb": [{"id": "tt1345836", "user_rating": 8.4}]}
        });

        let candidates = to_candidates(Category::Movies, vec![raw]);
        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.entity_id, "E-TDKR");
        assert_eq!(candidate.description.as_deref(), Some("Batman returns"));
        let names: Vec<&str> = candidate.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Action", "Thriller", "vigilante"]);
        assert_eq!(candidate.raw_tags.len(), 6);

        match &candidate.details {
            RecommendationPayload::Screen {
                genre,
                where_to_watch,
                external,
                ..
            } => {
                assert_eq!(genre.as_deref(), Some("Action"));
                assert_eq!(where_to_watch, &vec!["Max".to_string()]);
                assert_eq!(external["imdb"], json!({"user_rating": 8.4}));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_place_candidate_dedupes_tags_and_cleans_hours() {
        let raw = json!({
            "name": "Jollof Spot",
            "id": "P-1",
            "properties": {
                "address": "12 Allen Ave, Ikeja",
                "images": [{"url": "https://img/1"}, {"url": "https://img/2"}],
                "hours": {"Monday": [{"opens": "T09:00", "closes": "T22:00"}], "Sunday": [{}]},
                "specialty_dishes": [
                    {"id": "urn:tag:specialty_dish:jollof", "name": "Jollof", "type": "urn:tag:specialty_dish"}
                ]
            },
            "tags": [
                {"id": "urn:tag:genre:restaurant", "name": "Restaurant", "type": "urn:tag:genre"},
                {"id": "urn:tag:genre:restaurant", "name": "Restaurant", "type": "urn:tag:genre"}
            ]
        });

        let candidate = to_candidates(Category::Places, vec![raw]).remove(0);
        assert_eq!(candidate.tags.len(), 2);
        assert_eq!(candidate.tags[0].id, "urn:tag:genre:place:restaurant");

        match candidate.details {
            RecommendationPayload::Place { image, hours, .. } => {
                assert_eq!(image, Some(json!({"url": "https://img/1"})));
                assert_eq!(hours.len(), 1);
                assert_eq!(hours["Monday"][0].opens.as_deref(), Some("09:00"));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_entities_without_identity_are_skipped() {
        let raw = vec![
            json!({"name": "No id"}),
            json!({"id": "no-name"}),
            json!({"name": "Bad properties", "id": "x", "properties": {"duration": "long"}}),
            json!({"name": "Things Fall Apart", "id": "B-1", "disambiguation": "1958, Chinua Achebe"}),
        ];

        let candidates = to_candidates(Category::Books, raw);
        assert_eq!(candidates.len(), 1);
        match &candidates[0].details {
            RecommendationPayload::Book { author, .. } => {
                assert_eq!(author.as_deref(), Some("Chinua Achebe"))
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
