/// Address geocoding
///
/// Resolves a free-text location into administrative components and
/// coordinates with a single Google Geocoding call. Country-level callers
/// only keep the country fields.
use crate::{
    cached,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    models::LocationDetails,
};
use reqwest::Client as HttpClient;
use serde::Deserialize;

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

/// Trait for location resolvers
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolves an address; an unknown address yields empty details
    async fn geocode(&self, address: &str, country_level: bool) -> AppResult<LocationDetails>;
}

#[derive(Clone)]
pub struct GoogleGeocoder {
    http_client: HttpClient,
    api_key: String,
    cache: Cache,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    address_components: Vec<AddressComponent>,
    geometry: Option<Geometry>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    short_name: String,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl GoogleGeocoder {
    pub fn new(cache: Cache, api_key: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            cache,
        }
    }

    async fn fetch(&self, address: &str) -> AppResult<LocationDetails> {
        let response = self
            .http_client
            .get(GEOCODE_URL)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::ExternalApi(format!(
                "Geocoding API returned status {}",
                status
            )));
        }

        let body: GeocodeResponse = response.json().await?;
        parse_response(body)
    }
}

fn has_type(component: &AddressComponent, wanted: &str) -> bool {
    component.types.iter().any(|t| t == wanted)
}

fn parse_response(body: GeocodeResponse) -> AppResult<LocationDetails> {
    match body.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Ok(LocationDetails::default()),
        other => {
            return Err(AppError::ExternalApi(format!(
                "Geocoding failed with status {}: {}",
                other,
                body.error_message.unwrap_or_default()
            )))
        }
    }

    let mut details = LocationDetails::default();
    for result in &body.results {
        for component in &result.address_components {
            if has_type(component, "administrative_area_level_2") && details.county.is_none() {
                details.county = Some(component.long_name.replace(" County", ""));
            }
            if has_type(component, "administrative_area_level_1") && details.state.is_none() {
                details.state = Some(component.long_name.clone());
                details.state_abbr = Some(component.short_name.clone());
            }
            if has_type(component, "postal_code") && details.zip_code.is_none() {
                details.zip_code = Some(component.long_name.clone());
            }
            if has_type(component, "country") && details.country.is_none() {
                details.country = Some(component.long_name.clone());
                details.country_code = Some(component.short_name.clone());
            }
        }
    }

    if let Some(geometry) = body.results.iter().find_map(|r| r.geometry.as_ref()) {
        details.latitude = Some(geometry.location.lat);
        details.longitude = Some(geometry.location.lng);
    }

    Ok(details)
}

#[async_trait::async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, address: &str, country_level: bool) -> AppResult<LocationDetails> {
        let key = CacheKey::Geocode {
            address: address.to_string(),
            country_level,
        };

        let details: AppResult<LocationDetails> = cached!(self.cache, key, async move {
            self.fetch(address).await.map(|details| {
                if country_level {
                    details.country_only()
                } else {
                    details
                }
            })
        });
        let details = details?;

        tracing::debug!(address = %address, country = ?details.country, "Resolved location");
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> AppResult<LocationDetails> {
        parse_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_parse_components_and_geometry() {
        let details = parse(
            r#"{
                "status": "OK",
                "results": [{
                    "address_components": [
                        {"long_name": "Travis County", "short_name": "Travis County", "types": ["administrative_area_level_2", "political"]},
                        {"long_name": "Texas", "short_name": "TX", "types": ["administrative_area_level_1", "political"]},
                        {"long_name": "78701", "short_name": "78701", "types": ["postal_code"]},
                        {"long_name": "United States", "short_name": "US", "types": ["country", "political"]}
                    ],
                    "geometry": {"location": {"lat": 30.2672, "lng": -97.7431}}
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(details.county.as_deref(), Some("Travis"));
        assert_eq!(details.state_abbr.as_deref(), Some("TX"));
        assert_eq!(details.country_code.as_deref(), Some("US"));
        assert_eq!(details.zip_code.as_deref(), Some("78701"));
        assert_eq!(details.coordinates(), Some((30.2672, -97.7431)));

        let country = details.country_only();
        assert_eq!(country.country.as_deref(), Some("United States"));
        assert!(country.state.is_none());
        assert!(country.coordinates().is_none());
    }

    #[test]
    fn test_zero_results_is_empty_not_error() {
        let details = parse(r#"{"status": "ZERO_RESULTS", "results": []}"#).unwrap();
        assert_eq!(details, LocationDetails::default());
    }

    #[test]
    fn test_denied_request_is_error() {
        let result = parse(r#"{"status": "REQUEST_DENIED", "error_message": "bad key"}"#);
        assert!(matches!(result, Err(AppError::ExternalApi(msg)) if msg.contains("bad key")));
    }
}
