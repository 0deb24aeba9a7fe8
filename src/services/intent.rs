/// Turns a user message into a cached, geocoded fetch intent
use std::sync::Arc;

use crate::{
    error::{RoundError, RoundResult},
    models::{Category, FetchIntent, LocationDetails, SessionKey, SessionUpdate},
    services::{
        geocoding::Geocoder, llm::IntentService, session_state::SessionState, with_timeout,
    },
};

pub const INVALID_MESSAGE: &str = "Your message does not seem to be a valid one for generating recommendations. Please try again with a valid message.";

#[derive(Clone)]
pub struct IntentExtractor {
    intents: Arc<dyn IntentService>,
    geocoder: Arc<dyn Geocoder>,
    state: SessionState,
}

impl IntentExtractor {
    pub fn new(
        intents: Arc<dyn IntentService>,
        geocoder: Arc<dyn Geocoder>,
        state: SessionState,
    ) -> Self {
        Self {
            intents,
            geocoder,
            state,
        }
    }

    /// Returns the intent for a key, asking the model only on a cache miss
    ///
    /// A fresh intent is written back without waiting. When it names a
    /// location, the resolved details are also stored at category scope for
    /// later tag-only rounds.
    pub async fn extract(&self, key: &SessionKey, message: &str) -> RoundResult<FetchIntent> {
        if let Some(cached) = self.state.get(key).await?.fetch_intent {
            tracing::debug!(key = %key, "Using cached fetch intent");
            return Ok(cached);
        }

        let timeout = self.state.settings().external_timeout;
        let category = key.category;

        let mut intent = with_timeout(
            "intent extraction",
            timeout,
            self.intents.extract(message, category),
        )
        .await?
        .ok_or_else(|| RoundError::Technical("Intent service returned no usable response".to_string()))?;

        if !intent.is_valid {
            tracing::info!(key = %key, "Message rejected as unrelated to category");
            return Err(RoundError::User(INVALID_MESSAGE.to_string()));
        }

        if intent.has_location() {
            intent.location_details = Some(self.locate(category, &intent.location).await?);
        }

        if let Some(details) = &intent.location_details {
            self.state.set_in_background(
                &SessionKey::category_scope(key.session_id.clone(), category),
                SessionUpdate::LastLocation(details.clone()),
            );
        }
        self.state
            .set_in_background(key, SessionUpdate::FetchIntent(intent.clone()));

        tracing::info!(
            key = %key,
            is_specific = intent.is_specific,
            query = %intent.search_query(),
            backups = intent.backup_keywords.len(),
            "Extracted fetch intent"
        );

        Ok(intent)
    }

    async fn locate(
        &self,
        category: Category,
        location: &str,
    ) -> RoundResult<LocationDetails> {
        let timeout = self.state.settings().external_timeout;
        let details = with_timeout(
            "geocoding",
            timeout,
            self.geocoder.geocode(location.trim(), category.is_country_level()),
        )
        .await?;
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::PipelineSettings,
        db::MemorySessionStore,
        error::AppError,
        services::{geocoding::MockGeocoder, llm::MockIntentService, test_support::eventually},
    };
    use mockall::predicate::*;

    fn intent(is_valid: bool, location: &str) -> FetchIntent {
        FetchIntent {
            is_valid,
            is_specific: true,
            keyword: "good jollof rice".to_string(),
            generic_term: String::new(),
            location: location.to_string(),
            should_be_recent: false,
            backup_keywords: vec!["jollof".to_string()],
            location_details: None,
        }
    }

    fn lagos() -> LocationDetails {
        LocationDetails {
            country: Some("Nigeria".to_string()),
            country_code: Some("NG".to_string()),
            state: Some("Lagos".to_string()),
            latitude: Some(6.52),
            longitude: Some(3.37),
            ..LocationDetails::default()
        }
    }

    fn build_extractor(intents: MockIntentService, geocoder: MockGeocoder) -> (IntentExtractor, SessionState) {
        let state = SessionState::new(Arc::new(MemorySessionStore::new()), PipelineSettings::default());
        (
            IntentExtractor::new(Arc::new(intents), Arc::new(geocoder), state.clone()),
            state,
        )
    }

    #[tokio::test]
    async fn test_location_is_geocoded_and_stored_at_category_scope() {
        let mut intents = MockIntentService::new();
        intents
            .expect_extract()
            .with(eq("I am in Lagos and need jollof"), eq(Category::Places))
            .times(1)
            .returning(|_, _| Ok(Some(intent(true, "Lagos, Nigeria"))));

        let mut geocoder = MockGeocoder::new();
        geocoder
            .expect_geocode()
            .with(eq("Lagos, Nigeria"), eq(false))
            .times(1)
            .returning(|_, _| Ok(lagos()));

        let (extractor, state) = build_extractor(intents, geocoder);
        let key = SessionKey::new("s1", Category::Places, Some("I am in Lagos and need jollof"), None);

        let extracted = extractor.extract(&key, "I am in Lagos and need jollof").await.unwrap();
        assert_eq!(extracted.location_details, Some(lagos()));

        let scope = SessionKey::category_scope("s1", Category::Places);
        eventually(|| {
            let state = state.clone();
            let scope = scope.clone();
            async move { state.get(&scope).await.unwrap().last_location == Some(lagos()) }
        })
        .await;

        // Second call is served from the session cache; the mocks allow one call each
        eventually(|| {
            let state = state.clone();
            let key = key.clone();
            async move { state.get(&key).await.unwrap().fetch_intent.is_some() }
        })
        .await;
        let cached = extractor.extract(&key, "I am in Lagos and need jollof").await.unwrap();
        assert_eq!(cached, extracted);
    }

    #[tokio::test]
    async fn test_country_level_categories_geocode_coarsely() {
        let mut intents = MockIntentService::new();
        intents
            .expect_extract()
            .returning(|_, _| Ok(Some(intent(true, "Nigeria"))));

        let mut geocoder = MockGeocoder::new();
        geocoder
            .expect_geocode()
            .with(eq("Nigeria"), eq(true))
            .times(1)
            .returning(|_, _| Ok(lagos().country_only()));

        let (extractor, _) = build_extractor(intents, geocoder);
        let key = SessionKey::new("s1", Category::Movies, Some("Nollywood movies"), None);
        let extracted = extractor.extract(&key, "Nollywood movies").await.unwrap();
        assert!(extracted.location_details.unwrap().coordinates().is_none());
    }

    #[tokio::test]
    async fn test_invalid_intent_is_user_error_and_not_cached() {
        let mut intents = MockIntentService::new();
        intents
            .expect_extract()
            .returning(|_, _| Ok(Some(intent(false, ""))));

        let (extractor, state) = build_extractor(intents, MockGeocoder::new());
        let key = SessionKey::new("s1", Category::Books, Some("what's the weather"), None);

        let err = extractor.extract(&key, "what's the weather").await.unwrap_err();
        assert_eq!(err, RoundError::User(INVALID_MESSAGE.to_string()));

        tokio::task::yield_now().await;
        assert!(state.get(&key).await.unwrap().fetch_intent.is_none());
    }

    #[tokio::test]
    async fn test_missing_or_failed_response_is_technical() {
        let mut intents = MockIntentService::new();
        intents.expect_extract().times(1).returning(|_, _| Ok(None));
        let (silent, _) = build_extractor(intents, MockGeocoder::new());
        let key = SessionKey::new("s1", Category::Books, Some("sci-fi"), None);
        assert!(matches!(
            silent.extract(&key, "sci-fi").await,
            Err(RoundError::Technical(_))
        ));

        let mut intents = MockIntentService::new();
        intents
            .expect_extract()
            .returning(|_, _| Err(AppError::ExternalApi("503".to_string())));
        let (failing, _) = build_extractor(intents, MockGeocoder::new());
        assert!(matches!(
            failing.extract(&key, "sci-fi").await,
            Err(RoundError::Technical(msg)) if msg.contains("503")
        ));
    }
}
