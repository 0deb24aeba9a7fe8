/// OpenAI chat completions client
use crate::{
    error::{AppError, AppResult},
    models::{Candidate, Category, FetchIntent, Score},
    services::llm::{parse_intent, parse_score, prompts, IntentService, ScoringService},
};
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct OpenAiClient {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: String, api_url: String, model: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url: api_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    /// Sends one completion request and returns the trimmed reply text
    async fn complete(&self, system: &str, user: Option<&str>) -> AppResult<Option<String>> {
        let mut messages = vec![ChatMessage {
            role: "system",
            content: system,
        }];
        if let Some(user) = user {
            messages.push(ChatMessage {
                role: "user",
                content: user,
            });
        }

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalApi(format!(
                "OpenAI API returned status {}: {}",
                status, body
            )));
        }

        let chat: ChatResponse = response.json().await?;
        Ok(chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty()))
    }
}

#[async_trait::async_trait]
impl IntentService for OpenAiClient {
    async fn extract(&self, message: &str, category: Category) -> AppResult<Option<FetchIntent>> {
        let system = prompts::intent_prompt(category);
        let Some(reply) = self.complete(&system, Some(message)).await? else {
            return Ok(None);
        };

        let intent = parse_intent(&reply);
        if intent.is_none() {
            tracing::warn!(category = %category, "No usable intent in model reply");
        }
        Ok(intent)
    }
}

#[async_trait::async_trait]
impl ScoringService for OpenAiClient {
    async fn score(&self, candidate: &Candidate, context_message: &str) -> AppResult<Option<Score>> {
        let candidate_json = serde_json::to_string(candidate)
            .map_err(|e| AppError::Internal(format!("Candidate serialization error: {}", e)))?;
        let system = prompts::scoring_prompt(&candidate_json, context_message);

        let Some(reply) = self.complete(&system, None).await? else {
            return Ok(None);
        };

        let score = parse_score(&reply);
        if score.is_none() {
            tracing::debug!(entity_id = %candidate.entity_id, "No usable score in model reply");
        }
        Ok(score)
    }
}
