/// Language model collaborators
///
/// Two calls are made against the model: decomposing a user message into a
/// `FetchIntent`, and judging how well one candidate fits the request.
/// Both return `None` when the model answers with something that is not a
/// usable JSON object.
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::AppResult,
    models::{Candidate, Category, FetchIntent, Score},
};

pub mod openai;
pub mod prompts;

pub use openai::OpenAiClient;

/// Extracts structured intent from free text
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait IntentService: Send + Sync {
    async fn extract(&self, message: &str, category: Category) -> AppResult<Option<FetchIntent>>;
}

/// Explains and scores a candidate against the request context
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ScoringService: Send + Sync {
    async fn score(&self, candidate: &Candidate, context_message: &str) -> AppResult<Option<Score>>;
}

/// Pulls the outermost JSON object out of a model reply
///
/// Replies are often wrapped in prose or code fences and sometimes carry
/// trailing commas, which are dropped before parsing.
pub fn extract_json_object(reply: &str) -> Option<Value> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }

    let cleaned = strip_trailing_commas(&reply[start..=end]);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value @ Value::Object(_)) => Some(value),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Model reply is not valid JSON");
            None
        }
    }
}

/// Removes commas that directly precede a closing brace or bracket, outside strings
fn strip_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}

/// Score reply as the model produces it; the score may arrive as a number or a string
#[derive(Deserialize)]
struct RawScore {
    #[serde(default)]
    context: String,
    score: Value,
}

/// Parses a scoring reply, clamping the score to 1..=10
pub fn parse_score(reply: &str) -> Option<Score> {
    let raw: RawScore = serde_json::from_value(extract_json_object(reply)?).ok()?;

    let score = match &raw.score {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !score.is_finite() {
        return None;
    }

    Some(Score {
        context: raw.context.trim().to_string(),
        score: score.round().clamp(1.0, 10.0) as u8,
    })
}

/// Parses an intent reply
pub fn parse_intent(reply: &str) -> Option<FetchIntent> {
    serde_json::from_value(extract_json_object(reply)?).ok()
}
