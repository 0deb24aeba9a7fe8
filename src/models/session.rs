use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, time::Duration};

use super::{Category, FetchIntent, LocationDetails};

const PARTITION_SEPARATOR: &str = ".";

/// Normalizes a user message for keying.
///
/// Lowercases, drops punctuation, symbols and emoji, and collapses whitespace,
/// so "Book me a HOTEL!!" and "book me a   hotel" share a key.
pub fn normalize_message(text: &str) -> String {
    let kept: String = text
        .chars()
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                None
            }
        })
        .collect::<String>()
        .to_lowercase();

    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Identity of one session-scoped recommendation stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub session_id: String,
    pub category: Category,
    /// Normalized message and/or tag id; `None` addresses category-level fields
    pub partition: Option<String>,
}

impl SessionKey {
    pub fn new(
        session_id: impl Into<String>,
        category: Category,
        message: Option<&str>,
        tag_id: Option<&str>,
    ) -> Self {
        let mut parts = Vec::with_capacity(2);
        if let Some(cleaned) = message.map(normalize_message).filter(|m| !m.is_empty()) {
            parts.push(cleaned);
        }
        if let Some(tag) = tag_id.filter(|t| !t.is_empty()) {
            parts.push(tag.to_string());
        }

        Self {
            session_id: session_id.into(),
            category,
            partition: if parts.is_empty() {
                None
            } else {
                Some(parts.join(PARTITION_SEPARATOR))
            },
        }
    }

    /// Category-level key, where the last resolved location lives
    pub fn category_scope(session_id: impl Into<String>, category: Category) -> Self {
        Self {
            session_id: session_id.into(),
            category,
            partition: None,
        }
    }

    pub fn partition_or_empty(&self) -> &str {
        self.partition.as_deref().unwrap_or("")
    }
}

impl Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.session_id,
            self.category,
            self.partition.as_deref().unwrap_or("-")
        )
    }
}

/// Status of the latest generation round for a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RoundStatus {
    #[default]
    Idle,
    Processing {
        since: DateTime<Utc>,
    },
    Succeeded,
    FailedUser {
        reason: String,
    },
    FailedTechnical {
        reason: String,
    },
}

impl RoundStatus {
    pub fn processing_now() -> Self {
        RoundStatus::Processing { since: Utc::now() }
    }

    /// Whether a round holds the key; a processing status older than the lease is stale
    pub fn is_processing(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        match self {
            RoundStatus::Processing { since } => match chrono::Duration::from_std(lease) {
                Ok(lease) => *since + lease > now,
                Err(_) => true,
            },
            _ => false,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            RoundStatus::FailedUser { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn technical_error(&self) -> Option<&str> {
        match self {
            RoundStatus::FailedTechnical { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Typed field record stored under one session key
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionFields {
    #[serde(default)]
    pub status: RoundStatus,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub fetch_intent: Option<FetchIntent>,
    #[serde(default)]
    pub last_location: Option<LocationDetails>,
    #[serde(default)]
    pub tag_switched_id: Option<String>,
}

impl SessionFields {
    pub fn apply(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Status(status) => self.status = status,
            SessionUpdate::Page(page) => self.page = Some(page),
            SessionUpdate::FetchIntent(intent) => self.fetch_intent = Some(intent),
            SessionUpdate::LastLocation(location) => self.last_location = Some(location),
            SessionUpdate::TagSwitched(tag_id) => self.tag_switched_id = Some(tag_id),
        }
    }

    pub fn is_processing(&self, lease: Duration) -> bool {
        self.status.is_processing(Utc::now(), lease)
    }
}

/// Single-field upsert; fields are only ever overwritten, never removed
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Status(RoundStatus),
    Page(u32),
    FetchIntent(FetchIntent),
    LastLocation(LocationDetails),
    TagSwitched(String),
}

impl SessionUpdate {
    pub fn field_name(&self) -> &'static str {
        match self {
            SessionUpdate::Status(_) => "status",
            SessionUpdate::Page(_) => "page",
            SessionUpdate::FetchIntent(_) => "fetch_intent",
            SessionUpdate::LastLocation(_) => "last_location",
            SessionUpdate::TagSwitched(_) => "tag_switched_id",
        }
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            SessionUpdate::Status(status) => serde_json::to_value(status),
            SessionUpdate::Page(page) => serde_json::to_value(page),
            SessionUpdate::FetchIntent(intent) => serde_json::to_value(intent),
            SessionUpdate::LastLocation(location) => serde_json::to_value(location),
            SessionUpdate::TagSwitched(tag_id) => serde_json::to_value(tag_id),
        }
    }
}
