use redis::AsyncCommands;
use redis::Client;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::error::AppResult;
use crate::models::{normalize_message, Category};

/// Writes queued beyond this are dropped; the cache only fronts lookups
const WRITE_QUEUE_CAPACITY: usize = 1024;

const TAG_LOOKUP_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const GEOCODE_TTL_SECS: u64 = 30 * 24 * 60 * 60;

/// Redis keys for cached upstream lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Generic term to representative tag id, per category
    TagLookup { category: Category, term: String },
    /// Geocoding result for an address
    Geocode { address: String, country_level: bool },
}

impl CacheKey {
    /// Expiry in seconds
    pub fn ttl(&self) -> u64 {
        match self {
            CacheKey::TagLookup { .. } => TAG_LOOKUP_TTL_SECS,
            CacheKey::Geocode { .. } => GEOCODE_TTL_SECS,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheKey::TagLookup { category, term } => {
                write!(f, "tag:{}:{}", category, normalize_message(term))
            }
            CacheKey::Geocode {
                address,
                country_level,
            } => {
                let scope = if *country_level { "country" } else { "local" };
                write!(f, "geo:{}:{}", scope, normalize_message(address))
            }
        }
    }
}

pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

struct PendingWrite {
    key: String,
    value: String,
    ttl: u64,
}

/// Read-through lookup cache
///
/// Reads go straight to Redis. Writes are queued to a single writer task so
/// a slow Redis never delays a response; a full queue drops the write.
#[derive(Clone)]
pub struct Cache {
    redis_client: Client,
    writes: mpsc::Sender<PendingWrite>,
}

/// Owns the writer task; `shutdown` flushes queued writes before returning
pub struct CacheWriterHandle {
    stop: oneshot::Sender<()>,
    writer: JoinHandle<()>,
}

impl CacheWriterHandle {
    pub async fn shutdown(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.writer.await {
            tracing::error!(error = %e, "Cache writer task failed");
        }
    }
}

impl Cache {
    pub async fn new(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (writes, queue) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let (stop, stopped) = oneshot::channel();
        let writer = tokio::spawn(run_writer(redis_client.clone(), queue, stopped));

        (
            Self {
                redis_client,
                writes,
            },
            CacheWriterHandle { stop, writer },
        )
    }

    /// Cached value for a key
    ///
    /// An unreachable Redis or an entry written with an older shape reads as
    /// a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = match self.read_raw(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, key = %key, "Discarding undecodable cache entry");
                None
            }
        }
    }

    async fn read_raw(&self, key: &CacheKey) -> AppResult<Option<String>> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(key.to_string()).await?;
        Ok(raw)
    }

    /// Queues a write with the key's TTL and returns immediately
    pub fn put<T: Serialize>(&self, key: &CacheKey, value: &T) {
        let value = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(error = %e, key = %key, "Cache serialization error");
                return;
            }
        };

        let write = PendingWrite {
            key: key.to_string(),
            value,
            ttl: key.ttl(),
        };
        if let Err(e) = self.writes.try_send(write) {
            tracing::warn!(error = %e, key = %key, "Dropping cache write");
        }
    }
}

async fn run_writer(
    client: Client,
    mut queue: mpsc::Receiver<PendingWrite>,
    mut stopped: oneshot::Receiver<()>,
) {
    tracing::info!("Lookup cache writer started");

    loop {
        tokio::select! {
            Some(write) = queue.recv() => store(&client, write).await,
            _ = &mut stopped => break,
        }
    }

    // Live senders keep recv() pending, so only drain what is already queued
    let mut flushed = 0;
    while let Ok(write) = queue.try_recv() {
        store(&client, write).await;
        flushed += 1;
    }
    tracing::info!(flushed = flushed, "Lookup cache writer stopped");
}

async fn store(client: &Client, write: PendingWrite) {
    let result: AppResult<()> = async {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(&write.key, write.value, write.ttl).await?;
        Ok(())
    }
    .await;

    if let Err(e) = result {
        tracing::error!(error = %e, key = %write.key, "Failed to write to Redis cache");
    }
}
