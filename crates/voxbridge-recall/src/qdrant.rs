//! Qdrant-backed recall store.
//!
//! Conversation turns are chunked, embedded, and upserted with caller and
//! session payload fields; retrieval is a filtered cosine search. Every
//! operation degrades to empty output on failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use voxbridge_core::config::RecallConfig;

use crate::chunk::chunk_text;
use crate::embeddings::EmbeddingClient;
use crate::{RecallStore, RecalledExchange};

const DEFAULT_URL: &str = "http://localhost:6333";
const DEFAULT_COLLECTION: &str = "phone_conversations";
const DEFAULT_VECTOR_SIZE: usize = 1536;
const DEFAULT_MAX_CHUNKS: usize = 5;
const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;
const CHUNK_SIZE: usize = 500;
const CHUNK_OVERLAP: usize = 50;

pub struct QdrantRecall {
    base_url: String,
    api_key: Option<String>,
    collection: String,
    vector_size: usize,
    max_chunks: usize,
    similarity_threshold: f32,
    embedder: EmbeddingClient,
    client: reqwest::Client,
    /// Flipped off when initialization fails; all methods then no-op.
    enabled: AtomicBool,
}

impl QdrantRecall {
    /// Build from config. Returns `None` when disabled or the embedding key
    /// is missing; callers substitute [`crate::NoopRecall`].
    pub fn from_config(config: &RecallConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let embedding_key = config.resolve_embedding_api_key()?;
        Some(Self {
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.resolve_api_key(),
            collection: config
                .collection
                .clone()
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            vector_size: config.vector_size.unwrap_or(DEFAULT_VECTOR_SIZE),
            max_chunks: config.max_context_chunks.unwrap_or(DEFAULT_MAX_CHUNKS),
            similarity_threshold: config
                .similarity_threshold
                .unwrap_or(DEFAULT_SIMILARITY_THRESHOLD),
            embedder: EmbeddingClient::new(embedding_key, config.embedding_model.clone(), None),
            client: reqwest::Client::new(),
            enabled: AtomicBool::new(true),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(ref key) = self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn ensure_collection(&self) -> anyhow::Result<()> {
        let exists = self
            .request(
                reqwest::Method::GET,
                &format!("/collections/{}", self.collection),
            )
            .send()
            .await?
            .status()
            .is_success();

        if exists {
            return Ok(());
        }

        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}", self.collection),
            )
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" },
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            anyhow::bail!("collection creation failed: {status}");
        }
        info!(collection = %self.collection, "Created recall collection");
        Ok(())
    }

    fn caller_filter(&self, caller_key: &str, exclude_session: Option<&str>) -> serde_json::Value {
        let mut filter = json!({
            "must": [
                { "key": "caller_key", "match": { "value": caller_key } },
            ],
        });
        if let Some(session) = exclude_session {
            filter["must_not"] = json!([
                { "key": "session_id", "match": { "value": session } },
            ]);
        }
        filter
    }
}

#[async_trait]
impl RecallStore for QdrantRecall {
    async fn initialize(&self) {
        if let Err(e) = self.ensure_collection().await {
            warn!(%e, "Recall backend unavailable, disabling recall");
            self.enabled.store(false, Ordering::Relaxed);
        }
    }

    async fn retrieve(
        &self,
        caller_key: &str,
        query: &str,
        exclude_session: &str,
    ) -> Vec<RecalledExchange> {
        if !self.is_enabled() {
            return Vec::new();
        }

        let vector = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(%e, "Query embedding failed");
                return Vec::new();
            }
        };

        let body = json!({
            "vector": vector,
            "filter": self.caller_filter(caller_key, Some(exclude_session)),
            "limit": self.max_chunks,
            "score_threshold": self.similarity_threshold,
            "with_payload": true,
        });

        let response = match self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/search", self.collection),
            )
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(%e, "Recall search failed");
                return Vec::new();
            }
        };

        let parsed: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!(%e, "Recall search returned unparseable body");
                return Vec::new();
            }
        };

        let hits = parsed
            .get("result")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        hits.iter()
            .filter_map(|hit| {
                let payload = hit.get("payload")?;
                Some(RecalledExchange {
                    user_text: payload
                        .get("user_text")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    assistant_text: payload
                        .get("assistant_text")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    timestamp: payload
                        .get("timestamp")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    score: hit.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
                })
            })
            .collect()
    }

    async fn store(
        &self,
        caller_key: &str,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
        sequence: u64,
        metadata: HashMap<String, String>,
    ) {
        if !self.is_enabled() {
            return;
        }

        let exchange_text = format!("User: {user_text}\nAssistant: {assistant_text}");
        let chunks = chunk_text(&exchange_text, CHUNK_SIZE, CHUNK_OVERLAP);
        let total_chunks = chunks.len();
        let timestamp = Utc::now().to_rfc3339();

        let mut points = Vec::with_capacity(total_chunks);
        for (i, chunk) in chunks.iter().enumerate() {
            let vector = match self.embedder.embed(chunk).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(%e, "Chunk embedding failed, skipping store");
                    return;
                }
            };

            let mut payload = json!({
                "caller_key": caller_key,
                "session_id": session_id,
                "sequence": sequence,
                "chunk_index": i,
                "total_chunks": total_chunks,
                "timestamp": timestamp,
                "user_text": user_text,
                "assistant_text": assistant_text,
                "chunk_text": chunk,
            });
            for (k, v) in &metadata {
                payload[k] = json!(v);
            }

            points.push(json!({
                "id": uuid::Uuid::new_v4().to_string(),
                "vector": vector,
                "payload": payload,
            }));
        }

        let result = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{}/points", self.collection),
            )
            .json(&json!({ "points": points }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(
                    caller = %caller_key,
                    chunks = total_chunks,
                    sequence,
                    "Stored exchange in recall"
                );
            }
            Ok(response) => warn!(status = %response.status(), "Recall upsert rejected"),
            Err(e) => warn!(%e, "Recall upsert failed"),
        }
    }

    async fn summarize(&self, caller_key: &str) -> String {
        if !self.is_enabled() {
            return String::new();
        }

        let body = json!({
            "filter": self.caller_filter(caller_key, None),
            "limit": 10,
            "with_payload": true,
        });

        let response = match self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{}/points/scroll", self.collection),
            )
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(%e, "Recall scroll failed");
                return String::new();
            }
        };

        let parsed: serde_json::Value = match response.json().await {
            Ok(v) => v,
            Err(_) => return String::new(),
        };

        let points = parsed
            .get("result")
            .and_then(|r| r.get("points"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        summarize_points(caller_key, &points)
    }
}

/// Group scrolled points by session and render a short history digest:
/// up to 3 prior calls, 2 exchanges each, each side truncated to 100 chars.
fn summarize_points(caller_key: &str, points: &[serde_json::Value]) -> String {
    let mut calls: Vec<(String, String, Vec<(String, String)>)> = Vec::new();

    for point in points {
        let Some(payload) = point.get("payload") else {
            continue;
        };
        let session = payload
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let timestamp = payload
            .get("timestamp")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let user = payload
            .get("user_text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let assistant = payload
            .get("assistant_text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        match calls.iter_mut().find(|(s, _, _)| *s == session) {
            Some((_, _, exchanges)) => exchanges.push((user, assistant)),
            None => calls.push((session, timestamp, vec![(user, assistant)])),
        }
    }

    if calls.is_empty() {
        return String::new();
    }

    let mut parts = vec![format!("Previous interactions with caller {caller_key}:")];
    for (_, timestamp, exchanges) in calls.iter().take(3) {
        let day = timestamp.get(..10).unwrap_or(timestamp);
        parts.push(format!("\nCall from {day}:"));
        for (user, assistant) in exchanges.iter().take(2) {
            parts.push(format!("- User asked: {}...", truncate(user, 100)));
            parts.push(format!("- Assistant responded: {}...", truncate(assistant, 100)));
        }
    }
    parts.join("\n")
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
