//! Recall collaborator — similarity search over prior conversations, keyed
//! by caller identity.
//!
//! Everything here is best-effort: a failing backend yields empty context
//! and the exchange proceeds without it.

use std::collections::HashMap;

use async_trait::async_trait;

pub mod chunk;
pub mod embeddings;
pub mod qdrant;

pub use qdrant::QdrantRecall;

/// One recalled prior exchange.
#[derive(Debug, Clone)]
pub struct RecalledExchange {
    pub user_text: String,
    pub assistant_text: String,
    /// ISO-8601 timestamp of the original exchange.
    pub timestamp: String,
    pub score: f32,
}

/// Interface to the recall backend.
#[async_trait]
pub trait RecallStore: Send + Sync {
    /// Prepare the backend (collection creation etc.). Failures disable
    /// recall for the process, they never propagate.
    async fn initialize(&self);

    /// Retrieve prior exchanges for this caller relevant to `query`,
    /// excluding the current session.
    async fn retrieve(
        &self,
        caller_key: &str,
        query: &str,
        exclude_session: &str,
    ) -> Vec<RecalledExchange>;

    /// Store one completed exchange.
    async fn store(
        &self,
        caller_key: &str,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
        sequence: u64,
        metadata: HashMap<String, String>,
    );

    /// A short summary of the caller's history, or empty.
    async fn summarize(&self, caller_key: &str) -> String;
}

/// Recall backend used when the integration is disabled or unconfigured.
pub struct NoopRecall;

#[async_trait]
impl RecallStore for NoopRecall {
    async fn initialize(&self) {}

    async fn retrieve(&self, _: &str, _: &str, _: &str) -> Vec<RecalledExchange> {
        Vec::new()
    }

    async fn store(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: &str,
        _: u64,
        _: HashMap<String, String>,
    ) {
    }

    async fn summarize(&self, _: &str) -> String {
        String::new()
    }
}
