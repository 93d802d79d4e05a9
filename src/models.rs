//! Core data models for precedent retrieval.
//!
//! These types represent the ruling documents, queries, and retrieval
//! results that flow through the cache, index, and orchestrator.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A historical customs ruling stored as durable precedent knowledge.
///
/// Identity is the content hash of the normalized body text, so
/// re-collecting identical text is idempotent. Documents are immutable
/// once stored and never deleted in normal operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulingDocument {
    /// Lowercase hex SHA-256 of the whitespace-normalized body text.
    pub id: String,
    pub source_url: String,
    pub hs_code: String,
    pub title: String,
    pub body_text: String,
    pub published_date: Option<NaiveDate>,
    /// Unix timestamp of when this document was collected.
    pub collected_at: i64,
}

impl RulingDocument {
    /// Build a document from collected fields, deriving the content-hash id.
    pub fn new(
        source_url: String,
        hs_code: String,
        title: String,
        body_text: String,
        published_date: Option<NaiveDate>,
    ) -> Self {
        let id = content_hash(&body_text);
        RulingDocument {
            id,
            source_url,
            hs_code,
            title,
            body_text,
            published_date,
            collected_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Compute the content-hash identity for a ruling body.
///
/// Whitespace runs are collapsed before hashing so that two fetches of the
/// same ruling that differ only in formatting collapse to one document.
pub fn content_hash(body_text: &str) -> String {
    let normalized: Vec<&str> = body_text.split_whitespace().collect();
    let mut hasher = Sha256::new();
    hasher.update(normalized.join(" ").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Inbound retrieval query.
#[derive(Debug, Clone)]
pub struct RulingQuery {
    pub hs_code: String,
    pub product_context: Option<String>,
}

impl RulingQuery {
    pub fn new(hs_code: impl Into<String>) -> Self {
        RulingQuery {
            hs_code: hs_code.into(),
            product_context: None,
        }
    }

    pub fn with_product(mut self, product_context: impl Into<String>) -> Self {
        self.product_context = Some(product_context.into());
        self
    }

    /// Representative text embedded for the neighbor search: product
    /// description concatenated with the HS code.
    pub fn embedding_text(&self) -> String {
        match &self.product_context {
            Some(ctx) => format!("{} {}", ctx, self.hs_code),
            None => self.hs_code.clone(),
        }
    }
}

/// Which path produced the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalSource {
    Cache,
    Collector,
    IndexOnly,
}

impl std::fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalSource::Cache => write!(f, "cache"),
            RetrievalSource::Collector => write!(f, "collector"),
            RetrievalSource::IndexOnly => write!(f, "index-only"),
        }
    }
}

/// Assembled retrieval result handed to the analysis collaborator.
///
/// `documents` is ordered: exact/fresh matches first, then vector
/// neighbors by descending similarity. `degraded` distinguishes "answered
/// from fallback data" from a fresh authoritative answer.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub documents: Vec<RulingDocument>,
    pub degraded: bool,
    pub source: RetrievalSource,
}

/// A ranked neighbor returned from the vector index.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub document_id: String,
    pub similarity: f32,
}
