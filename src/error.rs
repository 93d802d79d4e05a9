//! Error taxonomy for the retrieval engine.
//!
//! Collection failures are recovered locally through the orchestrator's
//! fallback decision whenever any fallback data exists; they only reach the
//! caller when cache, index, and collector all come up empty. Dimension
//! mismatches are always fatal for the affected index — coercing vectors
//! would corrupt the similarity math.

use thiserror::Error;

/// Failure modes of the precedent collector.
///
/// Transport-level failures are kept distinct from a reachable source that
/// returned nothing usable, so the orchestrator can choose its fallback.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("ruling source unreachable: {0}")]
    Transport(String),

    #[error("ruling source timed out after {0}s")]
    Timeout(u64),

    #[error("ruling source returned no qualifying results for HS {0}")]
    NoResults(String),

    #[error("ruling source returned a malformed response: {0}")]
    InvalidResponse(String),

    #[error("search API key not set (expected in ${0})")]
    MissingApiKey(String),
}

/// Top-level error type for the retrieval engine.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("embedding dimension mismatch: index expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector/metadata pairing broken: {0}")]
    IndexConsistency(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl RetrievalError {
    /// Whether the orchestrator may attempt a degraded-mode fallback.
    ///
    /// Only collection failures are recoverable; storage and index errors
    /// indicate the fallback data itself cannot be trusted.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RetrievalError::Collection(_))
    }
}
