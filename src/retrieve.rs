//! Retrieval orchestration.
//!
//! Composes the cache, collector, embedder, and vector index into the
//! per-query flow: cache lookup → collect on miss → index the collected
//! rulings → neighbor search → assemble. Collection failures fall back to
//! stale cache or index neighbors (degraded mode) before surfacing an
//! error.
//!
//! Concurrent queries for the same key collapse into one collection and
//! indexing cycle: a per-key async mutex serializes the miss path, and
//! losers re-check the cache after acquiring the lock, reusing the
//! winner's entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, RulingCache};
use crate::collector::RulingCollector;
use crate::config::Config;
use crate::db;
use crate::embedding::{Embedder, HashEmbedder};
use crate::error::{CollectionError, RetrievalError};
use crate::index::VectorIndex;
use crate::migrate;
use crate::models::{Neighbor, RetrievalResult, RetrievalSource, RulingDocument, RulingQuery};

/// Retry policy applied around the external collection call.
///
/// Only transport-level failures are retried; a source that answered with
/// nothing will answer with nothing again.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    fn should_retry(error: &CollectionError) -> bool {
        matches!(
            error,
            CollectionError::Transport(_) | CollectionError::Timeout(_)
        )
    }
}

/// The precedent retrieval engine.
///
/// Explicitly constructed and explicitly lifetimed — no ambient
/// singletons. Safe to share across concurrent queries behind an `Arc`.
pub struct RetrievalEngine {
    index: VectorIndex,
    cache: RulingCache,
    collector: Arc<dyn RulingCollector>,
    embedder: Box<dyn Embedder>,
    cache_ttl_seconds: u64,
    top_k: usize,
    retry: RetryPolicy,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RetrievalEngine {
    /// Open the engine with the default deterministic hash embedder.
    pub async fn open(
        config: &Config,
        collector: Arc<dyn RulingCollector>,
    ) -> anyhow::Result<Self> {
        let embedder = Box::new(HashEmbedder::new(config.embedding.dimension));
        Self::open_with_embedder(config, collector, embedder).await
    }

    /// Open the engine with a caller-supplied embedding strategy.
    ///
    /// The embedder's dimension must match the index's recorded dimension;
    /// a disagreement fails here rather than corrupting the index later.
    pub async fn open_with_embedder(
        config: &Config,
        collector: Arc<dyn RulingCollector>,
        embedder: Box<dyn Embedder>,
    ) -> anyhow::Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        migrate::run_migrations(&pool).await?;
        let index = VectorIndex::open(pool.clone(), embedder.dimension(), embedder.as_ref()).await?;
        let cache = RulingCache::new(pool);

        Ok(RetrievalEngine {
            index,
            cache,
            collector,
            embedder,
            cache_ttl_seconds: config.cache.ttl_seconds,
            top_k: config.retrieval.top_k,
            retry: RetryPolicy {
                max_attempts: config.retry.max_attempts,
                backoff: Duration::from_secs(config.retry.backoff_seconds),
            },
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Run one retrieval query through the full state machine.
    pub async fn retrieve(&self, query: &RulingQuery) -> Result<RetrievalResult, RetrievalError> {
        let key = cache_key(&query.hs_code, query.product_context.as_deref());

        // A fresh cache hit skips collection entirely.
        if let Some(ids) = self.cache.get(&key).await? {
            let documents = self.index.get_documents(&ids).await?;
            return self.assemble(query, documents, false, RetrievalSource::Cache).await;
        }

        // Miss path is single-flight per key.
        let key_lock = self.key_lock(&key).await;
        let result = {
            let _held = key_lock.lock().await;
            self.resolve_miss(query, &key).await
        };
        self.release_key(&key, key_lock).await;
        result
    }

    /// The miss path, run while holding the per-key lock.
    async fn resolve_miss(
        &self,
        query: &RulingQuery,
        key: &str,
    ) -> Result<RetrievalResult, RetrievalError> {
        // Losers of the race find the winner's entry here.
        if let Some(ids) = self.cache.get(key).await? {
            let documents = self.index.get_documents(&ids).await?;
            return self.assemble(query, documents, false, RetrievalSource::Cache).await;
        }

        match self
            .collect_with_retry(&query.hs_code, query.product_context.as_deref())
            .await
        {
            Ok(documents) => {
                // Index: embed and upsert each fresh ruling, then cache the
                // id set under a fresh TTL.
                for document in &documents {
                    let vector = self.embedder.embed(&document.body_text);
                    self.index.upsert(document, &vector).await?;
                }
                let ids: Vec<String> = documents.iter().map(|d| d.id.clone()).collect();
                self.cache.put(key, &ids, self.cache_ttl_seconds).await?;
                self.assemble(query, documents, false, RetrievalSource::Collector)
                    .await
            }
            Err(error) => self.fallback(query, key, error).await,
        }
    }

    /// Semantic neighbor lookup against the index alone, with documents
    /// resolved. Used by the search command and by callers that want raw
    /// similarity ranking without the collection flow.
    pub async fn search_neighbors(
        &self,
        text: &str,
        k: usize,
    ) -> Result<Vec<(RulingDocument, f32)>, RetrievalError> {
        let query_vector = self.embedder.embed(text);
        let neighbors = self.index.search(&query_vector, k).await?;
        self.resolve_neighbors(&neighbors).await
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn cache(&self) -> &RulingCache {
        &self.cache
    }

    async fn collect_with_retry(
        &self,
        hs_code: &str,
        hints: Option<&str>,
    ) -> Result<Vec<RulingDocument>, CollectionError> {
        let mut last_error = None;

        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                let delay = self.retry.backoff * 2u32.pow(attempt - 1);
                tokio::time::sleep(delay).await;
            }

            match self.collector.collect(hs_code, hints).await {
                Ok(documents) => return Ok(documents),
                Err(error) => {
                    if RetryPolicy::should_retry(&error) && attempt + 1 < self.retry.max_attempts {
                        warn!(hs_code, %error, attempt, "collection failed, retrying");
                        last_error = Some(error);
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| CollectionError::NoResults(hs_code.to_string())))
    }

    /// Fallback order: stale cache, then index neighbors, then failure.
    async fn fallback(
        &self,
        query: &RulingQuery,
        key: &str,
        error: CollectionError,
    ) -> Result<RetrievalResult, RetrievalError> {
        warn!(key, %error, "collection failed, evaluating fallback");

        if let Some(ids) = self.cache.get_stale(key).await? {
            let documents = self.index.get_documents(&ids).await?;
            if !documents.is_empty() {
                info!(key, "serving stale cache entry in degraded mode");
                return self.assemble(query, documents, true, RetrievalSource::Cache).await;
            }
        }

        let query_vector = self.embedder.embed(&query.embedding_text());
        let neighbors = self.index.search(&query_vector, self.top_k).await?;
        if !neighbors.is_empty() {
            info!(key, count = neighbors.len(), "serving index neighbors in degraded mode");
            let documents = self
                .resolve_neighbors(&neighbors)
                .await?
                .into_iter()
                .map(|(d, _)| d)
                .collect();
            return Ok(RetrievalResult {
                documents,
                degraded: true,
                source: RetrievalSource::IndexOnly,
            });
        }

        Err(RetrievalError::Collection(error))
    }

    /// Assemble the final result: primary documents first, then vector
    /// neighbors by descending similarity, deduplicated by id.
    async fn assemble(
        &self,
        query: &RulingQuery,
        primary: Vec<RulingDocument>,
        degraded: bool,
        source: RetrievalSource,
    ) -> Result<RetrievalResult, RetrievalError> {
        let query_vector = self.embedder.embed(&query.embedding_text());
        let neighbors = self.index.search(&query_vector, self.top_k).await?;

        let mut seen: std::collections::HashSet<String> =
            primary.iter().map(|d| d.id.clone()).collect();
        let mut documents = primary;

        for (document, _) in self.resolve_neighbors(&neighbors).await? {
            if seen.insert(document.id.clone()) {
                documents.push(document);
            }
        }

        debug!(%source, degraded, count = documents.len(), "assembled retrieval result");
        Ok(RetrievalResult {
            documents,
            degraded,
            source,
        })
    }

    async fn resolve_neighbors(
        &self,
        neighbors: &[Neighbor],
    ) -> Result<Vec<(RulingDocument, f32)>, RetrievalError> {
        let ids: Vec<String> = neighbors.iter().map(|n| n.document_id.clone()).collect();
        // Join by id: a neighbor whose metadata row is gone is dropped
        // without shifting the scores of the rest.
        let mut by_id: HashMap<String, RulingDocument> = self
            .index
            .get_documents(&ids)
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        Ok(neighbors
            .iter()
            .filter_map(|n| by_id.remove(&n.document_id).map(|d| (d, n.similarity)))
            .collect())
    }

    async fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut map = self.inflight.lock().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the per-key lock entry once no other query holds a clone, so
    /// the map stays bounded by in-flight keys rather than all keys ever
    /// seen.
    async fn release_key(&self, key: &str, lock: Arc<Mutex<()>>) {
        let mut map = self.inflight.lock().await;
        drop(lock);
        if let Some(entry) = map.get(key) {
            if Arc::strong_count(entry) == 1 {
                map.remove(key);
            }
        }
    }
}
