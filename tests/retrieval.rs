//! End-to-end retrieval scenarios through the public API.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use precedent_harness::collector::RulingCollector;
use precedent_harness::config::Config;
use precedent_harness::error::CollectionError;
use precedent_harness::models::{RetrievalSource, RulingDocument, RulingQuery};
use precedent_harness::retrieve::RetrievalEngine;

struct ScriptedCollector {
    documents: Vec<RulingDocument>,
    fail: bool,
    calls: AtomicUsize,
}

impl ScriptedCollector {
    fn returning(documents: Vec<RulingDocument>) -> Self {
        ScriptedCollector {
            documents,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        ScriptedCollector {
            documents: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RulingCollector for ScriptedCollector {
    async fn collect(
        &self,
        hs_code: &str,
        _query_hints: Option<&str>,
    ) -> Result<Vec<RulingDocument>, CollectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CollectionError::Transport("source unreachable".into()));
        }
        if self.documents.is_empty() {
            return Err(CollectionError::NoResults(hs_code.to_string()));
        }
        Ok(self.documents.clone())
    }
}

fn ruling(hs_code: &str, title: &str, body: &str) -> RulingDocument {
    RulingDocument::new(
        format!("https://rulings.cbp.gov/ruling/{}", title),
        hs_code.to_string(),
        title.to_string(),
        body.to_string(),
        None,
    )
}

fn config_in(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::with_db_path(dir.path().join("precedents.sqlite"));
    config.embedding.dimension = 128;
    config
}

#[tokio::test]
async fn collector_result_is_indexed_cached_and_reused() {
    let dir = tempfile::tempdir().unwrap();
    let collector = Arc::new(ScriptedCollector::returning(vec![
        ruling(
            "3304.99.50.00",
            "N301234",
            "The skin care preparation is classified in subheading 3304.99.50.00",
        ),
        ruling(
            "3304.99.50.00",
            "H287654",
            "Beauty preparations for skin care fall under heading 3304",
        ),
    ]));
    let engine = RetrievalEngine::open(&config_in(&dir), collector.clone())
        .await
        .unwrap();

    let before = engine.index().stats().await.unwrap().count;
    let query = RulingQuery::new("3304.99.50.00");

    let first = engine.retrieve(&query).await.unwrap();
    assert_eq!(first.source, RetrievalSource::Collector);
    assert!(!first.degraded);
    assert_eq!(first.documents.len(), 2);

    // Both documents landed in the index.
    let stats = engine.index().stats().await.unwrap();
    assert_eq!(stats.count, before + 2);
    for doc in &first.documents {
        let found = engine.index().get_documents(&[doc.id.clone()]).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    // Within TTL, the identical query is served from cache, no collector call.
    let second = engine.retrieve(&query).await.unwrap();
    assert_eq!(second.source, RetrievalSource::Cache);
    assert_eq!(collector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_collection_falls_back_to_index_neighbors() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);

    // Pre-populate the index with 3 rulings for the code.
    {
        let seed = Arc::new(ScriptedCollector::returning(vec![
            ruling("8518.22.00", "N256328", "Multiple loudspeakers 8518.22.00 ruling one"),
            ruling("8518.22.00", "N260114", "Multiple loudspeakers 8518.22.00 ruling two"),
            ruling("8518.22.00", "H299017", "Multiple loudspeakers 8518.22.00 ruling three"),
        ]));
        let engine = RetrievalEngine::open(&config, seed).await.unwrap();
        engine
            .retrieve(&RulingQuery::new("8518.22.00"))
            .await
            .unwrap();
    }

    // New engine over the same database; a query under a different cache
    // key with a failing collector has only the index to lean on.
    let engine = RetrievalEngine::open(&config, Arc::new(ScriptedCollector::failing()))
        .await
        .unwrap();
    let result = engine
        .retrieve(&RulingQuery::new("8518.22.00").with_product("powered bookshelf speakers"))
        .await
        .unwrap();

    assert!(result.degraded);
    assert_eq!(result.source, RetrievalSource::IndexOnly);
    assert_eq!(result.documents.len(), 3);
}

#[tokio::test]
async fn no_fallback_data_surfaces_collection_error() {
    let dir = tempfile::tempdir().unwrap();
    let engine = RetrievalEngine::open(&config_in(&dir), Arc::new(ScriptedCollector::failing()))
        .await
        .unwrap();

    let err = engine
        .retrieve(&RulingQuery::new("0101.21.00"))
        .await
        .unwrap_err();
    assert!(err.is_recoverable(), "collection errors carry the fallback flag");
    assert!(err.to_string().contains("unreachable"));
}

#[tokio::test]
async fn index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(&dir);
    let doc = ruling(
        "9018.90.00",
        "N312876",
        "Surgical instruments classified in 9018.90.00",
    );

    {
        let engine = RetrievalEngine::open(
            &config,
            Arc::new(ScriptedCollector::returning(vec![doc.clone()])),
        )
        .await
        .unwrap();
        engine
            .retrieve(&RulingQuery::new("9018.90.00"))
            .await
            .unwrap();
    }

    // Fresh process: the index and metadata reopen as a consistent pair.
    let engine = RetrievalEngine::open(&config, Arc::new(ScriptedCollector::failing()))
        .await
        .unwrap();
    assert_eq!(engine.index().stats().await.unwrap().count, 1);

    let hits = engine
        .search_neighbors("surgical instruments 9018.90.00", 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].0.id, doc.id);
}
