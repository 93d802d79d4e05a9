//! Durable vector index over ruling embeddings.
//!
//! The index keeps two stores in lockstep inside one SQLite database: the
//! `embeddings` table (vector store) and the `documents` table (metadata
//! store). Every vector has exactly one metadata row and vice versa; both
//! are written in a single transaction so a crash can never leave one
//! without the other. On open, a repair pass restores the pairing if a
//! previous process died between schema states (e.g. a partially migrated
//! database from an older version).
//!
//! Search is exact nearest-neighbor: all vectors are scored with inner
//! product against the query and ranked descending, ties broken by
//! insertion order (earlier-inserted document ranks higher).

use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::embedding::{self, Embedder};
use crate::error::RetrievalError;
use crate::models::{Neighbor, RulingDocument};

/// Index size and shape, as reported by `stats()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStats {
    pub count: u64,
    pub dimension: usize,
}

/// SQLite-backed vector index with a parallel metadata store.
#[derive(Debug)]
pub struct VectorIndex {
    pool: SqlitePool,
    dimension: usize,
}

impl VectorIndex {
    /// Open the index, pinning its dimension and repairing any broken
    /// vector/metadata pairing left by a crash.
    ///
    /// The dimension is recorded in `index_meta` the first time an index
    /// is created; reopening with a different configured dimension is a
    /// [`RetrievalError::DimensionMismatch`] — an existing index is never
    /// silently reinterpreted.
    pub async fn open(
        pool: SqlitePool,
        dimension: usize,
        embedder: &dyn Embedder,
    ) -> Result<Self, RetrievalError> {
        let stored: Option<String> =
            sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dimension'")
                .fetch_optional(&pool)
                .await?;

        match stored.and_then(|s| s.parse::<usize>().ok()) {
            Some(existing) if existing != dimension => {
                return Err(RetrievalError::DimensionMismatch {
                    expected: existing,
                    got: dimension,
                });
            }
            Some(_) => {}
            None => {
                sqlx::query(
                    "INSERT INTO index_meta (key, value) VALUES ('dimension', ?)
                     ON CONFLICT(key) DO NOTHING",
                )
                .bind(dimension.to_string())
                .execute(&pool)
                .await?;
            }
        }

        let index = VectorIndex { pool, dimension };
        index.repair(embedder).await?;
        Ok(index)
    }

    /// Restore the 1:1 vector/metadata invariant.
    ///
    /// Orphan vectors (no document row) are deleted; documents without a
    /// vector are re-embedded. Embedding is deterministic, so re-embedding
    /// reproduces exactly what the lost write would have stored.
    async fn repair(&self, embedder: &dyn Embedder) -> Result<(), RetrievalError> {
        let orphan_vectors = sqlx::query(
            "DELETE FROM embeddings WHERE document_id NOT IN (SELECT id FROM documents)",
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        if orphan_vectors > 0 {
            warn!(orphan_vectors, "deleted vectors with no metadata row");
        }

        let unembedded = sqlx::query(
            "SELECT id, body_text FROM documents
             WHERE id NOT IN (SELECT document_id FROM embeddings)",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &unembedded {
            let id: String = row.get("id");
            let body: String = row.get("body_text");
            let vector = embedder.embed(&body);
            if vector.len() != self.dimension {
                return Err(RetrievalError::IndexConsistency(format!(
                    "repair embedder produced dimension {} for index of dimension {}",
                    vector.len(),
                    self.dimension
                )));
            }
            self.insert_vector(&id, &vector).await?;
        }
        if !unembedded.is_empty() {
            info!(reembedded = unembedded.len(), "repaired documents missing vectors");
        }

        // Pairing must be exact after repair.
        let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        if docs != vectors {
            return Err(RetrievalError::IndexConsistency(format!(
                "{} documents vs {} vectors after repair",
                docs, vectors
            )));
        }

        Ok(())
    }

    /// Insert or replace a document and its vector in one transaction.
    ///
    /// Idempotent on the document id: re-inserting replaces the stored
    /// vector and metadata, keeping the original insertion position so
    /// tie-break ordering is stable.
    pub async fn upsert(
        &self,
        document: &RulingDocument,
        vector: &[f32],
    ) -> Result<(), RetrievalError> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                got: vector.len(),
            });
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, source_url, hs_code, title, body_text, published_date, collected_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_url = excluded.source_url,
                hs_code = excluded.hs_code,
                title = excluded.title,
                collected_at = excluded.collected_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.source_url)
        .bind(&document.hs_code)
        .bind(&document.title)
        .bind(&document.body_text)
        .bind(document.published_date.map(|d| d.format("%Y-%m-%d").to_string()))
        .bind(document.collected_at)
        .execute(&mut *tx)
        .await?;

        let next_position: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) + 1 FROM embeddings")
                .fetch_one(&mut *tx)
                .await?;

        sqlx::query(
            r#"
            INSERT INTO embeddings (document_id, embedding, dimension, position)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                embedding = excluded.embedding,
                dimension = excluded.dimension
            "#,
        )
        .bind(&document.id)
        .bind(embedding::vec_to_blob(vector))
        .bind(self.dimension as i64)
        .bind(next_position)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(id = %document.id, "upserted ruling into index");
        Ok(())
    }

    /// Top-k nearest neighbors by inner product, descending.
    ///
    /// An empty index yields an empty result, not an error.
    pub async fn search(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<Neighbor>, RetrievalError> {
        if query_vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                got: query_vector.len(),
            });
        }

        let rows = sqlx::query("SELECT document_id, embedding, position FROM embeddings")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(Neighbor, i64)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = embedding::blob_to_vec(&blob);
                let similarity = embedding::inner_product(query_vector, &vector);
                let position: i64 = row.get("position");
                (
                    Neighbor {
                        document_id: row.get("document_id"),
                        similarity,
                    },
                    position,
                )
            })
            .collect();

        // Descending score; earlier insertion wins ties.
        scored.sort_by(|a, b| {
            b.0.similarity
                .partial_cmp(&a.0.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(n, _)| n).collect())
    }

    pub async fn stats(&self) -> Result<IndexStats, RetrievalError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        Ok(IndexStats {
            count: count as u64,
            dimension: self.dimension,
        })
    }

    /// Fetch full documents for the given ids, preserving input order.
    /// Ids with no metadata row are skipped.
    pub async fn get_documents(
        &self,
        ids: &[String],
    ) -> Result<Vec<RulingDocument>, RetrievalError> {
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                "SELECT id, source_url, hs_code, title, body_text, published_date, collected_at
                 FROM documents WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                documents.push(row_to_document(&row));
            }
        }
        Ok(documents)
    }

    /// Direct HS-code lookup in the metadata store, newest first.
    pub async fn find_by_hs_code(
        &self,
        hs_code: &str,
        limit: usize,
    ) -> Result<Vec<RulingDocument>, RetrievalError> {
        let rows = sqlx::query(
            "SELECT id, source_url, hs_code, title, body_text, published_date, collected_at
             FROM documents WHERE hs_code = ? ORDER BY collected_at DESC, id ASC LIMIT ?",
        )
        .bind(hs_code)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    /// Per-HS-code document counts, most populous first.
    pub async fn hs_code_distribution(&self) -> Result<Vec<(String, i64)>, RetrievalError> {
        let rows = sqlx::query(
            "SELECT hs_code, COUNT(*) AS n FROM documents GROUP BY hs_code ORDER BY n DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("hs_code"), row.get("n")))
            .collect())
    }

    /// Raw vector insert used by the repair pass (document row exists).
    async fn insert_vector(&self, document_id: &str, vector: &[f32]) -> Result<(), RetrievalError> {
        let next_position: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) + 1 FROM embeddings")
                .fetch_one(&self.pool)
                .await?;
        sqlx::query(
            "INSERT INTO embeddings (document_id, embedding, dimension, position)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(document_id) DO UPDATE SET embedding = excluded.embedding",
        )
        .bind(document_id)
        .bind(embedding::vec_to_blob(vector))
        .bind(self.dimension as i64)
        .bind(next_position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> RulingDocument {
    let published: Option<String> = row.get("published_date");
    RulingDocument {
        id: row.get("id"),
        source_url: row.get("source_url"),
        hs_code: row.get("hs_code"),
        title: row.get("title"),
        body_text: row.get("body_text"),
        published_date: published
            .and_then(|d| chrono::NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        collected_at: row.get("collected_at"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::migrate;

    async fn open_test_index(dir: &tempfile::TempDir, dimension: usize) -> VectorIndex {
        let pool = crate::db::connect(&dir.path().join("index.sqlite"))
            .await
            .unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let embedder = HashEmbedder::new(dimension);
        VectorIndex::open(pool, dimension, &embedder).await.unwrap()
    }

    fn doc(hs_code: &str, body: &str) -> RulingDocument {
        RulingDocument::new(
            format!("https://rulings.cbp.gov/ruling/{}", &crate::models::content_hash(body)[..8]),
            hs_code.to_string(),
            "test ruling".to_string(),
            body.to_string(),
            None,
        )
    }

    #[tokio::test]
    async fn test_upsert_idempotent_on_id() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_test_index(&dir, 64).await;
        let embedder = HashEmbedder::new(64);

        let d = doc("8518.22.00", "multiple loudspeakers in one enclosure");
        let v = embedder.embed(&d.body_text);
        index.upsert(&d, &v).await.unwrap();
        index.upsert(&d, &v).await.unwrap();

        assert_eq!(index.stats().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_leaves_index_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_test_index(&dir, 64).await;
        let embedder = HashEmbedder::new(64);

        let d = doc("8518.22.00", "speakers ruling body");
        index.upsert(&d, &embedder.embed(&d.body_text)).await.unwrap();

        let bad = doc("8518.22.00", "other ruling body");
        let err = index.upsert(&bad, &vec![0.5f32; 32]).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::DimensionMismatch { expected: 64, got: 32 }
        ));
        assert_eq!(index.stats().await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_search_empty_index_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_test_index(&dir, 64).await;
        let neighbors = index.search(&vec![0.0f32; 64], 5).await.unwrap();
        assert!(neighbors.is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_test_index(&dir, 256).await;
        let embedder = HashEmbedder::new(256);

        let close = doc("8518.22.00", "wireless speakers classification 8518.22.00");
        let far = doc("0306.17.00", "frozen shrimp seafood import entry");
        index.upsert(&close, &embedder.embed(&close.body_text)).await.unwrap();
        index.upsert(&far, &embedder.embed(&far.body_text)).await.unwrap();

        let query = embedder.embed("portable wireless speakers 8518.22.00");
        let neighbors = index.search(&query, 2).await.unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].document_id, close.id);
        assert!(neighbors[0].similarity >= neighbors[1].similarity);
    }

    #[tokio::test]
    async fn test_search_tie_break_by_insertion_order() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_test_index(&dir, 64).await;

        // Identical vectors, distinct documents: scores tie exactly.
        let first = doc("9018.90.00", "surgical instrument ruling alpha");
        let second = doc("9018.90.00", "surgical instrument ruling beta");
        let v = HashEmbedder::new(64).embed("surgical instruments");
        index.upsert(&first, &v).await.unwrap();
        index.upsert(&second, &v).await.unwrap();

        let neighbors = index.search(&v, 2).await.unwrap();
        assert_eq!(neighbors[0].document_id, first.id);
        assert_eq!(neighbors[1].document_id, second.id);
    }

    #[tokio::test]
    async fn test_reopen_with_different_dimension_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite");
        {
            let pool = crate::db::connect(&path).await.unwrap();
            migrate::run_migrations(&pool).await.unwrap();
            let embedder = HashEmbedder::new(256);
            VectorIndex::open(pool, 256, &embedder).await.unwrap();
        }
        let pool = crate::db::connect(&path).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let embedder = HashEmbedder::new(128);
        let err = VectorIndex::open(pool, 128, &embedder).await.unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::DimensionMismatch { expected: 256, got: 128 }
        ));
    }

    #[tokio::test]
    async fn test_repair_restores_pairing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.sqlite");
        let embedder = HashEmbedder::new(64);

        let pool = crate::db::connect(&path).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let index = VectorIndex::open(pool.clone(), 64, &embedder).await.unwrap();

        let d = doc("3304.99.50.00", "skin care preparation ruling");
        index.upsert(&d, &embedder.embed(&d.body_text)).await.unwrap();

        // Simulate a crash artifact: a vector with no metadata row, and a
        // document with no vector.
        sqlx::query("INSERT INTO embeddings (document_id, embedding, dimension, position) VALUES ('deadbeef', x'00000000', 64, 99)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM embeddings WHERE document_id = ?")
            .bind(&d.id)
            .execute(&pool)
            .await
            .unwrap();

        let reopened = VectorIndex::open(pool, 64, &embedder).await.unwrap();
        let stats = reopened.stats().await.unwrap();
        assert_eq!(stats.count, 1);

        // Re-embedded vector is searchable again.
        let neighbors = reopened
            .search(&embedder.embed(&d.body_text), 1)
            .await
            .unwrap();
        assert_eq!(neighbors[0].document_id, d.id);
    }

    #[tokio::test]
    async fn test_find_by_hs_code() {
        let dir = tempfile::tempdir().unwrap();
        let index = open_test_index(&dir, 64).await;
        let embedder = HashEmbedder::new(64);

        let a = doc("8518.22.00", "speakers ruling one");
        let b = doc("8518.22.00", "speakers ruling two");
        let c = doc("3304.99.50.00", "cosmetics ruling");
        for d in [&a, &b, &c] {
            index.upsert(d, &embedder.embed(&d.body_text)).await.unwrap();
        }

        let hits = index.find_by_hs_code("8518.22.00", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|d| d.hs_code == "8518.22.00"));
    }
}
