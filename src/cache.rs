//! TTL-bounded ruling cache.
//!
//! Maps a normalized query key to the ids of previously collected rulings.
//! Entries are replaced wholesale on `put` and expire lazily by wall-clock
//! comparison at read time — there is no background sweep. The cache is a
//! pure optimization, never a source of truth: an unreadable entry is
//! treated as a miss and removed, not surfaced to the caller.

use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::error::RetrievalError;

/// A cache row, pre-expiry-check. `document_ids` preserves collection order.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub document_ids: Vec<String>,
    pub stored_at: i64,
    pub ttl_seconds: u64,
}

impl CacheEntry {
    pub fn is_expired_at(&self, now: i64) -> bool {
        now - self.stored_at > self.ttl_seconds as i64
    }
}

/// Derive the cache key from the normalized HS code and optional product
/// qualifier. The same logical query always normalizes to the same key.
pub fn cache_key(hs_code: &str, product_context: Option<&str>) -> String {
    let code = normalize_hs_code(hs_code);
    match product_context {
        Some(ctx) if !ctx.trim().is_empty() => {
            format!("{}|product={}", code, ctx.trim().to_lowercase())
        }
        _ => code,
    }
}

/// HS codes are digits and group separators; everything else is noise.
pub fn normalize_hs_code(hs_code: &str) -> String {
    hs_code
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect()
}

pub struct RulingCache {
    pool: SqlitePool,
}

impl RulingCache {
    pub fn new(pool: SqlitePool) -> Self {
        RulingCache { pool }
    }

    /// Fresh lookup: `None` when no entry exists or the entry has passed
    /// its TTL. Expired entries are left in place so they remain available
    /// to [`get_stale`](Self::get_stale) for degraded-mode fallback.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<String>>, RetrievalError> {
        match self.read_entry(key).await? {
            Some(entry) if !entry.is_expired_at(chrono::Utc::now().timestamp()) => {
                debug!(key, "cache hit");
                Ok(Some(entry.document_ids))
            }
            Some(_) => {
                debug!(key, "cache entry expired, treated as miss");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Stale lookup, used only when collection fails: returns the entry
    /// regardless of expiry.
    pub async fn get_stale(&self, key: &str) -> Result<Option<Vec<String>>, RetrievalError> {
        Ok(self.read_entry(key).await?.map(|e| e.document_ids))
    }

    /// Fully replace any prior entry for the key. No merge semantics.
    pub async fn put(
        &self,
        key: &str,
        document_ids: &[String],
        ttl_seconds: u64,
    ) -> Result<(), RetrievalError> {
        let ids_json = serde_json::to_string(document_ids)
            .expect("Vec<String> serializes to JSON");
        sqlx::query(
            r#"
            INSERT INTO ruling_cache (key, document_ids, stored_at, ttl_seconds)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                document_ids = excluded.document_ids,
                stored_at = excluded.stored_at,
                ttl_seconds = excluded.ttl_seconds
            "#,
        )
        .bind(key)
        .bind(ids_json)
        .bind(chrono::Utc::now().timestamp())
        .bind(ttl_seconds as i64)
        .execute(&self.pool)
        .await?;
        debug!(key, count = document_ids.len(), "cached collection result");
        Ok(())
    }

    /// Counts of valid vs expired entries, for the stats command.
    pub async fn stats(&self) -> Result<(u64, u64), RetrievalError> {
        let now = chrono::Utc::now().timestamp();
        let rows = sqlx::query("SELECT stored_at, ttl_seconds FROM ruling_cache")
            .fetch_all(&self.pool)
            .await?;
        let mut valid = 0u64;
        let mut expired = 0u64;
        for row in &rows {
            let stored_at: i64 = row.get("stored_at");
            let ttl: i64 = row.get("ttl_seconds");
            if now - stored_at > ttl {
                expired += 1;
            } else {
                valid += 1;
            }
        }
        Ok((valid, expired))
    }

    async fn read_entry(&self, key: &str) -> Result<Option<CacheEntry>, RetrievalError> {
        let row = sqlx::query(
            "SELECT document_ids, stored_at, ttl_seconds FROM ruling_cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let ids_json: String = row.get("document_ids");
        match serde_json::from_str::<Vec<String>>(&ids_json) {
            Ok(document_ids) => Ok(Some(CacheEntry {
                document_ids,
                stored_at: row.get("stored_at"),
                ttl_seconds: row.get::<i64, _>("ttl_seconds").max(0) as u64,
            })),
            Err(err) => {
                // Self-heal: drop the unreadable row and report a miss.
                warn!(key, %err, "corrupt cache entry, discarding");
                sqlx::query("DELETE FROM ruling_cache WHERE key = ?")
                    .bind(key)
                    .execute(&self.pool)
                    .await?;
                Ok(None)
            }
        }
    }

    #[cfg(test)]
    pub async fn put_at(
        &self,
        key: &str,
        document_ids: &[String],
        ttl_seconds: u64,
        stored_at: i64,
    ) -> Result<(), RetrievalError> {
        let ids_json = serde_json::to_string(document_ids).unwrap();
        sqlx::query(
            "INSERT INTO ruling_cache (key, document_ids, stored_at, ttl_seconds)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                document_ids = excluded.document_ids,
                stored_at = excluded.stored_at,
                ttl_seconds = excluded.ttl_seconds",
        )
        .bind(key)
        .bind(ids_json)
        .bind(stored_at)
        .bind(ttl_seconds as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
