//! Database statistics and health overview.
//!
//! Quick summary of what the engine holds: indexed ruling counts, index
//! dimension, cache entry freshness, and the per-HS-code distribution.
//! Used by `pct stats` to confirm collection and indexing are working.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::migrate;

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let total_docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await?;
    let total_vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
        .fetch_one(&pool)
        .await?;
    let dimension: Option<String> =
        sqlx::query_scalar("SELECT value FROM index_meta WHERE key = 'dimension'")
            .fetch_optional(&pool)
            .await?;

    let now = chrono::Utc::now().timestamp();
    let cache_rows = sqlx::query("SELECT stored_at, ttl_seconds FROM ruling_cache")
        .fetch_all(&pool)
        .await?;
    let (mut cache_valid, mut cache_expired) = (0i64, 0i64);
    for row in &cache_rows {
        let stored_at: i64 = row.get("stored_at");
        let ttl: i64 = row.get("ttl_seconds");
        if now - stored_at > ttl {
            cache_expired += 1;
        } else {
            cache_valid += 1;
        }
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Precedent Harness — Database Stats");
    println!("==================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Rulings:     {}", total_docs);
    println!("  Vectors:     {}", total_vectors);
    println!(
        "  Dimension:   {}",
        dimension.as_deref().unwrap_or("(unset)")
    );
    println!(
        "  Cache:       {} valid / {} expired",
        cache_valid, cache_expired
    );

    // Per-HS-code breakdown
    let hs_rows = sqlx::query(
        "SELECT hs_code, COUNT(*) AS n FROM documents GROUP BY hs_code ORDER BY n DESC",
    )
    .fetch_all(&pool)
    .await?;

    if !hs_rows.is_empty() {
        println!();
        println!("  By HS code:");
        println!("  {:<20} {:>8}", "HS CODE", "RULINGS");
        println!("  {}", "-".repeat(30));
        for row in &hs_rows {
            let hs_code: String = row.get("hs_code");
            let n: i64 = row.get("n");
            println!("  {:<20} {:>8}", hs_code, n);
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
