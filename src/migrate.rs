use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Idempotent — safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Metadata store: one row per ruling, keyed by content hash.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source_url TEXT NOT NULL,
            hs_code TEXT NOT NULL,
            title TEXT NOT NULL,
            body_text TEXT NOT NULL,
            published_date TEXT,
            collected_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector store: 1:1 with documents. `position` is a monotonic
    // insertion counter used for deterministic tie-breaking. No foreign
    // key on document_id: the pairing is maintained by transactional
    // writes and the startup repair pass, which must be able to observe
    // orphan rows in either table.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            document_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            dimension INTEGER NOT NULL,
            position INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Index-level facts, e.g. the dimension fixed at creation time.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Query cache: replaced wholesale per key, expired lazily at read.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ruling_cache (
            key TEXT PRIMARY KEY,
            document_ids TEXT NOT NULL,
            stored_at INTEGER NOT NULL,
            ttl_seconds INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_hs_code ON documents(hs_code)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_position ON embeddings(position)")
        .execute(pool)
        .await?;

    Ok(())
}
