use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Receipts table. source_id is the idempotency key: the UNIQUE
    // constraint is the authoritative at-most-once guard, regardless of any
    // pre-filtering done by source adapters. transaction_date is stored as
    // ISO text so lexicographic order is chronological order.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS receipts (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL UNIQUE,
            source_type TEXT NOT NULL,
            vendor TEXT NOT NULL,
            amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
            currency TEXT NOT NULL DEFAULT 'USD',
            transaction_date TEXT NOT NULL,
            description TEXT,
            confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
            pdf_path TEXT NOT NULL,
            email_subject TEXT,
            email_sender TEXT,
            email_date INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_receipts_vendor ON receipts(vendor)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_receipts_transaction_date ON receipts(transaction_date DESC)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
