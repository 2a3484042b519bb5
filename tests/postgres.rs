//! Record store against a real PostgreSQL.
//!
//! Gated behind `E2E_ENABLED` and needs `DATABASE_URL`. Each test works in its
//! own table and drops it afterwards.
//!
//! Run with:
//!   E2E_ENABLED=1 DATABASE_URL=postgres://localhost/ingest cargo test --test postgres

use pdf_ingest::{DatabaseUrl, NewRecord, PersistOutcome, PgRecordStore, RecordStore};
use serde_json::json;

/// Skip unless E2E_ENABLED and DATABASE_URL are set; yields the URL.
macro_rules! database_url_or_skip {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run postgres tests");
            return;
        }
        match std::env::var("DATABASE_URL") {
            Ok(url) if url.starts_with("postgres") => url,
            _ => {
                println!("SKIP — DATABASE_URL does not name a PostgreSQL database");
                return;
            }
        }
    }};
}

fn record(key: &str, sha: &str) -> NewRecord {
    NewRecord {
        filename: key.into(),
        text: "Jane Doe...".into(),
        metadata: json!({"pages": 2}),
        content_sha256: sha.into(),
    }
}

async fn count(pool: &sqlx::PgPool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn repeated_append_keeps_one_row() {
    let url = database_url_or_skip!();
    let table = format!("ingest_dedup_{}", std::process::id());
    let store = PgRecordStore::new(DatabaseUrl::Explicit(url.clone()), table.clone(), 2);
    let pool = sqlx::PgPool::connect(&url).await.unwrap();

    store.ensure_schema().await.unwrap();
    store.ensure_schema().await.unwrap();

    let first = store.append(&record("raw/cv42.pdf", "ab12")).await.unwrap();
    let second = store.append(&record("raw/cv42.pdf", "ab12")).await.unwrap();

    assert!(matches!(first, PersistOutcome::Inserted(_)), "{first:?}");
    assert!(matches!(second, PersistOutcome::Existing(_)), "{second:?}");
    assert_eq!(first.record().id, second.record().id);
    assert_eq!(second.record().text, "Jane Doe...");
    assert_eq!(second.record().metadata, json!({"pages": 2}));
    assert_eq!(count(&pool, &table).await, 1);

    let changed = store.append(&record("raw/cv42.pdf", "cd34")).await.unwrap();
    assert!(changed.is_new());
    assert_eq!(count(&pool, &table).await, 2);

    sqlx::query(&format!("DROP TABLE {table}"))
        .execute(&pool)
        .await
        .unwrap();
}
