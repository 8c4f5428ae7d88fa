//! Repository search semantics: filters, inclusivity, and result ordering.

use chrono::NaiveDate;
use tempfile::TempDir;

use receipt_index::config::{
    Config, DbConfig, ExtractionConfig, RenderConfig, SourceConfig, StoreConfig,
};
use receipt_index::db;
use receipt_index::migrate;
use receipt_index::models::{ExtractedMetadata, NewReceipt};
use receipt_index::repo::{insert_receipt, search_receipts, RepoError, SearchFilter};

fn test_config(tmp: &TempDir) -> Config {
    Config {
        db: DbConfig {
            path: tmp.path().join("receipts.db"),
        },
        store: StoreConfig {
            root: tmp.path().join("receipts"),
        },
        source: SourceConfig::default(),
        extraction: ExtractionConfig {
            endpoint: "http://localhost:11434".to_string(),
            model: "test".to_string(),
            timeout_secs: 5,
            max_retries: 0,
            review_threshold: 0.5,
            max_attachment_chars: 4000,
        },
        render: RenderConfig::default(),
    }
}

async fn seeded_pool(tmp: &TempDir, rows: &[(&str, &str, i64, &str)]) -> sqlx::SqlitePool {
    let config = test_config(tmp);
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect(&config).await.unwrap();

    for (source_id, vendor, amount_cents, date) in rows {
        insert_receipt(&pool, &new_receipt(source_id, vendor, *amount_cents, date))
            .await
            .unwrap();
    }

    pool
}

fn new_receipt(source_id: &str, vendor: &str, amount_cents: i64, date: &str) -> NewReceipt {
    NewReceipt {
        source_id: source_id.to_string(),
        source_type: "maildir".to_string(),
        metadata: ExtractedMetadata {
            vendor: vendor.to_string(),
            amount_cents,
            currency: "USD".to_string(),
            transaction_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            description: None,
            confidence: 0.9,
        },
        pdf_path: format!("2025/03/{date}__{vendor}__x.pdf"),
        email_subject: Some("receipt".to_string()),
        email_sender: Some("billing@vendor.example".to_string()),
        email_date: None,
    }
}

const SEED: &[(&str, &str, i64, &str)] = &[
    ("s-1", "amazon", 1200, "2025-03-04"),
    ("s-2", "amazon-fresh", 4500, "2025-03-10"),
    ("s-3", "costco", 9900, "2025-02-01"),
];

fn vendors(receipts: &[receipt_index::models::Receipt]) -> Vec<&str> {
    receipts.iter().map(|r| r.vendor.as_str()).collect()
}

#[tokio::test]
async fn vendor_and_amount_filters_combine() {
    let tmp = TempDir::new().unwrap();
    let pool = seeded_pool(&tmp, SEED).await;

    let filter = SearchFilter {
        vendor: Some("amazon".to_string()),
        amount_min_cents: Some(1000),
        amount_max_cents: Some(5000),
        ..SearchFilter::default()
    };
    let results = search_receipts(&pool, &filter).await.unwrap();

    // Both amazon rows, most recent transaction first
    assert_eq!(vendors(&results), vec!["amazon-fresh", "amazon"]);
}

#[tokio::test]
async fn no_filters_returns_full_index_date_descending() {
    let tmp = TempDir::new().unwrap();
    let pool = seeded_pool(&tmp, SEED).await;

    let results = search_receipts(&pool, &SearchFilter::default()).await.unwrap();
    assert_eq!(vendors(&results), vec!["amazon-fresh", "amazon", "costco"]);
}

#[tokio::test]
async fn vendor_match_is_case_insensitive_substring() {
    let tmp = TempDir::new().unwrap();
    let pool = seeded_pool(&tmp, SEED).await;

    let filter = SearchFilter {
        vendor: Some("AMA".to_string()),
        ..SearchFilter::default()
    };
    let results = search_receipts(&pool, &filter).await.unwrap();
    assert_eq!(results.len(), 2);

    let filter = SearchFilter {
        vendor: Some("zon-fr".to_string()),
        ..SearchFilter::default()
    };
    let results = search_receipts(&pool, &filter).await.unwrap();
    assert_eq!(vendors(&results), vec!["amazon-fresh"]);
}

#[tokio::test]
async fn like_metacharacters_match_literally() {
    let tmp = TempDir::new().unwrap();
    let pool = seeded_pool(&tmp, &[("s-1", "50%_off outlet", 1000, "2025-03-01")]).await;

    let filter = SearchFilter {
        vendor: Some("50%_off".to_string()),
        ..SearchFilter::default()
    };
    assert_eq!(search_receipts(&pool, &filter).await.unwrap().len(), 1);

    // A literal % must not act as a wildcard
    let filter = SearchFilter {
        vendor: Some("5%t".to_string()),
        ..SearchFilter::default()
    };
    assert!(search_receipts(&pool, &filter).await.unwrap().is_empty());
}

#[tokio::test]
async fn amount_bounds_are_inclusive() {
    let tmp = TempDir::new().unwrap();
    let pool = seeded_pool(&tmp, SEED).await;

    let filter = SearchFilter {
        amount_min_cents: Some(1200),
        amount_max_cents: Some(1200),
        ..SearchFilter::default()
    };
    let results = search_receipts(&pool, &filter).await.unwrap();
    assert_eq!(vendors(&results), vec!["amazon"]);
}

#[tokio::test]
async fn date_bounds_are_inclusive_and_open_ended() {
    let tmp = TempDir::new().unwrap();
    let pool = seeded_pool(&tmp, SEED).await;

    let filter = SearchFilter {
        date_from: Some(NaiveDate::parse_from_str("2025-03-04", "%Y-%m-%d").unwrap()),
        date_to: Some(NaiveDate::parse_from_str("2025-03-10", "%Y-%m-%d").unwrap()),
        ..SearchFilter::default()
    };
    let results = search_receipts(&pool, &filter).await.unwrap();
    assert_eq!(vendors(&results), vec!["amazon-fresh", "amazon"]);

    // Only a lower bound: everything on or after it
    let filter = SearchFilter {
        date_from: Some(NaiveDate::parse_from_str("2025-03-05", "%Y-%m-%d").unwrap()),
        ..SearchFilter::default()
    };
    let results = search_receipts(&pool, &filter).await.unwrap();
    assert_eq!(vendors(&results), vec!["amazon-fresh"]);

    // Only an upper bound
    let filter = SearchFilter {
        date_to: Some(NaiveDate::parse_from_str("2025-02-28", "%Y-%m-%d").unwrap()),
        ..SearchFilter::default()
    };
    let results = search_receipts(&pool, &filter).await.unwrap();
    assert_eq!(vendors(&results), vec!["costco"]);
}

#[tokio::test]
async fn same_date_ties_break_by_insertion_order() {
    let tmp = TempDir::new().unwrap();
    let pool = seeded_pool(
        &tmp,
        &[
            ("s-1", "first-inserted", 1000, "2025-03-04"),
            ("s-2", "second-inserted", 2000, "2025-03-04"),
            ("s-3", "third-inserted", 3000, "2025-03-04"),
        ],
    )
    .await;

    let results = search_receipts(&pool, &SearchFilter::default()).await.unwrap();
    assert_eq!(
        vendors(&results),
        vec!["first-inserted", "second-inserted", "third-inserted"]
    );
}

#[tokio::test]
async fn duplicate_source_id_is_rejected_as_duplicate() {
    let tmp = TempDir::new().unwrap();
    let pool = seeded_pool(&tmp, &[("s-1", "amazon", 1200, "2025-03-04")]).await;

    let err = insert_receipt(&pool, &new_receipt("s-1", "amazon", 1200, "2025-03-04"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Duplicate));

    let results = search_receipts(&pool, &SearchFilter::default()).await.unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn inserted_fields_round_trip() {
    let tmp = TempDir::new().unwrap();
    let pool = seeded_pool(&tmp, &[]).await;

    let mut new = new_receipt("s-9", "Trader Joe's", 2345, "2025-01-31");
    new.metadata.description = Some("groceries".to_string());
    new.metadata.currency = "CAD".to_string();
    let inserted = insert_receipt(&pool, &new).await.unwrap();

    let found = receipt_index::repo::get_receipt(&pool, &inserted.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.vendor, "Trader Joe's");
    assert_eq!(found.amount_cents, 2345);
    assert_eq!(found.currency, "CAD");
    assert_eq!(found.description.as_deref(), Some("groceries"));
    assert_eq!(found.transaction_date.to_string(), "2025-01-31");
    assert_eq!(found.source_id, "s-9");
    assert_eq!(found.pdf_path, new.pdf_path);
}
