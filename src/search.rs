//! CLI search over the receipt index.

use anyhow::{bail, Result};
use chrono::NaiveDate;

use crate::config::Config;
use crate::db;
use crate::models::{format_amount, parse_amount};
use crate::repo::{search_receipts, SearchFilter};

/// Parse CLI search arguments into a [`SearchFilter`].
pub fn build_filter(
    vendor: Option<String>,
    amount_min: Option<String>,
    amount_max: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
) -> Result<SearchFilter> {
    Ok(SearchFilter {
        vendor: vendor.filter(|v| !v.trim().is_empty()),
        amount_min_cents: parse_amount_arg(amount_min.as_deref())?,
        amount_max_cents: parse_amount_arg(amount_max.as_deref())?,
        date_from: parse_date_arg(date_from.as_deref())?,
        date_to: parse_date_arg(date_to.as_deref())?,
    })
}

fn parse_amount_arg(arg: Option<&str>) -> Result<Option<i64>> {
    match arg {
        None => Ok(None),
        Some(s) => match parse_amount(s) {
            Some(cents) => Ok(Some(cents)),
            None => bail!("invalid amount: {s:?} (expected e.g. 12.50)"),
        },
    }
}

fn parse_date_arg(arg: Option<&str>) -> Result<Option<NaiveDate>> {
    match arg {
        None => Ok(None),
        Some(s) => Ok(Some(
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| anyhow::anyhow!("invalid date {s:?} (expected YYYY-MM-DD): {e}"))?,
        )),
    }
}

pub async fn run_search(
    config: &Config,
    vendor: Option<String>,
    amount_min: Option<String>,
    amount_max: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let filter = build_filter(vendor, amount_min, amount_max, date_from, date_to)?;

    let pool = db::connect(config).await?;
    let mut results = search_receipts(&pool, &filter).await?;

    if let Some(limit) = limit {
        results.truncate(limit);
    }

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, receipt) in results.iter().enumerate() {
        println!(
            "{}. {}  {}  {} {}  [{:.2}]",
            i + 1,
            receipt.transaction_date.format("%Y-%m-%d"),
            receipt.vendor,
            format_amount(receipt.amount_cents),
            receipt.currency,
            receipt.confidence,
        );
        if let Some(ref description) = receipt.description {
            println!("    {}", description);
        }
        println!("    pdf: {}", receipt.pdf_path);
        println!("    id: {}", receipt.id);
        println!();
    }

    pool.close().await;
    Ok(())
}
