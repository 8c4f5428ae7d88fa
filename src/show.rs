//! Single receipt display by id.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::models::format_amount;
use crate::repo::get_receipt;
use crate::store::{FileStore, LocalFileStore};

pub async fn run_show(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let receipt = get_receipt(&pool, id).await?;
    pool.close().await;

    let Some(receipt) = receipt else {
        anyhow::bail!("receipt not found: {id}");
    };

    let store = LocalFileStore::new(config.store.root.clone());
    let absolute = store.get_path(&receipt.pdf_path);

    println!("--- Receipt ---");
    println!("id:            {}", receipt.id);
    println!("vendor:        {}", receipt.vendor);
    println!(
        "amount:        {} {}",
        format_amount(receipt.amount_cents),
        receipt.currency
    );
    println!("date:          {}", receipt.transaction_date.format("%Y-%m-%d"));
    if let Some(ref description) = receipt.description {
        println!("description:   {}", description);
    }
    println!("confidence:    {:.2}", receipt.confidence);
    println!();

    println!("--- Provenance ---");
    println!("source:        {}", receipt.source_type);
    println!("source_id:     {}", receipt.source_id);
    if let Some(ref subject) = receipt.email_subject {
        println!("subject:       {}", subject);
    }
    if let Some(ref sender) = receipt.email_sender {
        println!("sender:        {}", sender);
    }
    if let Some(date) = receipt.email_date {
        println!("email date:    {}", date.format("%Y-%m-%dT%H:%M:%SZ"));
    }
    println!("indexed at:    {}", receipt.created_at.format("%Y-%m-%dT%H:%M:%SZ"));
    if receipt.updated_at != receipt.created_at {
        println!("corrected at:  {}", receipt.updated_at.format("%Y-%m-%dT%H:%M:%SZ"));
    }
    println!();

    println!("--- Document ---");
    println!("pdf:           {}", receipt.pdf_path);
    println!("location:      {}", absolute.display());
    if !store.exists(&receipt.pdf_path) {
        println!("warning:       file is missing from the store");
    }

    Ok(())
}
