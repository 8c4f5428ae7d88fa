use anyhow::Result;

use crate::config::Config;
use crate::source;

pub fn list_sources(config: &Config) -> Result<()> {
    println!("{:<12} {:<28} MESSAGES", "SOURCE", "STATUS");

    match &config.source.maildir {
        Some(maildir) => match source::count_messages(maildir) {
            Ok(count) => {
                println!("{:<12} {:<28} {}", "maildir", "OK", count);
            }
            Err(e) => {
                println!("{:<12} {:<28} -", "maildir", format!("UNHEALTHY ({e})"));
            }
        },
        None => {
            println!("{:<12} {:<28} -", "maildir", "NOT CONFIGURED");
        }
    }

    Ok(())
}
