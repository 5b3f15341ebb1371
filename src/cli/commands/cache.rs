//! Cache command - inspect or clear the persistent bundle cache

use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::PrefetchResult;
use crate::host::disk::EntryMeta;
use crate::host::{CacheStorage, DiskCacheStorage};
use console::style;
use std::io::{self, Write};
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> PrefetchResult<()> {
    let storage = DiskCacheStorage::new(ConfigManager::cache_dir(config));
    debug!("Using cache store at {}", storage.root().display());

    match args.action {
        CacheAction::List { format } => list_entries(&storage, config, format).await,
        CacheAction::Clear { yes } => clear_cache(&storage, config, yes).await,
    }
}

async fn list_entries(
    storage: &DiskCacheStorage,
    config: &Config,
    format: OutputFormat,
) -> PrefetchResult<()> {
    let cache = storage.cache(&config.worker.cache_name).await?;
    let entries = cache.entries().await?;

    if entries.is_empty() {
        println!("No cached bundles.");
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(&entries),
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Plain => print_plain(&entries),
    }

    Ok(())
}

fn print_table(entries: &[EntryMeta]) {
    println!("{:<60} {:<6} {:<10} {:<20}", "URL", "STATUS", "SIZE", "STORED");
    println!("{}", "-".repeat(98));

    for entry in entries {
        let stored = entry.stored_at.format("%Y-%m-%d %H:%M").to_string();
        println!(
            "{:<60} {:<6} {:<10} {:<20}",
            entry.key,
            entry.status,
            format_bytes(entry.size_bytes),
            stored
        );
    }

    println!();
    println!("Total: {} bundle(s)", entries.len());
}

fn print_json(entries: &[EntryMeta]) -> PrefetchResult<()> {
    println!("{}", serde_json::to_string_pretty(entries)?);
    Ok(())
}

fn print_plain(entries: &[EntryMeta]) {
    for entry in entries {
        println!("{}", entry.key);
    }
}

/// Format bytes as human-readable size (e.g., "1.5 MB")
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

async fn clear_cache(
    storage: &DiskCacheStorage,
    config: &Config,
    skip_confirm: bool,
) -> PrefetchResult<()> {
    let name = &config.worker.cache_name;
    let count = storage.cache(name).await?.entries().await?.len();

    if count == 0 {
        println!("No cached bundles to clear.");
        return Ok(());
    }

    println!("This will remove {} cached bundle(s) from {}.", count, name);

    if !skip_confirm {
        print!("Are you sure? [y/N] ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            println!("Failed to read input, aborting.");
            return Ok(());
        }

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    storage.delete(name).await?;
    println!("{} cleared {} bundle(s)", style("✓").green(), count);

    Ok(())
}
