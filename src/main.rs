mod catalog;
mod cli;
mod config;
mod error;
mod extract;
mod index;
mod ingest;
mod llm;
mod multipart;
mod query;
mod server;
mod store;
mod uploads;

use std::path::Path;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::catalog::Catalog;
use crate::cli::{Cli, Command};
use crate::config::{Config, DEFAULT_CONFIG_FILE, save_file_config};
use crate::ingest::ManualEntry;
use crate::llm::{AiClient, AiReply, completion_text};

#[derive(Serialize)]
struct StatusResponse {
    db: String,
    records: usize,
    full_text: bool,
    index_entries: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Command::Init { path } = &cli.command {
        let path = path.as_deref().unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        if path.exists() {
            eprintln!("Refusing to overwrite existing file: {}", path.display());
            std::process::exit(2);
        }
        save_file_config(path, &Config::default())?;
        println!("Created {}", path.display());
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(uploads) = cli.uploads {
        config.upload_dir = uploads;
    }

    match cli.command {
        Command::Init { .. } => Ok(()),

        Command::Serve {
            bind,
            port,
            static_dir,
            workers,
        } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(static_dir) = static_dir {
                config.static_dir = static_dir;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            let catalog = Catalog::open(config)?;
            server::run_server(catalog)
        }

        Command::Add {
            title,
            authors,
            year,
            kind,
            abstract_text,
            text,
            text_file,
            json,
        } => {
            let text = match text_file {
                Some(path) => std::fs::read_to_string(path)?,
                None => text.unwrap_or_default(),
            };
            let defaults = ManualEntry::default();
            let entry = ManualEntry {
                title: title.unwrap_or_default(),
                authors: authors.unwrap_or_default(),
                year: year.unwrap_or_default(),
                kind: kind.unwrap_or(defaults.kind),
                abstract_text: abstract_text.unwrap_or_default(),
                text,
            };
            let catalog = Catalog::open(config)?;
            let id = catalog.add_entry(entry)?;
            if json {
                println!("{}", serde_json::json!({ "ok": true, "id": id }));
            } else {
                println!("Added record #{id}");
            }
            Ok(())
        }

        Command::Import {
            path,
            exts,
            dry_run,
        } => {
            let catalog = Catalog::open(config)?;
            let report = catalog.import_path(&path, &exts, dry_run)?;
            let verb = if dry_run { "Would import" } else { "Imported" };
            println!(
                "{verb} {} of {} files ({} unchanged or unusable)",
                report.imported, report.scanned, report.skipped
            );
            Ok(())
        }

        Command::Search { query, json } => {
            let catalog = Catalog::open(config)?;
            let outcome = catalog.search_with_mode(&query)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({ "results": outcome.results }))?
                );
                return Ok(());
            }
            eprintln!("mode: {:?}", outcome.mode);
            for (rank, summary) in outcome.results.iter().enumerate() {
                let year = if summary.year.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", summary.year)
                };
                println!("{:>3}. #{}  {}{year}", rank + 1, summary.id, summary.title);
                if !summary.authors.is_empty() {
                    println!("     {}", summary.authors);
                }
            }
            Ok(())
        }

        Command::Show { id, json } => {
            let catalog = Catalog::open(config)?;
            let record = catalog.record(id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
                return Ok(());
            }
            println!("#{} {}", record.id, record.title);
            println!("type: {}", record.kind);
            println!("authors: {}", record.authors);
            println!("year: {}", record.year);
            if !record.filename.is_empty() {
                println!("file: {}", record.filename);
            }
            let added = chrono::DateTime::from_timestamp(record.added, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| record.added.to_string());
            println!("added: {added}");
            if !record.abstract_text.is_empty() {
                println!("\n{}", record.abstract_text);
            }
            if !record.text.is_empty() {
                println!("\n{}", record.text);
            }
            Ok(())
        }

        Command::Status { json } => {
            let catalog = Catalog::open(config)?;
            let status = catalog.status()?;
            let payload = StatusResponse {
                db: catalog.config.db_path.display().to_string(),
                records: status.records,
                full_text: status.index_state == index::IndexState::Available,
                index_entries: status.index_entries,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else {
                println!("db: {}", payload.db);
                println!("records: {}", payload.records);
                println!("full_text: {}", payload.full_text);
                match payload.index_entries {
                    Some(n) if n != payload.records => {
                        println!("index_entries: {n} (out of sync; run `reindex`)")
                    }
                    Some(n) => println!("index_entries: {n}"),
                    None => println!("index_entries: -"),
                }
            }
            Ok(())
        }

        Command::Reindex => {
            let catalog = Catalog::open(config)?;
            let n = catalog.reindex()?;
            println!("Reindexed {n} records");
            Ok(())
        }

        Command::Ask { prompt, json } => {
            let client = AiClient::new(config.ai);
            match client.complete(&prompt)? {
                AiReply::Json(value) => {
                    match completion_text(&value).filter(|_| !json) {
                        Some(text) => println!("{text}"),
                        None => println!("{}", serde_json::to_string_pretty(&value)?),
                    }
                    Ok(())
                }
                AiReply::Failed { status, text } => {
                    Err(format!("AI request failed (status {status}): {text}").into())
                }
            }
        }
    }
}
