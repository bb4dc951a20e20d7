use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "research-catalog")]
#[command(about = "Personal research catalog with full-text search", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Config file (JSON). Defaults to ./research-catalog.json when present.
    #[arg(long, global = true)]
    pub(crate) config: Option<PathBuf>,
    /// Override the database path
    #[arg(long, global = true)]
    pub(crate) db: Option<PathBuf>,
    /// Override the upload directory
    #[arg(long, global = true)]
    pub(crate) uploads: Option<PathBuf>,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Write a config file with default settings.
    Init {
        /// Where to write it. Defaults to ./research-catalog.json
        path: Option<PathBuf>,
    },

    /// Run the HTTP server (API, uploads and static client).
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory served at /
        #[arg(long)]
        static_dir: Option<PathBuf>,
        /// Request worker threads
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Add a manually entered record.
    Add {
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        authors: Option<String>,
        #[arg(long)]
        year: Option<String>,
        /// Record type (default: paper)
        #[arg(long = "type")]
        kind: Option<String>,
        #[arg(long = "abstract")]
        abstract_text: Option<String>,
        #[arg(long)]
        text: Option<String>,
        /// Read body text from a file
        #[arg(long, conflicts_with = "text")]
        text_file: Option<PathBuf>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },

    /// Import a file or a folder of documents as uploads.
    Import {
        path: PathBuf,
        /// File extensions to import (repeatable). Default: pdf, txt, md
        #[arg(long = "ext")]
        exts: Vec<String>,
        /// Do not write anything; only report what would be imported.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the catalog.
    Search {
        query: String,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Print one record in full.
    Show {
        id: i64,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Record count and full-text index health.
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Rebuild the full-text index from the stored records.
    Reindex,

    /// Send a prompt to the configured chat-completions API.
    Ask {
        prompt: String,
        /// Print the raw JSON reply
        #[arg(long)]
        json: bool,
    },
}
