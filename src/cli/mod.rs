//! CLI command definitions and parsing
use crate::index::SearchMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tierstore",
    version,
    about = "Tiered vector store that migrates its index as the corpus grows",
    long_about = "tierstore ingests reports and fetched web content into a deduplicated vector \
                  store, answers similarity queries, and suggests topics the corpus does not \
                  cover yet. The index topology is chosen by corpus size and rebuilt \
                  automatically when a size tier is crossed."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/tierstore/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest *.md reports and *.txt web content not yet in the store
    Ingest {
        /// Reports directory (defaults to ingest.reports_dir)
        #[arg(long)]
        reports: Option<PathBuf>,

        /// Web content directory (defaults to ingest.web_content_dir)
        #[arg(long)]
        web: Option<PathBuf>,
    },

    /// Add documents given on the command line or read from files
    Add {
        /// Document texts
        texts: Vec<String>,

        /// Read one document per file
        #[arg(short, long = "file", value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Abort if embedding takes longer than this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Query the store by similarity
    Query {
        /// Search query text
        query: String,

        /// Number of results (defaults to query.default_top_k)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Scan breadth: auto, breadth or depth
        #[arg(short, long)]
        mode: Option<SearchMode>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show store size, topology and migration state
    Stats {
        /// Include per-group coverage
        #[arg(long)]
        groups: bool,

        /// Show stats in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Suggest topics missing from or thinly covered by the store
    Expand {
        /// Text file with one taxonomy label per line
        #[arg(short, long)]
        taxonomy: Option<PathBuf>,

        /// Maximum number of suggestions (defaults to expansion.top_n)
        #[arg(short = 'n', long = "top-n")]
        top_n: Option<usize>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
