//! RDF Pages CLI
//!
//! Command-line interface for:
//! - Trimming a raw dump into subject-grouped triple files (`trim`)
//! - Building the paged store and its tables (`build`)
//! - Post-build side tables (`predicate-types`, `find-ghost`)
//! - Local queries (`query`) and the HTTP query endpoint (`serve`)

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;

use rdfpages_store::config::triple_files_in;
use rdfpages_store::ghost::{find_ghosts, write_ghosts};
use rdfpages_store::predicate_types::{count_predicate_types, write_predicate_types};
use rdfpages_store::tables::NamesTable;
use rdfpages_store::trim::trim_dump;
use rdfpages_store::{build_store, BuildConfig, QueryService, Store, StoreConfig, TripleReader};

mod logging;
mod query;
mod serve;

use serve::ServeConfig;

#[derive(Parser)]
#[command(name = "rdfpages")]
#[command(
    author,
    version,
    about = "RDF Pages: read-optimized paged triple store"
)]
struct Cli {
    /// JSON config file (`build`, `store`, `serve` sections; all optional).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Append logs to this file as well as stderr (empty disables).
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    #[command(flatten)]
    store: StoreArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Store directory (overrides the config file).
    #[arg(short = 'D', long, global = true)]
    dir: Option<PathBuf>,

    /// Page size in bytes for the in-memory data arena.
    #[arg(long, global = true)]
    page_size: Option<usize>,

    /// Memory-map the data file instead of reading it into pages.
    #[arg(long, global = true)]
    mmap: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a raw 4-column dump into `fb_en.txt` / `fb_en_nonM.txt`.
    Trim {
        /// Raw dump file
        #[arg(short, long)]
        input: PathBuf,
        /// Output directory (defaults to the store directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Build the data file and index tables from subject-grouped triples.
    ///
    /// Without inputs, reads `fb_en.txt` then `fb_en_nonM.txt` from the
    /// store directory.
    Build {
        inputs: Vec<PathBuf>,
        /// Flush a subject as its own chunk past this many UTF-16 units
        #[arg(long)]
        split_threshold: Option<usize>,
    },

    /// Count object kinds per predicate into `predicate.objtype.txt`.
    PredicateTypes { inputs: Vec<PathBuf> },

    /// List unnamed, never-subject MIDs into `ghost_mid.txt`.
    FindGhost { inputs: Vec<PathBuf> },

    /// Query a built store in-process.
    Query(query::QueryArgs),

    /// Serve the query operations over HTTP/JSON.
    Serve {
        /// Listen address (default 127.0.0.1:9358)
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    build: BuildConfig,
    store: StoreConfig,
    serve: ServeConfig,
}

impl FileConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = FileConfig::load(cli.config.as_deref())?;

    if let Some(dir) = &cli.store.dir {
        config.store.dir = dir.clone();
    }
    if let Some(page_size) = cli.store.page_size {
        config.store.page_size = page_size;
    }
    config.store.mmap |= cli.store.mmap;

    let log_file = match (&cli.log, &cli.command) {
        (Some(path), _) => Some(path.clone()),
        (None, Commands::Serve { .. }) => Some(config.serve.log_file.clone()),
        (None, _) => None,
    };
    logging::init(log_file.as_deref())?;

    match cli.command {
        Commands::Trim { input, out } => {
            let out = out.unwrap_or_else(|| config.store.dir.clone());
            cmd_trim(&input, &out)
        }
        Commands::Build {
            inputs,
            split_threshold,
        } => {
            if let Some(threshold) = split_threshold {
                config.build.split_threshold_chars = threshold;
            }
            cmd_build(&config.build, &config.store, inputs)
        }
        Commands::PredicateTypes { inputs } => {
            cmd_predicate_types(&config.build, &config.store, inputs)
        }
        Commands::FindGhost { inputs } => cmd_find_ghost(&config.store, inputs),
        Commands::Query(args) => {
            let store = Store::open(&config.store)?;
            query::run(&QueryService::new(store.into()), &args)
        }
        Commands::Serve { listen } => {
            if let Some(listen) = listen {
                config.serve.listen = listen;
            }
            serve::cmd_serve(config.store, config.serve)
        }
    }
}

/// Explicit inputs, or the trimmer's output files in the store directory.
fn resolve_inputs(store: &StoreConfig, inputs: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    if !inputs.is_empty() {
        return Ok(inputs);
    }
    let found = triple_files_in(&store.dir);
    if found.is_empty() {
        return Err(anyhow!(
            "no triple files given and none found in {}",
            store.dir.display()
        ));
    }
    Ok(found)
}

fn cmd_trim(input: &Path, out: &Path) -> Result<()> {
    println!("{} {}", "Trimming".green().bold(), input.display());
    let stats = trim_dump(input, out)?;
    println!(
        "  {} {} lines, {} removed triples, {} English values kept",
        "→".cyan(),
        stats.total_lines,
        stats.removed_triples,
        stats.values_english
    );
    println!("  {} {}", "→".cyan(), out.display());
    Ok(())
}

fn cmd_build(build: &BuildConfig, store: &StoreConfig, inputs: Vec<PathBuf>) -> Result<()> {
    let inputs = resolve_inputs(store, inputs)?;
    println!("{} {} input file(s)", "Building".green().bold(), inputs.len());
    let stats = build_store(build, &store.dir, &inputs)?;
    println!(
        "  {} {} subjects ({} split, {} CVT) from {} lines",
        "→".cyan(),
        stats.subjects,
        stats.split_subjects,
        stats.cvt_subjects,
        stats.lines_read
    );
    println!(
        "  {} avg chunk {:.1} bytes compressed / {:.1} uncompressed",
        "→".cyan(),
        stats.avg_compressed(),
        stats.avg_uncompressed()
    );
    println!("  {} {}", "→".cyan(), store.dir.display());
    Ok(())
}

fn cmd_predicate_types(build: &BuildConfig, store: &StoreConfig, inputs: Vec<PathBuf>) -> Result<()> {
    let inputs = resolve_inputs(store, inputs)?;
    let loaded = Store::open(store)?;
    let counts = count_predicate_types(loaded.tables(), build, TripleReader::open(&inputs))?;
    let path = store.files().predicate_types;
    write_predicate_types(&path, &counts)?;
    println!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
    Ok(())
}

fn cmd_find_ghost(store: &StoreConfig, inputs: Vec<PathBuf>) -> Result<()> {
    let inputs = resolve_inputs(store, inputs)?;
    let files = store.files();
    let names_file = File::open(&files.names)
        .with_context(|| format!("failed to open {}", files.names.display()))?;
    let names = NamesTable::read_from(BufReader::new(names_file))?;
    let ghosts = find_ghosts(&names, TripleReader::open(&inputs))?;
    write_ghosts(&files.ghosts, &ghosts)?;
    println!(
        "{} {} ({} ghost ids)",
        "wrote".green().bold(),
        files.ghosts.display().to_string().bold(),
        ghosts.len()
    );
    Ok(())
}
