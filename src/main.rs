use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use polysym::config::load_config;
use polysym::index::SymbolIndex;
use polysym::storage::Storage;
use polysym::watcher::{find_workspace_files, FsWatcher, Pipeline};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "polysym")]
#[command(version)]
#[command(about = "Multi-language workspace symbol indexer (tree-sitter backed)")]
struct Cli {
    /// Workspace root (defaults to the current directory)
    #[arg(long, short = 't', value_name = "DIR", global = true)]
    target: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan the workspace, build the symbol index and persist it
    Index,
    /// Query the persisted index for a symbol
    Lookup {
        /// Word to look up
        word: String,
        /// Treat WORD as a prefix (workspace-symbol style)
        #[arg(long)]
        prefix: bool,
    },
    /// Index, then keep the index live against filesystem changes
    Watch,
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {msg}")
        .unwrap()
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
}

fn cmd_index(root: &PathBuf) -> Result<()> {
    let cfg = load_config(root);

    let discovered = find_workspace_files(root, &cfg)?.len();
    let planned = discovered.min(cfg.max_init_files);

    let bar = ProgressBar::new(planned as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} indexing [{bar:30}] {pos}/{len} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );

    let mut pipeline = Pipeline::new(root, cfg, 1);
    let submitted = pipeline.seed_with_progress(|rel| {
        bar.set_message(rel.to_string());
        bar.inc(1);
    })?;
    pipeline.shutdown();
    bar.finish_and_clear();

    let summary = json!({
        "root": root.to_string_lossy(),
        "discovered": discovered,
        "indexed": submitted,
        "truncated": discovered > submitted,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_lookup(root: &PathBuf, word: &str, prefix: bool) -> Result<()> {
    let cfg = load_config(root);
    let storage = Storage::open(&root.join(&cfg.output_dir), cfg.flush_debounce());
    let index = SymbolIndex::new(storage, cfg.cache_capacity);

    let results: Vec<serde_json::Value> = if prefix {
        index
            .lookup_prefix(word)
            .into_iter()
            .map(|(uri, word, info)| json!({ "uri": uri, "word": word, "info": info }))
            .collect()
    } else {
        index
            .lookup(word)
            .into_iter()
            .map(|(uri, info)| json!({ "uri": uri, "word": word, "info": info }))
            .collect()
    };

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn cmd_watch(root: &PathBuf) -> Result<()> {
    let cfg = load_config(root);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(spinner_style());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("seeding index...");

    let mut pipeline = Pipeline::new(root, cfg.clone(), 1);
    let seeded = pipeline.seed()?;
    spinner.finish_with_message(format!("indexed {seeded} files, watching..."));

    // Ctrl-C / SIGTERM flips the teardown flag; the loop below drains and
    // flushes synchronously before exiting, so no staged mutation is lost.
    let stop = pipeline.cancel_token();
    ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed))
        .context("Failed to install termination handler")?;

    let _watcher = FsWatcher::new(root, &cfg, pipeline.sender())?;
    pipeline.run(Duration::from_millis(250));
    eprintln!("polysym: index flushed, exiting");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let root = match cli.target {
        Some(p) if p.is_absolute() => p,
        Some(p) => std::env::current_dir()
            .context("Failed to get current dir")?
            .join(p),
        None => std::env::current_dir().context("Failed to get current dir")?,
    };

    match cli.cmd {
        Command::Index => cmd_index(&root),
        Command::Lookup { word, prefix } => cmd_lookup(&root, &word, prefix),
        Command::Watch => cmd_watch(&root),
    }
}
