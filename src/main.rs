//! Relcache CLI
//!
//! Demo driver for the record cache:
//! - `demo` seeds an in-process server, pages through a window and applies
//!   remote inserts and deletes
//! - `init-config` prints or writes the default configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use relcache::config::{generate_default_config, Config, LoggingConfig};
use relcache::model::{row, ResourceDescription, SortSpec, Value};
use relcache::recordset::{PageResult, RecordSet, WindowOptions};
use relcache::remote::MemoryRemote;
use relcache::resources::ResourceManager;
use relcache::{Paging, RecordKey};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relcache")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Client-side relational record cache")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: search the usual locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Page through a seeded resource while the server changes it
    Demo {
        /// Rows seeded on the server
        #[arg(long, default_value = "25")]
        rows: i64,
        /// Rows per window page (default: from config)
        #[arg(long)]
        rpp: Option<usize>,
        /// Sort, e.g. "name desc" (repeatable)
        #[arg(short, long)]
        sort: Vec<String>,
    },

    /// Generate default config file
    InitConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("relcache={}", logging.level)));
    let file = logging
        .file
        .as_ref()
        .map(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path))
        })
        .transpose()?;

    let registry = tracing_subscriber::registry().with(filter);
    let layer = tracing_subscriber::fmt::layer();
    match (logging.format.as_str(), file) {
        ("json", Some(file)) => registry.with(layer.json().with_writer(Mutex::new(file))).init(),
        ("json", None) => registry.with(layer.json()).init(),
        (_, Some(file)) => registry
            .with(layer.with_ansi(false).with_writer(Mutex::new(file)))
            .init(),
        (_, None) => registry.with(layer.pretty()).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config.logging)?;

    match cli.command {
        Commands::Demo { rows, rpp, sort } => demo(config, rows, rpp, sort).await,
        Commands::InitConfig { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {}", path.display()))?;
                    println!("Config written to {}", path.display());
                }
                None => print!("{}", content),
            }
            Ok(())
        }
    }
}

async fn demo(config: Config, rows: i64, rpp: Option<usize>, sort: Vec<String>) -> anyhow::Result<()> {
    tracing::info!("Relcache demo v{}", env!("CARGO_PKG_VERSION"));

    let remote = Arc::new(MemoryRemote::new());
    remote
        .register(ResourceDescription::new("item", config.cache.default_rpp.max(1), &["id"]))
        .await;
    let seed = (1..=rows)
        .map(|i| row([("id", Value::from(i)), ("name", Value::from(format!("item {}", i)))]))
        .collect();
    remote.insert("item", seed).await?;

    let manager = Arc::new(ResourceManager::with_config(remote.clone(), config.cache.clone()));
    let autolinker = config
        .autolinker
        .enabled
        .then(|| manager.start_autolinker(config.autolinker.interval()));

    let mut paging = manager.default_paging();
    if let Some(rpp) = rpp {
        paging.rpp = rpp.max(1);
    }
    if !sort.is_empty() {
        paging.sort = SortSpec::try_from(sort).context("parsing --sort")?;
    }
    let window = RecordSet::open(
        manager.clone(),
        "item",
        WindowOptions::new().name("demo").paging(Paging::new(paging.rpp, 1, paging.sort)),
    )
    .await;

    if let Some(page) = window.load().await {
        print_page(&page);
    }
    let pages = relcache::model::page_count(window.total_count().await, window.paging().await.rpp);
    for page in 2..=pages {
        if let Some(page) = window.set_page(page).await {
            print_page(&page);
        }
    }

    println!("-- server inserts id {} and deletes id 1", rows + 1);
    let inserted = remote.insert("item", vec![row([("id", rows + 1)])]).await?;
    manager.apply(inserted).await;
    let deleted = remote.delete("item", &[RecordKey::from(1)]).await?;
    manager.apply(deleted).await;

    // Let the window's listener reconcile before reading
    tokio::task::yield_now().await;
    if let Some(page) = window.load().await {
        print_page(&page);
    }

    for stats in manager.stats().await {
        tracing::info!(resource = %stats.resource, records = stats.records, "Collection stats");
    }

    window.destroy().await;
    if let Some(handle) = autolinker {
        manager.stop_autolinker().await;
        handle.await.context("joining autolinker")?;
    }
    tracing::info!("Relcache demo complete");
    Ok(())
}

fn print_page(page: &PageResult) {
    let ids: Vec<String> = page
        .records
        .iter()
        .map(|r| r.get("id").to_string())
        .collect();
    println!(
        "page {} ({} per page, {} total): [{}]",
        page.paging.page,
        page.paging.rpp,
        page.total_count,
        ids.join(", ")
    );
}
