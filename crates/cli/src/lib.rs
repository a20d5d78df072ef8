use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use folio_engine::{
    CacheStats, LoadingState, ReaderConfig, ReaderEngine, ReaderError, ReadingDirection,
    SchedulerStats,
};
use folio_source::{open_source, OpenSource};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Entries listed by `info` before the output is truncated.
const INFO_ENTRY_LIMIT: usize = 10;

const PAGE_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Parser)]
#[command(name = "folio-cli")]
#[command(about = "Folio page cache and reader harness")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable document metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Run a headless reading session and print cache statistics.
    Read {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Pages to visit in order, 1-based, comma separated.
        #[arg(long, value_delimiter = ',', default_value = "1")]
        pages: Vec<u32>,
        /// Read right to left.
        #[arg(long)]
        rtl: bool,
        /// Maximum number of decoded pages kept resident.
        #[arg(long)]
        capacity: Option<usize>,
        /// Pages prefetched on each side of the current page.
        #[arg(long)]
        prefetch: Option<u32>,
        /// Reader configuration file.
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    format: &'static str,
    page_count: u32,
    entries: Vec<EntryOutput>,
}

#[derive(Debug, Serialize)]
struct EntryOutput {
    index: u32,
    name: String,
    size_hint: u64,
}

#[derive(Debug, Serialize)]
struct ReadOutput {
    path: String,
    direction: &'static str,
    page_count: u32,
    visits: Vec<VisitOutput>,
    current_page: u32,
    failed_pages: Vec<u32>,
    cache: CacheOutput,
    scheduler: Option<SchedulerOutput>,
}

#[derive(Debug, Serialize)]
struct VisitOutput {
    page: u32,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    physical_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CacheOutput {
    capacity: usize,
    resident: usize,
    memory_used: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    releases: u64,
    hit_rate: f64,
}

impl From<CacheStats> for CacheOutput {
    fn from(stats: CacheStats) -> Self {
        Self {
            capacity: stats.capacity,
            resident: stats.page_count,
            memory_used: stats.memory_used,
            hits: stats.hits,
            misses: stats.misses,
            evictions: stats.evictions,
            releases: stats.releases,
            hit_rate: stats.hit_rate(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SchedulerOutput {
    submitted: u64,
    coalesced: u64,
    decoded: u64,
    failed: u64,
    cancelled: u64,
    discarded: u64,
}

impl From<SchedulerStats> for SchedulerOutput {
    fn from(stats: SchedulerStats) -> Self {
        Self {
            submitted: stats.submitted,
            coalesced: stats.coalesced,
            decoded: stats.decoded,
            failed: stats.failed,
            cancelled: stats.cancelled,
            discarded: stats.discarded,
        }
    }
}

struct ReadArgs {
    pages: Vec<u32>,
    rtl: bool,
    capacity: Option<usize>,
    prefetch: Option<u32>,
    config: Option<PathBuf>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Read { file, pages, rtl, capacity, prefetch, config } => {
            run_read(&file, ReadArgs { pages, rtl, capacity, prefetch, config })
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn run_info(file: &Path) -> Result<()> {
    ensure_file_exists(file)?;

    let source = open_source(OpenSource::from(file)).context("failed to open document")?;

    let entries = source
        .entries()
        .iter()
        .take(INFO_ENTRY_LIMIT)
        .map(|entry| EntryOutput {
            index: entry.physical_index,
            name: entry.name.clone(),
            size_hint: entry.size_hint,
        })
        .collect();

    let payload = InfoOutput {
        path: file.display().to_string(),
        format: source.format().as_str(),
        page_count: source.page_count(),
        entries,
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    source.close();

    Ok(())
}

fn run_read(file: &Path, args: ReadArgs) -> Result<()> {
    ensure_file_exists(file)?;

    if args.pages.contains(&0) {
        anyhow::bail!("--pages is 1-based and every page must be >= 1");
    }

    let config = load_config(&args)?;
    let load_timeout = config.load_timeout;
    let direction =
        if args.rtl { ReadingDirection::RightToLeft } else { ReadingDirection::LeftToRight };

    let mut engine = ReaderEngine::new(config);
    engine.set_reading_direction(direction);
    engine.open(file, file.to_path_buf(), 0);

    match engine.wait_for_load(load_timeout + PAGE_WAIT) {
        LoadingState::Ready => {}
        LoadingState::Error(error) => {
            return Err(error.clone()).context("failed to open document");
        }
        state => anyhow::bail!("document did not become ready (state: {state:?})"),
    }

    let page_count = engine.total_pages();
    if let Some(&page) = args.pages.iter().find(|&&page| page > page_count) {
        engine.close();
        anyhow::bail!("page {page} out of range (page_count={page_count})");
    }

    let mut visits = Vec::with_capacity(args.pages.len());
    for &page in &args.pages {
        let logical = page - 1;
        engine.request_page(logical);
        visits.push(visit(&mut engine, page, logical));
    }

    if !engine.wait_idle(PAGE_WAIT) {
        tracing::warn!("prefetch still running when the session ended");
    }

    let payload = ReadOutput {
        path: file.display().to_string(),
        direction: direction.as_str(),
        page_count,
        visits,
        current_page: engine.current_logical_page() + 1,
        failed_pages: engine.failed_pages().into_iter().map(|logical| logical + 1).collect(),
        cache: engine.cache_stats().into(),
        scheduler: engine.scheduler_stats().map(Into::into),
    };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    engine.close();

    Ok(())
}

fn visit(engine: &mut ReaderEngine, page: u32, logical: u32) -> VisitOutput {
    let mut output = VisitOutput {
        page,
        status: "ready",
        physical_index: None,
        width: None,
        height: None,
        error: None,
    };

    match engine.wait_for_page(logical, PAGE_WAIT) {
        Ok(true) => {
            if let Some((physical, width, height)) = engine
                .on_page_available(logical, |decoded| {
                    (decoded.physical_index(), decoded.width(), decoded.height())
                })
            {
                output.physical_index = Some(physical);
                output.width = Some(width);
                output.height = Some(height);
            } else {
                // Evicted between the wait and the lookup.
                output.status = "evicted";
            }
        }
        Ok(false) => output.status = "timeout",
        Err(ReaderError::DecodeFailed { reason, .. }) => {
            output.status = "failed";
            output.error = Some(reason);
        }
        Err(error) => {
            output.status = "failed";
            output.error = Some(error.to_string());
        }
    }

    output
}

fn load_config(args: &ReadArgs) -> Result<ReaderConfig> {
    let mut config = match &args.config {
        Some(path) => ReaderConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => ReaderConfig::from_env().context("invalid FOLIO_* environment")?,
    };

    if let Some(capacity) = args.capacity {
        config = config.with_max_cached_pages(capacity);
    }
    if let Some(prefetch) = args.prefetch {
        config = config.with_prefetch_pages(prefetch);
    }

    config.validate().context("invalid reader configuration")?;
    Ok(config)
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}
