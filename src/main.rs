use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use imagefinder::config::{self, EngineConfig};
use imagefinder::database::ImageStore;
use imagefinder::decoder::DecoderRegistry;
use imagefinder::logging::{LogConfig, LogHandle};
use imagefinder::services::bench::{self, BenchResult, Benchmark};
use imagefinder::services::{ScanOptions, Scanner, SearchOptions, Searcher};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    name = "imagefinder",
    version,
    about = "Index photo libraries and find similar images, RAW included"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fingerprint every image under a folder into the index
    Scan {
        /// Folder to scan
        #[arg(short, long, value_name = "DIR")]
        folder: PathBuf,
        /// Label stored with every record from this scan
        #[arg(long, value_name = "NAME", default_value = "")]
        prefix: String,
        /// Re-fingerprint files that are already indexed
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        logging: LoggingArgs,
    },

    /// Find indexed images similar to a query image
    Search {
        /// Query image
        #[arg(short, long, value_name = "FILE")]
        image: PathBuf,
        /// Similarity threshold (0.0-1.0)
        #[arg(short, long, value_name = "VALUE", allow_hyphen_values = true)]
        threshold: Option<String>,
        /// Only consider records with this source prefix
        #[arg(long, value_name = "NAME", default_value = "")]
        prefix: String,
        /// Number of matches to show (0 shows all)
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Print all matches as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        store: StoreArgs,
        #[command(flatten)]
        logging: LoggingArgs,
    },

    /// Time decoding and fingerprinting of individual files
    Bench {
        /// Files to benchmark
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,
        /// Benchmark every decodable file under this folder
        #[arg(long, value_name = "DIR")]
        folder: Option<PathBuf>,
        /// Runs per file
        #[arg(long, default_value_t = bench::DEFAULT_RUNS)]
        runs: usize,
        /// Seconds to wait for a single run before giving up on the file
        #[arg(long, value_name = "SECS", default_value_t = bench::DEFAULT_TIMEOUT.as_secs())]
        timeout: u64,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        logging: LoggingArgs,
    },
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Index database (default: images.db next to the executable)
    #[arg(long, visible_alias = "db", value_name = "PATH", env = "IMAGEFINDER_DATABASE")]
    database: Option<PathBuf>,
    /// Worker threads
    #[arg(long, env = "IMAGEFINDER_WORKERS", default_value_t = config::DEFAULT_WORKERS)]
    workers: usize,
}

impl StoreArgs {
    fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(config::default_database_path)
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_workers(self.workers)
    }
}

#[derive(Args, Debug)]
struct LoggingArgs {
    /// Verbose logging to the console and a log file
    #[arg(long)]
    debug: bool,
    /// Log file used in debug mode (default: imagefinder.log)
    #[arg(long, value_name = "PATH")]
    logfile: Option<PathBuf>,
}

impl LoggingArgs {
    fn init(&self) -> LogHandle {
        let handle = LogHandle::init(&LogConfig::new(self.debug, self.logfile.clone()));
        if let Some(path) = handle.log_file() {
            println!("Debug mode enabled. Logging to: {}", path.display());
        }
        handle
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            folder,
            prefix,
            force,
            store,
            logging,
        } => {
            let log = logging.init();
            let result = run_scan(folder, prefix, force, &store, logging.debug);
            log.shutdown();
            result
        }

        Commands::Search {
            image,
            threshold,
            prefix,
            limit,
            json,
            store,
            logging,
        } => {
            let log = logging.init();
            let result = run_search(image, threshold, prefix, limit, json, &store, logging.debug);
            log.shutdown();
            result
        }

        Commands::Bench {
            files,
            folder,
            runs,
            timeout,
            json,
            logging,
        } => {
            let log = logging.init();
            let result = run_bench(files, folder, runs, timeout, json);
            log.shutdown();
            result
        }
    }
}

fn run_scan(
    folder: PathBuf,
    prefix: String,
    force: bool,
    store_args: &StoreArgs,
    debug: bool,
) -> Result<()> {
    let start = Instant::now();

    if !folder.is_dir() {
        anyhow::bail!("Folder path does not exist: {}", folder.display());
    }
    let folder = folder
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", folder.display()))?;

    let db_path = store_args.database_path();
    let store = ImageStore::create(&db_path)
        .with_context(|| format!("Error initializing database {}", db_path.display()))?;
    let config = store_args.engine_config();
    if debug {
        log::debug!("Engine config: {}", serde_json::to_string(&config)?);
    }

    println!("▶ Scanning {} into {}", folder.display(), db_path.display());
    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    progress.enable_steady_tick(Duration::from_millis(100));

    let scanner = Scanner::new(store, Arc::new(DecoderRegistry::default()), &config)
        .with_progress(progress.clone());
    let options = ScanOptions::new(&folder)
        .with_source_prefix(prefix)
        .with_force_rewrite(force)
        .with_debug(debug);

    let summary = scanner
        .scan(&options)
        .with_context(|| format!("Error scanning folder {}", folder.display()))?;
    progress.finish_with_message("Scan complete");

    println!("\nScan summary:");
    println!("  Files found:     {}", summary.discovered);
    println!("  Processed:       {} ({} RAW)", summary.processed, summary.raw_processed);
    println!("  Newly indexed:   {}", summary.indexed);
    println!("  Updated:         {}", summary.updated);
    println!("  Unchanged:       {}", summary.unchanged);
    println!("  Errors:          {}", summary.errors);
    for (path, message) in summary.failures.iter().take(10) {
        println!("    ⚠️  {}: {}", path, message);
    }
    if summary.failures.len() > 10 {
        println!("    … and {} more", summary.failures.len() - 10);
    }

    println!("\nTotal execution time: {:.2} seconds", start.elapsed().as_secs_f64());
    Ok(())
}

fn run_search(
    image: PathBuf,
    threshold: Option<String>,
    prefix: String,
    limit: usize,
    json: bool,
    store_args: &StoreArgs,
    debug: bool,
) -> Result<()> {
    let start = Instant::now();

    let mut options = SearchOptions::new(&image)
        .with_source_prefix(prefix.clone())
        .with_debug(debug);
    if let Some(raw) = threshold {
        let (value, warning) = config::parse_threshold(&raw);
        // Logged as a warning by the searcher.
        if let Some(warning) = warning {
            options = options.with_warning(warning);
        }
        options = options.with_threshold(value);
    }

    if !image.is_file() {
        anyhow::bail!("Query image does not exist: {}", image.display());
    }
    let db_path = store_args.database_path();
    if !db_path.is_file() {
        anyhow::bail!(
            "Database does not exist: {}. Run scan command first.",
            db_path.display()
        );
    }
    let store = ImageStore::open_existing(&db_path)
        .with_context(|| format!("Error opening database {}", db_path.display()))?;

    if !json {
        println!("Searching for similar images...");
        if !prefix.is_empty() {
            println!("Filtering by source prefix: {}", prefix);
        }
    }

    let progress = if json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(0);
        bar.set_style(ProgressStyle::with_template(
            "{spinner:.green} [{bar:40}] {pos}/{len} candidates",
        )?);
        bar.enable_steady_tick(Duration::from_millis(100));
        bar
    };

    let searcher = Searcher::new(
        store,
        Arc::new(DecoderRegistry::default()),
        &store_args.engine_config(),
    )
    .with_progress(progress.clone());
    let report = searcher
        .search(&options)
        .context("Error finding similar images")?;
    progress.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report.matches)?);
        return Ok(());
    }

    println!("\nTop Matches:");
    if report.matches.is_empty() {
        println!("No matches found.");
    } else {
        let shown = if limit == 0 { report.matches.len() } else { limit };
        for (i, m) in report.matches.iter().take(shown).enumerate() {
            println!("{}. Image: {}", i + 1, m.path);
            if !m.source_prefix.is_empty() {
                println!("   Source: {}", m.source_prefix);
            }
            println!("   SSIM Score: {:.4}", m.ssim_score);
        }
        if report.matches.len() > shown {
            println!("({} more not shown)", report.matches.len() - shown);
        }
    }

    println!("\nTotal search time: {:.2} seconds", start.elapsed().as_secs_f64());
    Ok(())
}

fn run_bench(
    mut files: Vec<PathBuf>,
    folder: Option<PathBuf>,
    runs: usize,
    timeout: u64,
    json: bool,
) -> Result<()> {
    let bench = Benchmark::new(Arc::new(DecoderRegistry::default()))
        .with_runs(runs)
        .with_timeout(Duration::from_secs(timeout));

    if let Some(folder) = folder {
        let found = bench
            .collect_files(&folder)
            .with_context(|| format!("Failed to list {}", folder.display()))?;
        files.extend(found);
    }
    if files.is_empty() {
        anyhow::bail!("No files to benchmark; pass files or --folder");
    }

    let results = benchmark("benchmarking all files", || bench.run(&files));

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        print_bench_table(&results);
    }
    Ok(())
}

fn print_bench_table(results: &[BenchResult]) {
    println!(
        "\n{:<50} {:>10} {:>10} {:>10}  status",
        "file", "mean", "min", "max"
    );
    for r in results {
        let fmt = |d: Option<Duration>| {
            d.map(|d| format!("{:.2?}", d))
                .unwrap_or_else(|| "-".to_string())
        };
        let status = if r.timed_out {
            "timed out".to_string()
        } else if let Some(e) = &r.error {
            format!("error: {}", e)
        } else {
            format!("ok ({}/{})", r.completed, r.runs)
        };
        println!(
            "{:<50} {:>10} {:>10} {:>10}  {}",
            r.path,
            fmt(r.mean),
            fmt(r.min),
            fmt(r.max),
            status
        );
    }
}

/// Run `f()`, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_threshold(args: &[&str]) -> Option<String> {
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Commands::Search { threshold, .. } => threshold,
            other => panic!("expected search, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_threshold_reaches_parser() {
        let raw = search_threshold(&[
            "imagefinder",
            "search",
            "--image",
            "query.jpg",
            "--threshold",
            "-0.1",
        ]);
        assert_eq!(raw.as_deref(), Some("-0.1"));

        let (value, warning) = config::parse_threshold(raw.as_deref().unwrap());
        assert_eq!(value, config::DEFAULT_THRESHOLD);
        assert!(warning.is_some());
    }

    #[test]
    fn test_threshold_is_optional() {
        assert_eq!(
            search_threshold(&["imagefinder", "search", "-i", "query.jpg"]),
            None
        );
        assert_eq!(
            search_threshold(&["imagefinder", "search", "-i", "q.jpg", "-t", "0.9"]).as_deref(),
            Some("0.9")
        );
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
