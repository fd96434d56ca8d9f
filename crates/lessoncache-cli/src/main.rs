//! lessoncache - keeps math practice content available offline.
//!
//! Drives the request interceptor, the question bank and the bulk
//! synchronizer from the command line.

use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use lessoncache_core::api::Request;
use lessoncache_core::interceptor::ResponseSource;
use lessoncache_core::{
    ApiClient, CacheStorage, Config, DatabaseProvider, Interceptor, Store, Synchronizer,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ============================================================================
// Constants
// ============================================================================

/// Directory for daily rolling log files; logs go to stderr only when unset
const LOG_DIR_ENV: &str = "LESSONCACHE_LOG_DIR";

const LOG_FILE_PREFIX: &str = "lessoncache.log";

/// Questions shown by `practice` when no limit is given
const DEFAULT_PRACTICE_LIMIT: usize = 15;

const USAGE: &str = "\
Usage: lessoncache <command> [args]

Commands:
  install                          Cache the app shell and activate
  fetch <url>                      Fetch a URL through the interceptor
  sync <level> [per-skill]         Download a level's questions into the bank
  ensure <level>                   Sync only when the bank is running low
  practice <level> [limit] [skill] Draw unanswered questions
  answer <question-id> <correct|incorrect>
  placement <level>                Show a placement test (offline fallback)
  save-placement <level>           Download a placement test for offline use
  status                           Show cache partitions and bank totals";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // RUST_LOG controls the level (e.g. RUST_LOG=lessoncache_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr = fmt::layer().with_writer(io::stderr);

    match std::env::var_os(LOG_DIR_ENV).map(PathBuf::from) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(stderr)
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr).with(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        return Ok(());
    };
    let rest = &args[1..];

    let config = Config::load().context("Failed to load configuration")?;
    info!(command = %command, base_url = %config.base_url, "lessoncache starting");

    match command.as_str() {
        "install" => install(&config).await,
        "fetch" => fetch(&config, required(rest, 0, "url")?).await,
        "sync" => sync(&config, required(rest, 0, "level")?, optional_number(rest, 1)?).await,
        "ensure" => ensure(&config, required(rest, 0, "level")?).await,
        "practice" => practice(
            &config,
            required(rest, 0, "level")?,
            optional_number(rest, 1)?.unwrap_or(DEFAULT_PRACTICE_LIMIT),
            rest.get(2).map(String::as_str),
        ),
        "answer" => answer(
            &config,
            required(rest, 0, "question-id")?,
            required(rest, 1, "correct|incorrect")?,
        ),
        "placement" => placement(&config, required(rest, 0, "level")?).await,
        "save-placement" => save_placement(&config, required(rest, 0, "level")?).await,
        "status" => status(&config).await,
        "help" | "--help" | "-h" => {
            println!("{USAGE}");
            Ok(())
        }
        other => bail!("Unknown command '{other}'\n\n{USAGE}"),
    }
}

// ============================================================================
// Argument Helpers
// ============================================================================

fn required<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing argument <{name}>\n\n{USAGE}"))
}

fn optional_number(args: &[String], index: usize) -> Result<Option<usize>> {
    args.get(index)
        .map(|raw| {
            raw.parse::<usize>()
                .with_context(|| format!("Expected a number, got '{raw}'"))
        })
        .transpose()
}

// ============================================================================
// Wiring
// ============================================================================

fn api_client(config: &Config) -> Result<ApiClient> {
    ApiClient::new(config).context("Failed to create HTTP client")
}

async fn interceptor(config: &Config) -> Result<Interceptor> {
    let root = config.cache_dir()?.join("partitions");
    let storage = CacheStorage::open(root)
        .await
        .context("Failed to open cache storage")?;
    Ok(Interceptor::new(config, api_client(config)?, storage))
}

fn store(config: &Config) -> Result<Store> {
    Ok(Store::new(DatabaseProvider::in_dir(&config.data_dir()?)))
}

fn synchronizer(config: &Config) -> Result<Synchronizer> {
    Ok(Synchronizer::new(api_client(config)?, store(config)?))
}

// ============================================================================
// Commands
// ============================================================================

async fn install(config: &Config) -> Result<()> {
    let interceptor = interceptor(config).await?;
    let deleted = interceptor
        .start()
        .await
        .context("Failed to install app shell")?;

    println!(
        "Installed {} shell assets into {}",
        interceptor.shell().len().await?,
        config.shell_partition()
    );
    for name in deleted {
        println!("Deleted old partition {name}");
    }
    Ok(())
}

async fn fetch(config: &Config, url: &str) -> Result<()> {
    let interceptor = interceptor(config).await?;
    if !interceptor.resume().await? {
        info!("No cached shell found, installing");
        interceptor.start().await.context("Failed to install app shell")?;
    }

    let request = Request::get_str(url)?;
    let result = interceptor.fetch(&request).await?;
    let source = match result.source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
    };
    eprintln!(
        "{} {} ({} bytes, from {})",
        result.response.status,
        url,
        result.response.body.len(),
        source
    );
    println!("{}", result.response.text());

    // Let a background refresh finish before the runtime shuts down.
    if let Some(revalidation) = result.revalidation {
        match revalidation.wait().await {
            Ok(fresh) => eprintln!("Revalidated: {}", fresh.status),
            Err(e) => eprintln!("Revalidation failed: {e}"),
        }
    }
    Ok(())
}

async fn sync(config: &Config, level_id: &str, per_skill: Option<usize>) -> Result<()> {
    let synchronizer = synchronizer(config)?;
    let report = synchronizer
        .sync_level(level_id, per_skill.unwrap_or(config.questions_per_skill))
        .await?;

    println!("Fetched {} questions for {}", report.fetched, report.level_id);
    for group in &report.groups {
        match &group.error {
            None => println!("  {:<24} {:>4} stored", group.skill_id, group.count),
            Some(e) => println!("  {:<24} {:>4} FAILED: {}", group.skill_id, group.count, e),
        }
    }
    if !report.is_complete() {
        bail!("{} skill group(s) failed to store", report.failed_groups());
    }
    Ok(())
}

async fn ensure(config: &Config, level_id: &str) -> Result<()> {
    let synchronizer = synchronizer(config)?;
    match synchronizer
        .ensure_level(level_id, config.sync_threshold, config.questions_per_skill)
        .await?
    {
        Some(report) => println!("Synced {}: {} questions stored", level_id, report.stored()),
        None => println!(
            "{} already has at least {} unanswered questions",
            level_id, config.sync_threshold
        ),
    }
    Ok(())
}

fn practice(config: &Config, level_id: &str, limit: usize, skill_id: Option<&str>) -> Result<()> {
    let store = store(config)?;
    let questions = match skill_id {
        Some(skill) => store.questions_for_skill(level_id, skill, limit)?,
        None => store.questions_for_level(level_id, limit)?,
    };
    if questions.is_empty() {
        eprintln!(
            "No unanswered questions banked for {level_id}; run `lessoncache sync {level_id}`"
        );
    }
    println!("{}", serde_json::to_string_pretty(&questions)?);
    Ok(())
}

fn answer(config: &Config, question_id: &str, outcome: &str) -> Result<()> {
    let correct = match outcome {
        "correct" | "true" | "yes" => true,
        "incorrect" | "false" | "no" => false,
        other => bail!("Expected 'correct' or 'incorrect', got '{other}'"),
    };
    store(config)?
        .record_answer(question_id, correct)
        .with_context(|| format!("Failed to record answer for {question_id}"))?;
    println!("Recorded {question_id} as {outcome}");
    Ok(())
}

async fn placement(config: &Config, level_id: &str) -> Result<()> {
    let questions = synchronizer(config)?.placement_test(level_id).await?;
    println!("{}", serde_json::to_string_pretty(&questions)?);
    Ok(())
}

async fn save_placement(config: &Config, level_id: &str) -> Result<()> {
    let saved = synchronizer(config)?.download_placement_test(level_id).await?;
    println!("Saved placement test {level_id} ({saved} questions)");
    Ok(())
}

async fn status(config: &Config) -> Result<()> {
    let storage = CacheStorage::open(config.cache_dir()?.join("partitions")).await?;
    let whitelist = config.partition_whitelist();

    println!("Cache partitions:");
    let names = storage.partition_names().await?;
    if names.is_empty() {
        println!("  (none - run `lessoncache install`)");
    }
    for name in names {
        let entries = storage.partition(&name).entries().await?;
        let newest = entries
            .iter()
            .max_by_key(|entry| entry.cached_at)
            .map(|entry| entry.age_display())
            .unwrap_or_else(|| "-".to_string());
        let marker = if whitelist.contains(&name) { "" } else { " (stale)" };
        println!("  {:<32} {:>4} entries, newest {}{}", name, entries.len(), newest, marker);
    }

    let store = store(config)?;
    println!("\nQuestion bank:");
    let stats = store.stats()?;
    if stats.is_empty() {
        println!("  (empty)");
    }
    for level in stats {
        println!(
            "  {:<16} {:>5} unanswered of {:>5}",
            level.level_id, level.unanswered, level.total
        );
    }

    let tests = store.placement_test_ids()?;
    if !tests.is_empty() {
        println!("\nPlacement tests saved: {}", tests.join(", "));
    }
    Ok(())
}
