//! `ingest-dl` command line

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::prelude::*;

use ingest_dl::config::mask_secret;
use ingest_dl::orchestrator::EXIT_FAILURE;
use ingest_dl::{Config, Database, Orchestrator, ScriptDownloader, ToolsConfig, WorkdirLayout};

#[derive(Parser, Debug)]
#[command(name = "ingest-dl", version)]
#[command(about = "Download, extract and relocate files from hosting links, resumably")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Debug-level logging (RUST_LOG still wins when set)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process every link in a links file
    Run(RunArgs),
    /// Show every tracked task and a per-status summary
    Status(WorkdirArgs),
    /// Put tasks back to pending (by default every failed task)
    Reset(ResetArgs),
    /// Remove scratch downloads and extraction output, keeping the state database
    Clean(CleanArgs),
    /// Report which external tools are available
    Check(ToolArgs),
}

#[derive(Args, Debug)]
struct WorkdirArgs {
    /// Working directory holding downloads/, extracted/, logs/ and state.db
    #[arg(short, long, env = "INGEST_WORKDIR", default_value = "/content/work")]
    workdir: PathBuf,
}

#[derive(Args, Debug)]
struct ToolArgs {
    /// Command for bunkr links, e.g. "bunkr-dl {url} -o {dest}"
    #[arg(long, env = "INGEST_BUNKR_CMD")]
    bunkr_cmd: Option<String>,

    /// Command for buzzheavier links, e.g. "bzhr {resource} {dest}"
    #[arg(long, env = "INGEST_BUZZHEAVIER_CMD")]
    buzzheavier_cmd: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Text file with one link per line
    #[arg(short, long)]
    links: PathBuf,

    /// Destination directory for finished tasks
    #[arg(short, long, env = "INGEST_DEST")]
    dest: PathBuf,

    #[command(flatten)]
    workdir: WorkdirArgs,

    /// Tasks processed in parallel
    #[arg(short, long, default_value_t = 3)]
    concurrency: usize,

    /// Pixeldrain API key
    #[arg(long, env = "PIXELDRAIN_API_KEY", hide_env_values = true)]
    pixeldrain_api_key: Option<String>,

    /// Attempts per download request before giving up
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Reset and re-run tasks that failed in an earlier run
    #[arg(long)]
    retry_failed: bool,

    /// Keep downloads and extraction output after a task completes
    #[arg(long)]
    keep_temp: bool,

    /// Only report what would run
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    tools: ToolArgs,
}

#[derive(Args, Debug)]
struct ResetArgs {
    #[command(flatten)]
    workdir: WorkdirArgs,

    /// Reset only the task for this URL
    #[arg(long, conflicts_with = "all")]
    url: Option<String>,

    /// Reset every task that is not already pending
    #[arg(long)]
    all: bool,
}

#[derive(Args, Debug)]
struct CleanArgs {
    #[command(flatten)]
    workdir: WorkdirArgs,

    /// Actually delete; without it only report what would be removed
    #[arg(long)]
    force: bool,
}

impl ToolArgs {
    fn apply(&self, tools: &mut ToolsConfig) {
        tools.bunkr_command = self.bunkr_cmd.as_deref().and_then(split_command);
        tools.buzzheavier_command = self.buzzheavier_cmd.as_deref().and_then(split_command);
    }
}

impl RunArgs {
    fn into_config(self) -> Config {
        let mut config = Config {
            links_file: Some(self.links),
            destination: self.dest,
            workdir: self.workdir.workdir,
            concurrency: self.concurrency.max(1),
            retry_failed: self.retry_failed,
            keep_temp: self.keep_temp,
            dry_run: self.dry_run,
            ..Default::default()
        };
        config.pixeldrain.api_key = self.pixeldrain_api_key.filter(|key| !key.trim().is_empty());
        config.retry.max_attempts = self.max_retries;
        self.tools.apply(&mut config.tools);
        config
    }
}

/// Split a command line on whitespace; `None` when blank
fn split_command(command: &str) -> Option<Vec<String>> {
    let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
    (!argv.is_empty()).then_some(argv)
}

/// Install stderr logging plus, when the logs directory is usable, a file log
fn init_tracing(verbose: bool, logs_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let (file_layer, guard) = match logs_dir.map(std::fs::create_dir_all) {
        Some(Ok(())) => {
            let dir = logs_dir.unwrap_or(Path::new("."));
            let appender = tracing_appender::rolling::never(dir, "ingest.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("WARN: cannot create log directory ({e}); logging to stderr only");
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let logs_dir = match &cli.command {
        Command::Run(args) => Some(WorkdirLayout::new(&args.workdir.workdir).logs_dir()),
        _ => None,
    };
    let _guard = init_tracing(cli.verbose, logs_dir.as_deref());

    match dispatch(cli.command).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(EXIT_FAILURE as u8)
        }
    }
}

async fn dispatch(command: Command) -> Result<i32> {
    match command {
        Command::Run(args) => run(args.into_config()).await,
        Command::Status(args) => status(&args.workdir).await.map(|()| 0),
        Command::Reset(args) => reset(args).await.map(|()| 0),
        Command::Clean(args) => clean(&args.workdir.workdir, args.force).await.map(|()| 0),
        Command::Check(args) => Ok(check(&args)),
    }
}

async fn run(config: Config) -> Result<i32> {
    config.require_links_file()?;
    tracing::info!(
        links_file = ?config.links_file,
        destination = %config.destination.display(),
        workdir = %config.workdir.display(),
        concurrency = config.concurrency,
        retry_failed = config.retry_failed,
        keep_temp = config.keep_temp,
        dry_run = config.dry_run,
        pixeldrain_api_key = ?config.pixeldrain.api_key.as_deref().map(mask_secret),
        "starting ingest run"
    );

    let orchestrator = Orchestrator::new(config)
        .await
        .context("failed to initialise the pipeline")?;
    let outcome = ingest_dl::run_with_shutdown(&orchestrator).await?;

    println!("{}", outcome.stats.summary());
    if outcome.interrupted {
        println!("Interrupted; rerun the same command to resume.");
    }
    Ok(outcome.exit_code())
}

/// Open the store of an existing workdir
async fn open_store(workdir: &Path) -> Result<Option<Database>> {
    let db_path = WorkdirLayout::new(workdir).state_db_path();
    if !db_path.is_file() {
        println!("No state database at {}", db_path.display());
        return Ok(None);
    }
    let db = Database::new(&db_path)
        .await
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    Ok(Some(db))
}

async fn status(workdir: &Path) -> Result<()> {
    let Some(db) = open_store(workdir).await? else {
        return Ok(());
    };

    let tasks = db.list_tasks().await?;
    println!(
        "{:<10} {:<12} {:<12} {:>7}  {}",
        "ID", "HOST", "STATUS", "RETRIES", "ERROR"
    );
    for task in &tasks {
        let error: String = task
            .error
            .as_deref()
            .unwrap_or("")
            .chars()
            .take(60)
            .collect();
        println!(
            "{:<10} {:<12} {:<12} {:>7}  {}",
            task.id.short(),
            task.host,
            task.status,
            task.retries,
            error
        );
    }

    let stats = db.task_stats().await?;
    println!();
    for (status, count) in stats.entries() {
        println!("{status:<12} {count}");
    }
    println!("{:<12} {}", "total", stats.total);
    Ok(())
}

async fn reset(args: ResetArgs) -> Result<()> {
    let Some(db) = open_store(&args.workdir.workdir).await? else {
        return Ok(());
    };

    if let Some(url) = args.url {
        let Some(task) = db.get_task_by_url(&url).await? else {
            bail!("no task for {url}");
        };
        db.reset_task(&task.id).await?;
        println!("Reset task {} ({url})", task.id.short());
    } else {
        let count = db.reset_all_tasks(!args.all).await?;
        let scope = if args.all { "task(s)" } else { "failed task(s)" };
        println!("Reset {count} {scope}");
    }
    Ok(())
}

async fn clean(workdir: &Path, force: bool) -> Result<()> {
    let layout = WorkdirLayout::new(workdir);
    let usage = layout.disk_usage().await?;
    println!(
        "downloads: {} bytes, extracted: {} bytes",
        usage.downloads, usage.extracted
    );

    if !force {
        println!("Dry run; pass --force to delete scratch data (state.db is kept)");
        return Ok(());
    }
    let removed = layout.cleanup_all_tasks().await?;
    println!("Removed {removed} item(s), freed {} bytes", usage.downloads + usage.extracted);
    Ok(())
}

fn check(args: &ToolArgs) -> i32 {
    let mut tools = ToolsConfig::default();
    args.apply(&mut tools);

    let mut missing = 0;
    for (name, command) in [
        ("bunkr", &tools.bunkr_command),
        ("buzzheavier", &tools.buzzheavier_command),
    ] {
        match command
            .clone()
            .map(|argv| ScriptDownloader::new(name, argv, &tools))
        {
            Some(Ok(downloader)) if downloader.is_available() => {
                println!("{name:<12} ok ({})", downloader.program());
            }
            Some(Ok(downloader)) => {
                println!("{name:<12} MISSING ({} not found)", downloader.program());
                missing += 1;
            }
            Some(Err(e)) => {
                println!("{name:<12} INVALID ({e})");
                missing += 1;
            }
            None => println!("{name:<12} not configured"),
        }
    }

    for (name, candidates) in [("unrar", &["unrar"][..]), ("7z", &["7z", "7za"][..])] {
        match candidates.iter().find_map(|c| which::which(c).ok()) {
            Some(path) => println!("{name:<12} ok ({})", path.display()),
            None => println!("{name:<12} not found (built-in extractor is used)"),
        }
    }

    if missing > 0 { EXIT_FAILURE } else { 0 }
}
