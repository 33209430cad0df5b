use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use retention_core::actions::{self, ActionMode};
use retention_core::config::{self, AppConfig};
use retention_core::hasher;
use retention_core::models::{ScannedFile, SuggestedAction};
use retention_core::pipeline::Pipeline;
use retention_core::report;
use retention_core::scanner;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use storage::records;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Scan { path, json } => run_scan(cfg, path, json).await,
        Commands::Analyze {
            path,
            execute,
            json,
            output,
            max_concurrency,
            max_retries,
            http_timeout_secs,
            max_text_chars,
        } => {
            let mut cfg = cfg;
            if let Some(v) = max_concurrency {
                cfg.processing.max_concurrency = v;
            }
            if let Some(v) = max_retries {
                cfg.processing.max_retries = v;
            }
            if let Some(v) = http_timeout_secs {
                cfg.processing.http_timeout_secs = v;
            }
            if let Some(v) = max_text_chars {
                cfg.processing.max_text_chars = v;
            }
            run_analyze(cfg, path, execute, json, output).await
        }
        Commands::Apply {
            execute,
            actions,
            json,
        } => run_apply(cfg, execute, actions, json).await,
        Commands::Report { output } => run_report(cfg, output).await,
    }
}

#[derive(Parser)]
#[command(name = "retention-analyzer")]
#[command(about = "Bulk AI-powered file retention analysis", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for supported files and show what the next run would process
    Scan {
        /// Folder to scan; falls back to scan.include from config
        path: Option<PathBuf>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Scan, classify, and preview (or execute) retention actions
    Analyze {
        /// Folder to scan; falls back to scan.include from config
        path: Option<PathBuf>,
        /// Execute filesystem actions instead of previewing them
        #[arg(long)]
        execute: bool,
        /// Output the full run report as JSON on stdout
        #[arg(long)]
        json: bool,
        /// Also write the run report JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,
        /// Override processing.max_concurrency
        #[arg(long)]
        max_concurrency: Option<usize>,
        /// Override processing.max_retries
        #[arg(long)]
        max_retries: Option<u32>,
        /// Override processing.http_timeout_secs
        #[arg(long)]
        http_timeout_secs: Option<u64>,
        /// Override processing.max_text_chars
        #[arg(long)]
        max_text_chars: Option<usize>,
    },
    /// Apply stored decisions from the database to the filesystem
    Apply {
        /// Execute moves instead of previewing them
        #[arg(long)]
        execute: bool,
        /// Actions to apply (comma-separated)
        #[arg(long, value_delimiter = ',', num_args = 1..,
              default_values_t = vec!["delete".to_string(), "archive".to_string()])]
        actions: Vec<String>,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Export all stored records as a JSON array
    Report {
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn scan_roots(cfg: &AppConfig, path: Option<PathBuf>) -> Result<Vec<PathBuf>> {
    let roots: Vec<PathBuf> = match path {
        Some(p) => vec![p],
        None => cfg.scan.include.iter().map(PathBuf::from).collect(),
    };
    if roots.is_empty() {
        bail!("no folder given and scan.include is empty in the config");
    }
    for root in &roots {
        if !root.is_dir() {
            bail!("not a directory: {}", root.display());
        }
    }
    Ok(roots)
}

async fn discover(cfg: &AppConfig, roots: Vec<PathBuf>) -> Result<Vec<ScannedFile>> {
    let excludes = cfg.scan.exclude.clone();
    let extensions = cfg.scan.extensions.clone();
    tokio::task::spawn_blocking(move || scanner::scan(&roots, &excludes, &extensions))
        .await
        .context("scan task failed")?
}

async fn run_scan(cfg: AppConfig, path: Option<PathBuf>, json: bool) -> Result<()> {
    let roots = scan_roots(&cfg, path)?;
    let files = discover(&cfg, roots).await?;

    let pool = storage::connect(&cfg.database.path).await.context("db connect")?;
    storage::migrate(&pool).await.context("db migrate")?;

    let mut to_process = 0usize;
    let mut skipped = 0usize;
    let mut unreadable = 0usize;
    for file in &files {
        let path_str = file.path.to_string_lossy();
        match hasher::fingerprint(&file.path) {
            Ok(fp) => {
                if records::should_process(&pool, &path_str, &fp.hash).await? {
                    to_process += 1;
                    if !json {
                        println!("process  {}", path_str);
                    }
                } else {
                    skipped += 1;
                    if !json {
                        println!("skip     {}", path_str);
                    }
                }
            }
            Err(e) => {
                unreadable += 1;
                if !json {
                    println!("error    {path_str}: {e}");
                }
            }
        }
    }

    if json {
        println!(
            "{}",
            serde_json::json!({
                "discovered": files.len(),
                "to_process": to_process,
                "skipped": skipped,
                "unreadable": unreadable,
            })
        );
    } else {
        println!(
            "discovered {}, to process {}, skipped {}, unreadable {}",
            files.len(),
            to_process,
            skipped,
            unreadable
        );
    }
    Ok(())
}

async fn run_analyze(
    cfg: AppConfig,
    path: Option<PathBuf>,
    execute: bool,
    json: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    if cfg.api.key.is_empty() {
        bail!("API key required: set api.key in the config or SARVAM_API_KEY");
    }
    let roots = scan_roots(&cfg, path)?;
    let files = discover(&cfg, roots).await?;

    let pool = storage::connect(&cfg.database.path).await.context("db connect")?;
    storage::migrate(&pool).await.context("db migrate")?;

    let client = Arc::new(
        providers::sarvam::SarvamClient::new(
            cfg.api.client_config(cfg.processing.http_timeout()),
        )
        .context("http client setup")?,
    );
    let pipeline = Pipeline::new(
        pool.clone(),
        client.clone(),
        client,
        cfg.processing.retry_policy(),
        cfg.processing.max_concurrency,
        cfg.processing.max_text_chars,
    );

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("cancellation requested, letting in-flight work settle");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let mode = if execute {
        ActionMode::Apply
    } else {
        ActionMode::DryRun
    };
    let report = pipeline.run(files, mode, cancel).await?;

    if json {
        println!("{}", report.to_json()?);
    } else {
        let mode_label = if execute { "apply" } else { "dry-run" };
        println!(
            "{mode_label}: scanned {}, classified {}, skipped {}, errored {}",
            report.summary.scanned,
            report.summary.classified,
            report.summary.skipped,
            report.summary.errored
        );
        for (action, count) in &report.summary.by_action {
            println!("  {action}: {count}");
        }
    }
    if let Some(path) = output {
        std::fs::write(&path, report.to_json()?)
            .with_context(|| format!("writing report to {}", path.display()))?;
        println!("report written to {}", path.display());
    }
    Ok(())
}

async fn run_apply(cfg: AppConfig, execute: bool, actions: Vec<String>, json: bool) -> Result<()> {
    let filter: Vec<SuggestedAction> = actions
        .iter()
        .map(|a| a.parse::<SuggestedAction>())
        .collect::<Result<_, _>>()
        .context("invalid --actions value")?;

    let pool = storage::connect(&cfg.database.path).await.context("db connect")?;
    storage::migrate(&pool).await.context("db migrate")?;
    let records = records::fetch_by_actions(&pool, &actions).await?;

    let mode = if execute {
        ActionMode::Apply
    } else {
        ActionMode::DryRun
    };
    let (outcomes, summary) = actions::apply_all(&records, &filter, mode);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "summary": summary,
                "outcomes": outcomes,
            }))?
        );
    } else {
        for outcome in &outcomes {
            match (&outcome.destination, &outcome.error) {
                (_, Some(err)) => println!("failed   {}: {err}", outcome.file_path),
                (Some(dest), None) => {
                    println!("{:<8} {} -> {dest}", outcome.action.as_str(), outcome.file_path)
                }
                (None, None) => println!("{:<8} {}", outcome.action.as_str(), outcome.file_path),
            }
        }
        let counts: Vec<String> = summary
            .counts
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        println!("apply summary: {}", counts.join(", "));
    }
    Ok(())
}

async fn run_report(cfg: AppConfig, output: Option<PathBuf>) -> Result<()> {
    let pool = storage::connect(&cfg.database.path).await.context("db connect")?;
    storage::migrate(&pool).await.context("db migrate")?;
    let json = report::export_records(&pool).await?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("writing report to {}", path.display()))?;
            println!("report written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
