//! CLI entry point for paperspider.

use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paperspider_core::filter::apply;
use paperspider_core::{
    ArtifactKind, ArtifactStatus, Dataset, FetchManager, FileConfig, JobOutcome, PaperRecord,
    SourceRegistry, Store, load_default_file_config, render, sync,
};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command, DatasetArgs, FilterArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = load_default_file_config().context("Failed to load config file")?;
    if let Some(path) = &loaded.path {
        debug!(path = %path.display(), loaded = loaded.loaded_from_file(), "config resolved");
    }
    let config = loaded.effective();
    let base_dir = args.base_dir.clone().unwrap_or_else(|| config.base_dir());

    match args.command {
        Command::Datasets => run_datasets(&base_dir, &config).await,
        Command::Sync { dataset } => run_sync(&base_dir, &config, &dataset).await,
        Command::List { dataset, filters } => run_list(&base_dir, &config, &dataset, &filters).await,
        Command::Fetch {
            kind,
            dataset,
            filters,
            concurrency,
            delay_ms,
        } => {
            let concurrency = concurrency.map_or_else(|| config.concurrency(), usize::from);
            let interval = delay_ms.map_or_else(|| config.request_delay(), Duration::from_millis);
            let ctx = FetchRun {
                kind,
                concurrency,
                interval,
                show_progress: !args.quiet && io::stderr().is_terminal(),
            };
            run_fetch(&base_dir, &config, &dataset, &filters, &ctx).await
        }
        Command::Export {
            dataset,
            filters,
            format,
            fields,
            output,
        } => {
            let (store, records) = open_selection(&base_dir, &config, &dataset, &filters).await?;
            store.close().await;
            let text = render(&records, &fields, format)?;
            write_output(output.as_deref(), &text)
        }
        Command::Path {
            kind,
            dataset,
            source_id,
        } => {
            let dataset = Dataset::new(&base_dir, &dataset.conference, dataset.year)?;
            let Some(path) = dataset.artifact_path(kind, &source_id) else {
                bail!("{kind} artifacts are stored in the database, not as files");
            };
            println!("{}", path.display());
            Ok(())
        }
    }
}

async fn run_datasets(base_dir: &Path, config: &FileConfig) -> Result<()> {
    let datasets = Dataset::discover(base_dir)
        .with_context(|| format!("Failed to scan '{}'", base_dir.display()))?;
    if datasets.is_empty() {
        println!("No datasets under {}", base_dir.display());
        return Ok(());
    }
    for dataset in datasets {
        let label = format!("{}/{}", dataset.conference(), dataset.year());
        let store = Store::open(dataset, config.database_options()).await?;
        let count = store.count().await?;
        store.close().await;
        println!("{label}\t{count} papers");
    }
    Ok(())
}

async fn run_sync(base_dir: &Path, config: &FileConfig, args: &DatasetArgs) -> Result<()> {
    let registry = SourceRegistry::with_defaults(&config.http_settings())?;
    let adapter = registry.get(&args.conference)?;
    let store = open_store(base_dir, config, args).await?;

    let report = sync(adapter.as_ref(), &store).await?;
    if report.empty_year {
        println!(
            "{} {} has no published listing yet",
            adapter.name(),
            args.year
        );
    } else {
        println!(
            "{} {}: {} listed, {} new, {} updated, {} unchanged",
            adapter.name(),
            args.year,
            report.listed,
            report.upsert.inserted,
            report.upsert.updated,
            report.upsert.unchanged
        );
    }
    store.close().await;
    Ok(())
}

async fn run_list(
    base_dir: &Path,
    config: &FileConfig,
    args: &DatasetArgs,
    filters: &FilterArgs,
) -> Result<()> {
    let (store, records) = open_selection(base_dir, config, args, filters).await?;
    for record in &records {
        println!("{}\t{}\t{}", status_flags(record), record.key.source_id, record.title);
    }
    info!(shown = records.len(), "listed papers");
    store.close().await;
    Ok(())
}

/// Fetch options resolved from flags and config.
struct FetchRun {
    kind: ArtifactKind,
    concurrency: usize,
    interval: Duration,
    show_progress: bool,
}

async fn run_fetch(
    base_dir: &Path,
    config: &FileConfig,
    args: &DatasetArgs,
    filters: &FilterArgs,
    run: &FetchRun,
) -> Result<()> {
    let registry = SourceRegistry::with_defaults(&config.http_settings())?;
    let adapter = registry.get(&args.conference)?;
    let (store, records) = open_selection(base_dir, config, args, filters).await?;
    let pending = records.iter().filter(|r| r.needs(run.kind)).count();
    if pending == 0 {
        println!("Nothing to fetch: every selected paper already has its {}", run.kind);
        store.close().await;
        return Ok(());
    }

    let bar = if run.show_progress {
        let bar = ProgressBar::new(pending as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    } else {
        ProgressBar::hidden()
    };

    let manager = FetchManager::new(store.clone(), Arc::clone(&adapter), run.concurrency)?;
    let progress_bar = bar.clone();
    let handle = manager.start_batch(
        records,
        run.kind,
        run.interval,
        move |progress| {
            progress_bar.inc(1);
            match progress.outcome {
                JobOutcome::Fetched => progress_bar.set_message(progress.key.source_id),
                JobOutcome::Failed { kind, message } => {
                    progress_bar.println(format!("failed {} ({kind}): {message}", progress.key));
                }
            }
        },
        |_| {},
    );

    let token = handle.cancellation_token();
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling fetch batch");
            token.cancel();
        }
    });

    let summary = handle.wait().await?;
    signal.abort();
    bar.finish_and_clear();

    println!(
        "{}: {} fetched, {} failed, {} cancelled, {} skipped",
        run.kind, summary.completed, summary.failed, summary.cancelled, summary.skipped
    );
    store.close().await;
    Ok(())
}

async fn open_store(base_dir: &Path, config: &FileConfig, args: &DatasetArgs) -> Result<Store> {
    let dataset = Dataset::new(base_dir, &args.conference, args.year)?;
    let store = Store::open(dataset, config.database_options())
        .await
        .with_context(|| format!("Failed to open dataset {}/{}", args.conference, args.year))?;
    Ok(store)
}

/// Opens the dataset, repairs stale artifact paths and applies the filters.
async fn open_selection(
    base_dir: &Path,
    config: &FileConfig,
    args: &DatasetArgs,
    filters: &FilterArgs,
) -> Result<(Store, Vec<PaperRecord>)> {
    let store = open_store(base_dir, config, args).await?;
    let repaired = store.reconcile_artifacts().await?;
    if repaired > 0 {
        warn!(repaired, "artifact files missing on disk were reset to missing");
    }
    let all = store.records().await?;
    let set = filters.to_filter_set();
    let selected: Vec<PaperRecord> = apply(&set, &all).into_iter().cloned().collect();
    debug!(total = all.len(), selected = selected.len(), "selection built");
    Ok((store, selected))
}

fn status_flags(record: &PaperRecord) -> String {
    ArtifactKind::ALL
        .iter()
        .map(|kind| match record.status(*kind) {
            ArtifactStatus::Fetched => kind.as_str()[..1].to_ascii_uppercase(),
            ArtifactStatus::Failed => "!".to_string(),
            ArtifactStatus::Missing => "-".to_string(),
        })
        .collect()
}

fn write_output(output: Option<&Path>, text: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, format!("{text}\n"))
                .with_context(|| format!("Failed to write '{}'", path.display()))?;
            info!(path = %path.display(), "export written");
        }
        None => println!("{text}"),
    }
    Ok(())
}
