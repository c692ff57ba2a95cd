mod config;

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use folio_contracts::events::{EventPayload, EventWriter};
use folio_contracts::runs::{write_gallery, write_summary, RunSummary};
use folio_engine::{
    build_http_client, plan, EventProgress, FanoutProgress, LogProgress, Pipeline,
    ReplicateService, RunReport, S3BlobStore,
};
use serde_json::{json, Map, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::{
    non_empty_env, resolve_namespace, resolve_run_config, ManifestArgs, ServiceArgs, TuningArgs,
};

#[derive(Debug, Parser)]
#[command(name = "folio", version, about = "Illustrate storybook manifests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate, store and link an image for every page.
    Run(RunArgs),
    /// Show what a run would submit, without calling any service.
    Plan(PlanArgs),
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[command(flatten)]
    manifest: ManifestArgs,
    #[command(flatten)]
    service: ServiceArgs,
    #[command(flatten)]
    tuning: TuningArgs,
    /// Where the updated manifest is written.
    #[arg(long, default_value = "updated_storybook.json")]
    out: PathBuf,
    /// Defaults to `events.jsonl` next to `--out`.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Defaults to `summary.json` next to `--out`.
    #[arg(long)]
    summary: Option<PathBuf>,
    #[arg(long)]
    preview_html: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct PlanArgs {
    #[command(flatten)]
    manifest: ManifestArgs,
    /// Leading blob key segment [env: R2_PROJECT_FOLDER]
    #[arg(long)]
    namespace: Option<String>,
    /// Print the plan as JSON.
    #[arg(long)]
    json: bool,
}

fn main() {
    let _ = dotenvy::dotenv();
    init_logging();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("folio error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_illustrate(args),
        Command::Plan(args) => run_plan(args),
    }
}

fn run_illustrate(args: RunArgs) -> Result<i32> {
    let manifest = args.manifest.load()?;
    let substitutions = args.manifest.substitutions();
    let config = resolve_run_config(&args.service, &args.tuning, &non_empty_env)?;

    let http = build_http_client(config.http_timeout)?;
    let service = ReplicateService::new(config.replicate, http.clone());
    let store = S3BlobStore::new(config.storage, http)?;
    let pipeline = Pipeline::new(service, store, config.pipeline);

    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| sibling_path(&args.out, "events.jsonl"));
    let summary_path = args
        .summary
        .clone()
        .unwrap_or_else(|| sibling_path(&args.out, "summary.json"));
    let run_id = format!("run-{}", Uuid::new_v4());
    let started_at = now_utc_iso();
    let events = EventWriter::new(&events_path, run_id.clone());
    events.emit(
        "run_started",
        map_object(json!({
            "books": manifest.books().len(),
            "pages": manifest.page_count(),
            "namespace": pipeline.options().upload.namespace,
            "out": args.out.to_string_lossy(),
        })),
    )?;

    let progress = FanoutProgress::new()
        .with(LogProgress)
        .with(EventProgress::new(events.clone()));
    let report = pipeline.run(&manifest, &substitutions, &progress);

    save_run_results(&args.out, &events, &report)?;
    let summary = RunSummary {
        run_id,
        started_at,
        finished_at: now_utc_iso(),
        total_pages: report.stats.total as u64,
        resolved_pages: report.stats.resolved as u64,
        unresolved_pages: report.stats.unresolved as u64,
        poll_sweeps: report.poll_sweeps as u64,
        failures: RunSummary::failure_rows(&report.failures),
    };
    let extra = map_object(json!({
        "manifest_out": args.out.to_string_lossy(),
        "events": events_path.to_string_lossy(),
    }));
    write_summary(&summary_path, &summary, Some(&extra))?;
    if let Some(path) = &args.preview_html {
        write_gallery(path, &report.previews)?;
        info!(path = %path.display(), "preview gallery written");
    }
    events.emit(
        "run_finished",
        map_object(json!({
            "resolved": report.stats.resolved,
            "unresolved": report.stats.unresolved,
            "total": report.stats.total,
        })),
    )?;

    for preview in &report.previews {
        println!("{}", preview.caption());
        println!("{}", preview.url);
    }
    println!(
        "Resolved {}/{} pages. Updated storybook written to {}",
        report.stats.resolved,
        report.stats.total,
        args.out.display()
    );
    Ok(0)
}

fn run_plan(args: PlanArgs) -> Result<i32> {
    let manifest = args.manifest.load()?;
    let service_args = ServiceArgs {
        namespace: args.namespace.clone(),
        ..ServiceArgs::default()
    };
    let namespace = resolve_namespace(&service_args, &non_empty_env);
    let planned = plan(&manifest, &args.manifest.substitutions(), &namespace);

    if args.json {
        let rows = planned
            .iter()
            .map(|page| {
                json!({
                    "book_index": page.key.book,
                    "page_index": page.key.page,
                    "book_title": page.book_title,
                    "page_number": page.page_number,
                    "prompt": page.prompt,
                    "aspect_ratio": page.aspect.as_ratio(),
                    "blob_key": page.blob_key,
                })
            })
            .collect::<Vec<_>>();
        println!("{}", serde_json::to_string_pretty(&Value::Array(rows))?);
        return Ok(0);
    }
    for page in &planned {
        println!(
            "{} / page {} [{} {}] -> {}.*",
            page.book_title,
            page.page_number,
            page.aspect.label(),
            page.aspect.as_ratio(),
            page.blob_key
        );
        println!("  {}", page.prompt);
    }
    println!("{} pages planned", planned.len());
    Ok(0)
}

/// Writes the manifest before any page event, so a failing event log cannot cost the results.
fn save_run_results(out: &Path, events: &EventWriter, report: &RunReport) -> Result<()> {
    report.manifest.write(out)?;
    emit_page_events(events, report)
}

fn emit_page_events(events: &EventWriter, report: &RunReport) -> Result<()> {
    for preview in &report.previews {
        let mut payload = EventPayload::new();
        payload.insert("url".to_string(), Value::String(preview.url.clone()));
        events.emit_for_page("page_resolved", preview.key, payload)?;
    }
    for failure in &report.failures {
        let mut payload = EventPayload::new();
        payload.insert(
            "book_title".to_string(),
            Value::String(failure.book_title.clone()),
        );
        payload.insert("page_number".to_string(), json!(failure.page_number));
        payload.insert(
            "kind".to_string(),
            Value::String(failure.error.kind().to_string()),
        );
        payload.insert(
            "message".to_string(),
            Value::String(failure.error.to_string()),
        );
        events.emit_for_page("page_failed", failure.key, payload)?;
    }
    Ok(())
}

fn sibling_path(out: &Path, file_name: &str) -> PathBuf {
    out.with_file_name(file_name)
}

fn map_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
