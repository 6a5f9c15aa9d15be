//! The `thumbsmith run` command: upload images and wait for their thumbnails.

use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use serde::Serialize;
use thumbsmith_core::{
    Config, Dimensions, FileDiscovery, JsonlSink, LogSink, ObjectId, ReportSink, Thumbsmith,
    WorkerStats,
};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image files or directories to upload
    #[arg(required_unless_present = "photo_ids")]
    pub paths: Vec<PathBuf>,

    /// User recorded as the owner of each upload
    #[arg(short, long, default_value = "local", env = "THUMBSMITH_USER")]
    pub user: String,

    /// Re-enqueue an already stored photo (can be repeated)
    #[arg(long = "photo-id", value_name = "ID")]
    pub photo_ids: Vec<String>,

    /// Number of tasks processed in parallel
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Append failure reports to this JSONL file
    #[arg(long, value_name = "FILE")]
    pub reports: Option<PathBuf>,
}

/// Per-photo line printed to stdout once the queue drains.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PhotoSummary {
    photo_id: ObjectId,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumb_id: Option<ObjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<Dimensions>,
}

/// Execute the run command.
pub async fn execute(args: RunArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(concurrency) = args.concurrency {
        config.worker.concurrency = concurrency;
    }
    config.validate()?;

    let photo_ids = args
        .photo_ids
        .iter()
        .map(|raw| super::parse_photo_id(raw))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let discovery = FileDiscovery::new(&config.ingest);
    let mut files = Vec::new();
    for raw in &args.paths {
        let path = PathBuf::from(shellexpand::tilde(&raw.to_string_lossy()).into_owned());
        if !path.exists() {
            anyhow::bail!("Path not found: {}", path.display());
        }
        files.extend(discovery.discover(&path));
    }
    if files.is_empty() && photo_ids.is_empty() {
        tracing::warn!("No supported images found");
        return Ok(());
    }
    let total_bytes = FileDiscovery::total_size(&files);
    tracing::info!(
        files = files.len(),
        photos = photo_ids.len(),
        total_bytes,
        "Starting run"
    );

    let reports: Arc<dyn ReportSink> = match &args.reports {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Arc::new(JsonlSink::new(BufWriter::new(file)))
        }
        None => Arc::new(LogSink),
    };

    let thumbsmith = Thumbsmith::open(config).await?;
    let worker = thumbsmith.start_worker(reports).await?;
    let ingestor = thumbsmith.ingestor();
    let start = Instant::now();

    let mut submitted: Vec<(ObjectId, Option<PathBuf>)> = Vec::new();
    let mut rejected = 0u64;
    for file in &files {
        match ingestor.upload_file(&file.path, &args.user).await {
            Ok(id) => submitted.push((id, Some(file.path.clone()))),
            Err(e) => {
                tracing::warn!(path = %file.path.display(), "Upload rejected: {e}");
                rejected += 1;
            }
        }
    }
    for id in photo_ids {
        match thumbsmith.catalog().photo(&id).await? {
            Some(_) => {
                ingestor.enqueue(&id).await?;
                submitted.push((id, None));
            }
            None => {
                tracing::warn!(photo_id = %id, "Photo not found, not enqueued");
                rejected += 1;
            }
        }
    }

    let pb = create_progress_bar(submitted.len() as u64)?;
    pb.set_message("processing...");
    {
        let idle = thumbsmith.wait_idle();
        tokio::pin!(idle);
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        loop {
            tokio::select! {
                _ = &mut idle => break,
                _ = tick.tick() => pb.set_position(worker.stats().acked()),
            }
        }
    }
    let stats = worker.stop().await;
    pb.set_position(stats.acked());
    pb.finish_with_message("done");

    let catalog = thumbsmith.catalog();
    for (photo_id, path) in submitted {
        let photo = catalog.photo(&photo_id).await?;
        let (status, thumb_id, dimensions) = match photo {
            Some(p) if p.is_processed() => ("done", p.thumb_id, p.dimensions),
            Some(_) => ("failed", None, None),
            None => ("missing", None, None),
        };
        let summary = PhotoSummary {
            photo_id,
            path,
            status,
            thumb_id,
            dimensions,
        };
        println!("{}", serde_json::to_string(&summary)?);
    }

    print_summary(&stats, rejected, total_bytes, start.elapsed());
    Ok(())
}

/// Create a progress bar tracking acknowledged tasks.
fn create_progress_bar(total: u64) -> anyhow::Result<indicatif::ProgressBar> {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
            )?
            .progress_chars("##-"),
    );
    pb.set_message("starting...");
    Ok(pb)
}

/// Print a formatted summary table after the queue drains.
fn print_summary(stats: &WorkerStats, rejected: u64, total_bytes: u64, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        stats.acked() as f64 / secs
    } else {
        0.0
    };

    eprintln!();
    eprintln!("  ====================================");
    eprintln!("               Summary");
    eprintln!("  ====================================");
    eprintln!("    Completed:    {:>8}", stats.completed);
    if stats.skipped > 0 {
        eprintln!("    Skipped:      {:>8}", stats.skipped);
    }
    if stats.superseded > 0 {
        eprintln!("    Superseded:   {:>8}", stats.superseded);
    }
    if stats.failed > 0 {
        eprintln!("    Failed:       {:>8}", stats.failed);
    }
    if stats.requeued > 0 {
        eprintln!("    Retries:      {:>8}", stats.requeued);
    }
    if rejected > 0 {
        eprintln!("    Rejected:     {:>8}", rejected);
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Uploaded:     {:>7.1} MB", total_bytes as f64 / 1_000_000.0);
    eprintln!("    Duration:     {:>7.1}s", secs);
    eprintln!("    Rate:         {:>7.1} img/sec", rate);
    eprintln!("  ====================================");
}
