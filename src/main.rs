//! Headless command-line front end for the download queue

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use media_queue::core::manager::EventReceiver;
use media_queue::utils::logging::init_tracing;
use media_queue::{AppConfig, AppState, QueueEvent, QueueStats, YtDlpAdapter, NAME, VERSION};
use tracing::{info, warn};

const USAGE: &str = "Usage: media-queue [--preset NAME] [--concurrency N] [--output DIR] [--config PATH] SOURCE...

SOURCE is a media URL, a playlist URL or a search query.";

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    preset: Option<String>,
    concurrency: Option<usize>,
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    help: bool,
    sources: Vec<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value_for = |flag: &str| {
            args.next()
                .ok_or_else(|| format!("{} expects a value", flag))
        };

        match arg.as_str() {
            "-h" | "--help" => parsed.help = true,
            "--preset" => parsed.preset = Some(value_for("--preset")?),
            "--concurrency" => {
                let value = value_for("--concurrency")?;
                let limit = value
                    .parse::<usize>()
                    .map_err(|_| format!("invalid concurrency: {}", value))?;
                if !(1..=20).contains(&limit) {
                    return Err(format!("concurrency must be between 1 and 20, got {}", limit));
                }
                parsed.concurrency = Some(limit);
            }
            "--output" => parsed.output = Some(PathBuf::from(value_for("--output")?)),
            "--config" => parsed.config = Some(PathBuf::from(value_for("--config")?)),
            "--" => parsed.sources.extend(args.by_ref()),
            flag if flag.starts_with("--") => return Err(format!("unknown option: {}", flag)),
            _ => parsed.sources.push(arg),
        }
    }

    Ok(parsed)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(error) => {
            eprintln!("Error: {error}\n\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    if args.help {
        println!("{} v{}\n\n{}", NAME, VERSION, USAGE);
        return ExitCode::SUCCESS;
    }
    if args.sources.is_empty() {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    }

    let mut config = AppConfig::load_or_default(args.config.as_deref());
    init_tracing(&config.logging.level);

    if let Some(limit) = args.concurrency {
        config.queue.concurrency_limit = limit;
    }
    if let Some(output) = args.output {
        config.downloader.download_directory = output;
    }
    if let Some(preset) = args.preset {
        if config.presets.get(&preset).is_none() {
            eprintln!(
                "Error: unknown preset '{}' (available: {})",
                preset,
                config.presets.names().join(", ")
            );
            return ExitCode::from(2);
        }
        config.active_preset = preset;
    }

    let checker = YtDlpAdapter::from_config(&config.downloader);
    if let Err(error) = checker.check_available().await {
        eprintln!("Error: yt-dlp is not available: {error}");
        return ExitCode::FAILURE;
    }
    if let Err(error) = checker.check_ffmpeg().await {
        warn!("ffmpeg not found ({}); merging and conversion will fail", error);
    }

    match run(config, args.sources).await {
        Ok(stats) if stats.failed_jobs == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(error) => {
            eprintln!("Error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig, sources: Vec<String>) -> anyhow::Result<QueueStats> {
    let state = AppState::with_ytdlp(config)?;
    info!(
        "Using preset '{}' with {} slots",
        state.config.active_preset, state.config.queue.concurrency_limit
    );

    let events = state.queue.subscribe().await?;
    let printer = tokio::spawn(print_events(events));

    let rejected = state.submit(&sources).await?;
    for (source, error) in &rejected {
        eprintln!("Skipping '{}': {}", source, error);
    }
    let rejected = rejected.len();

    // already running under auto_start; this only tops up free slots
    state.queue.start_all().await?;

    let stats = tokio::select! {
        stats = state.queue.wait_until_idle() => stats?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, cancelling remaining downloads...");
            state.queue.cancel_all().await?;
            state.queue.wait_until_idle().await?
        }
    };

    state.queue.shutdown().await?;
    // the router dropped its subscribers; let the printer flush and exit
    let _ = printer.await;

    println!(
        "Done: {} completed, {} failed, {} cancelled, {} rejected",
        stats.completed_jobs, stats.failed_jobs, stats.cancelled_jobs, rejected
    );

    Ok(QueueStats {
        failed_jobs: stats.failed_jobs + rejected,
        ..stats
    })
}

/// Print one line per state change; progress only every 10%
async fn print_events(mut events: EventReceiver) {
    let mut labels: HashMap<String, String> = HashMap::new();
    let mut printed_steps: HashMap<String, u32> = HashMap::new();

    while let Some(event) = events.recv().await {
        match event {
            QueueEvent::JobQueued { job } => {
                println!("queued    {}", job.source);
                labels.insert(job.id, job.source.to_string());
            }
            QueueEvent::JobStarted { job_id } => {
                println!("started   {}", label(&labels, &job_id));
            }
            QueueEvent::JobProgress { job_id, percent } => {
                let step = (percent / 10.0).floor() as u32;
                if printed_steps.get(&job_id).map_or(true, |last| step > *last) {
                    println!("{:>7.1}%  {}", percent, label(&labels, &job_id));
                    printed_steps.insert(job_id, step);
                }
            }
            QueueEvent::JobCompleted { job_id } => {
                println!("completed {}", label(&labels, &job_id));
            }
            QueueEvent::JobFailed { job_id, error } => {
                println!("failed    {}: {}", label(&labels, &job_id), error);
            }
            QueueEvent::JobCancelled { job_id, forced } => {
                let suffix = if forced { " (forced)" } else { "" };
                println!("cancelled {}{}", label(&labels, &job_id), suffix);
            }
            QueueEvent::JobRemoved { .. } | QueueEvent::StatsUpdated { .. } => {}
        }
    }
}

fn label<'a>(labels: &'a HashMap<String, String>, job_id: &'a str) -> &'a str {
    labels.get(job_id).map(String::as_str).unwrap_or(job_id)
}
