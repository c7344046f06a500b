//! yt-dlp backed download adapter
//!
//! Every job runs one `yt-dlp` child process. Progress is parsed from stdout,
//! the last `ERROR:` line of stderr becomes the failure detail, and a cancel
//! request kills the child and deletes the partial files it left behind.

use parking_lot::Mutex;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::adapter::{DownloadAdapter, FetchHandle, FetchRequest, ProgressReporter};
use crate::core::config::DownloaderConfig;
use crate::core::models::{AppError, AppResult, JobSource};
use crate::core::settings::{DownloadSettings, SponsorBlockMode, SPONSORBLOCK_CATEGORIES};
use crate::downloaders::comments::write_comments_file;

/// `download:` selects the progress type and is not printed; lines come out
/// as the bare percentage (`  42.0%`)
const PROGRESS_TEMPLATE: &str = "download:%(progress._percent_str)s";

/// Share of a merged job spent downloading streams; the rest is the merge
const MERGED_DOWNLOAD_SHARE: f64 = 95.0;

/// Reported when ffmpeg starts merging the downloaded streams
const MERGE_PROGRESS: f64 = 99.0;

/// Upper bound for metadata-only calls (version checks, playlist listing)
const PROBE_TIMEOUT: Duration = Duration::from_secs(120);

/// Suffixes yt-dlp uses for in-progress output
const PARTIAL_SUFFIXES: [&str; 2] = [".part", ".ytdl"];

pub struct YtDlpAdapter {
    binary: PathBuf,
    download_dir: PathBuf,
    ffmpeg_location: Option<PathBuf>,
}

impl YtDlpAdapter {
    pub fn new(binary: impl Into<PathBuf>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            download_dir: download_dir.into(),
            ffmpeg_location: None,
        }
    }

    pub fn from_config(config: &DownloaderConfig) -> Self {
        Self::new(config.ytdlp_path.clone(), config.download_directory.clone())
            .with_ffmpeg_location(config.ffmpeg_location.clone())
    }

    pub fn with_ffmpeg_location(mut self, location: Option<PathBuf>) -> Self {
        self.ffmpeg_location = location;
        self
    }

    /// Directory a job writes into
    pub fn output_dir(&self, settings: &DownloadSettings) -> PathBuf {
        settings
            .custom_output_dir
            .clone()
            .unwrap_or_else(|| self.download_dir.clone())
    }

    /// Command-line arguments for downloading `target` with `settings`
    pub fn build_arguments(&self, target: &str, settings: &DownloadSettings) -> Vec<String> {
        let output = self.output_dir(settings).join(&settings.output_template);

        let mut args: Vec<String> = vec![
            "--newline".into(),
            "--no-playlist".into(),
            "--progress-template".into(),
            PROGRESS_TEMPLATE.into(),
            "-f".into(),
            settings.format.clone(),
            "-o".into(),
            output.to_string_lossy().into_owned(),
        ];

        if let Some(ext) = settings.final_ext.as_deref() {
            if settings.is_audio_target() {
                args.extend([
                    "-x".to_string(),
                    "--audio-format".to_string(),
                    ext.to_string(),
                    "--audio-quality".to_string(),
                    settings.quality.audio_quality().to_string(),
                ]);
            } else if settings.is_video_target() {
                args.extend(["--recode-video".to_string(), ext.to_string()]);
            }
        }

        if settings.embed_thumbnail {
            args.push("--embed-thumbnail".into());
        }
        if settings.add_metadata {
            args.push("--embed-metadata".into());
        }
        if settings.embeds_subtitles() {
            args.extend(["--write-subs", "--embed-subs"].map(String::from));
            if settings.write_auto_subs {
                args.push("--write-auto-subs".into());
            }
        }

        let categories = SPONSORBLOCK_CATEGORIES.join(",");
        match settings.sponsorblock {
            SponsorBlockMode::Off => {}
            SponsorBlockMode::Mark => args.extend(["--sponsorblock-mark".to_string(), categories]),
            SponsorBlockMode::Remove => {
                args.extend(["--sponsorblock-remove".to_string(), categories])
            }
        }

        if settings.extract_comments {
            // comments only land in the info JSON
            args.extend(["--write-comments", "--write-info-json"].map(String::from));
        }

        if let Some(location) = &self.ffmpeg_location {
            args.extend([
                "--ffmpeg-location".to_string(),
                location.to_string_lossy().into_owned(),
            ]);
        }

        args.extend(settings.extra_args.iter().cloned());
        args.push("--".into());
        args.push(target.to_string());
        args
    }

    /// `yt-dlp --version`
    pub async fn check_available(&self) -> AppResult<String> {
        let output = probe(&self.binary, &["--version"]).await?;
        let version = output.lines().next().unwrap_or_default().trim().to_string();
        info!("[yt-dlp] found version {}", version);
        Ok(version)
    }

    /// `ffmpeg -version`; needed for merging, conversion and embedding
    pub async fn check_ffmpeg(&self) -> AppResult<String> {
        let binary = match &self.ffmpeg_location {
            Some(location) if location.is_dir() => location.join("ffmpeg"),
            Some(location) => location.clone(),
            None => PathBuf::from("ffmpeg"),
        };
        let output = probe(&binary, &["-version"]).await?;
        Ok(output.lines().next().unwrap_or_default().trim().to_string())
    }
}

#[async_trait]
impl DownloadAdapter for YtDlpAdapter {
    fn name(&self) -> &str {
        "yt-dlp"
    }

    fn fetch(&self, request: FetchRequest, reporter: ProgressReporter) -> AppResult<FetchHandle> {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Adapter(format!("No tokio runtime for yt-dlp: {}", e)))?;

        let output_dir = self.output_dir(&request.settings);
        std::fs::create_dir_all(&output_dir)?;

        let target = request.source.adapter_target();
        let args = self.build_arguments(&target, &request.settings);
        debug!("[yt-dlp] {} {:?}", self.binary.display(), args);

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::Adapter(format!("Failed to start yt-dlp: {}", e)))?;

        let handle = FetchHandle::new(request.job_id.clone());
        runtime.spawn(supervise(
            child,
            handle.cancellation_token(),
            reporter,
            request.settings.extract_comments,
        ));

        info!("[yt-dlp] started {} for job {}", target, request.job_id);
        Ok(handle)
    }

    async fn resolve_entries(&self, source: &JobSource) -> AppResult<Vec<String>> {
        if !source.is_playlist() {
            return Ok(vec![source.as_str().to_string()]);
        }

        let output = probe(
            &self.binary,
            &["--flat-playlist", "--print", "url", "--", source.as_str()],
        )
        .await?;

        let entries: Vec<String> = output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && *line != "NA")
            .map(str::to_string)
            .collect();

        info!("[yt-dlp] playlist {} has {} entries", source, entries.len());
        Ok(entries)
    }
}

/// Drive one child process to completion or cancellation
async fn supervise(
    mut child: Child,
    cancel: CancellationToken,
    reporter: ProgressReporter,
    extract_comments: bool,
) {
    let job_id = reporter.job_id().to_string();
    let destinations: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));

    let stdout_task = child.stdout.take().map(|stdout| {
        let reporter = reporter.clone();
        let destinations = Arc::clone(&destinations);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut streams = 1u32;
            let mut phase = 0u32;
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(count) = parse_format_count(&line) {
                    streams = count;
                    continue;
                }
                if line.trim_start().starts_with("[Merger]") {
                    if let Some(dest) = parse_destination_line(&line) {
                        destinations.lock().push(PathBuf::from(dest));
                    }
                    reporter.progress(MERGE_PROGRESS);
                    continue;
                }
                if let Some(dest) = parse_destination_line(&line) {
                    phase += 1;
                    destinations.lock().push(PathBuf::from(dest));
                    continue;
                }
                if let Some(percent) = parse_progress_line(&line) {
                    reporter.progress(scale_progress(percent, phase, streams));
                }
            }
        })
    });

    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut last_error = None;
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(error) = parse_error_line(&line) {
                    last_error = Some(error.to_string());
                } else if !line.trim().is_empty() {
                    debug!("[yt-dlp] {}", line);
                }
            }
            last_error
        })
    });

    let status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                warn!("[yt-dlp] failed to kill process for job {}: {}", job_id, e);
            }
            if let Some(task) = stdout_task {
                let _ = task.await;
            }
            if let Some(task) = stderr_task {
                let _ = task.await;
            }
            let seen = destinations.lock().clone();
            let removed = cleanup_partial_files(&seen).await;
            info!("[yt-dlp] job {} cancelled, removed {} partial files", job_id, removed);
            reporter.fail("Download cancelled");
            return;
        }
    };

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    let last_error = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => None,
    };

    match status {
        Ok(status) if status.success() => {
            reporter.progress(100.0);
            if extract_comments {
                let output = destinations.lock().last().cloned();
                if let Some(output) = output {
                    if let Err(e) = write_comments_file(&output).await {
                        warn!("[yt-dlp] comment extraction failed for job {}: {}", job_id, e);
                    }
                }
            }
            reporter.succeed();
        }
        Ok(status) => {
            let detail = last_error.unwrap_or_else(|| format!("yt-dlp exited with {}", status));
            reporter.fail(detail);
        }
        Err(e) => reporter.fail(format!("yt-dlp process failed: {}", e)),
    }
}

/// Run a short yt-dlp/ffmpeg call and return its stdout
async fn probe(binary: &Path, args: &[&str]) -> AppResult<String> {
    let output = tokio::time::timeout(
        PROBE_TIMEOUT,
        Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| AppError::Adapter(format!("{} timed out", binary.display())))?
    .map_err(|e| AppError::Adapter(format!("Failed to run {}: {}", binary.display(), e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr
            .lines()
            .filter_map(parse_error_line)
            .last()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} exited with {}", binary.display(), output.status));
        return Err(AppError::Adapter(detail));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Map one stream's progress onto the whole job. With several streams each
/// gets an equal share of the download phase, leaving room for the merge.
fn scale_progress(percent: f64, phase: u32, streams: u32) -> f64 {
    if streams <= 1 {
        return percent;
    }
    let span = MERGED_DOWNLOAD_SHARE / f64::from(streams);
    let index = phase.saturating_sub(1).min(streams - 1);
    f64::from(index) * span + percent * span / 100.0
}

fn default_progress_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[download\]\s+(\d+(?:\.\d+)?)%").ok())
        .as_ref()
}

/// Percentage from a progress-template line (`  42.0%`, or `download: 42.0%`
/// from older releases) or a default `[download]  42.0% of ...` line
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("download:") {
        return rest.trim().trim_end_matches('%').trim().parse::<f64>().ok();
    }

    if let Some(caps) = default_progress_regex()?.captures(line) {
        return caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
    }

    if line.ends_with('%') && !line.starts_with('[') {
        return line
            .trim_end_matches('%')
            .split_whitespace()
            .last()?
            .parse::<f64>()
            .ok();
    }

    None
}

/// Number of streams yt-dlp is about to fetch, from
/// `[info] <id>: Downloading 1 format(s): 137+140`
pub fn parse_format_count(line: &str) -> Option<u32> {
    let rest = line.trim().strip_prefix("[info]")?;
    let (_, formats) = rest.split_once("format(s):")?;
    let formats = formats.trim();
    if formats.is_empty() {
        return None;
    }
    u32::try_from(formats.split('+').count()).ok()
}

pub fn parse_destination_line(line: &str) -> Option<&str> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix("[download] Destination:") {
        let path = rest.trim();
        if !path.is_empty() {
            return Some(path);
        }
    }

    if let Some(rest) = line.strip_prefix("[Merger] Merging formats into \"") {
        let path = rest.trim_end_matches('"');
        if !path.is_empty() {
            return Some(path);
        }
    }

    None
}

pub fn parse_error_line(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix("ERROR:")
        .map(str::trim)
        .filter(|detail| !detail.is_empty())
}

/// Delete `.part`, `.ytdl` and `.part-Frag*` files belonging to the given
/// destinations. Completed files are left alone. Returns how many were removed.
pub async fn cleanup_partial_files(destinations: &[PathBuf]) -> usize {
    let mut removed = 0usize;

    for dest in destinations {
        let Some(file_name) = dest.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let dir = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let fragment_prefix = format!("{}.part-Frag", file_name);
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_partial = PARTIAL_SUFFIXES
                .iter()
                .any(|suffix| name == format!("{}{}", file_name, suffix))
                || name.starts_with(&fragment_prefix)
                || (name == file_name && PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)));

            if is_partial {
                match tokio::fs::remove_file(entry.path()).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("[yt-dlp] could not remove {}: {}", name, e),
                }
            }
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::settings::Quality;
    use tempfile::tempdir;

    fn adapter() -> YtDlpAdapter {
        YtDlpAdapter::new("yt-dlp", "/downloads")
    }

    #[test]
    fn test_progress_template_lines() {
        assert_eq!(parse_progress_line("  45.2%"), Some(45.2));
        assert_eq!(parse_progress_line(" 100.0%"), Some(100.0));
        assert_eq!(parse_progress_line("download:  45.2%"), Some(45.2));
        assert_eq!(parse_progress_line("download:100%"), Some(100.0));
        assert_eq!(parse_progress_line("download:   N/A"), None);
        assert_eq!(parse_progress_line("   N/A%"), None);
        assert_eq!(parse_progress_line("[youtube] abc: 50%"), None);
    }

    #[test]
    fn test_format_count_lines() {
        assert_eq!(
            parse_format_count("[info] abc123: Downloading 1 format(s): 137+140"),
            Some(2)
        );
        assert_eq!(parse_format_count("[info] abc123: Downloading 1 format(s): 18"), Some(1));
        assert_eq!(parse_format_count("[info] Writing video metadata"), None);
        assert_eq!(parse_format_count("  45.2%"), None);
    }

    #[test]
    fn test_default_progress_lines() {
        assert_eq!(
            parse_progress_line("[download]  42.0% of   10.00MiB at  1.00MiB/s ETA 00:05"),
            Some(42.0)
        );
        assert_eq!(parse_progress_line("[download] 100% of 3.2MiB"), Some(100.0));
        assert_eq!(parse_progress_line("[info] Writing video subtitles"), None);
        assert_eq!(parse_progress_line(""), None);
    }

    #[test]
    fn test_destination_and_error_lines() {
        assert_eq!(
            parse_destination_line("[download] Destination: /tmp/video.f137.mp4"),
            Some("/tmp/video.f137.mp4")
        );
        assert_eq!(
            parse_destination_line("[Merger] Merging formats into \"/tmp/video.mp4\""),
            Some("/tmp/video.mp4")
        );
        assert_eq!(parse_destination_line("[download] Destination:"), None);

        assert_eq!(
            parse_error_line("ERROR: [youtube] abc: Video unavailable"),
            Some("[youtube] abc: Video unavailable")
        );
        assert_eq!(parse_error_line("WARNING: something"), None);
    }

    #[test]
    fn test_progress_scaling_follows_stream_count() {
        // a single stream, including `best` fallbacks of merge selectors
        assert_eq!(scale_progress(40.0, 1, 1), 40.0);
        assert_eq!(scale_progress(100.0, 1, 1), 100.0);

        assert_eq!(scale_progress(40.0, 1, 2), 19.0);
        assert_eq!(scale_progress(40.0, 2, 2), 66.5);
        assert_eq!(scale_progress(100.0, 2, 2), 95.0);
        assert_eq!(scale_progress(100.0, 5, 2), 95.0);
    }

    #[test]
    fn test_default_arguments() {
        let args = adapter().build_arguments("https://example.com/v", &DownloadSettings::default());

        assert_eq!(&args[..4], ["--newline", "--no-playlist", "--progress-template", PROGRESS_TEMPLATE]);
        assert!(args.windows(2).any(|w| w == ["-f", "bestvideo*+bestaudio/best"]));
        let output = Path::new("/downloads").join("%(title)s.%(ext)s");
        assert!(args
            .windows(2)
            .any(|w| w[0] == "-o" && w[1] == output.to_string_lossy()));
        assert_eq!(&args[args.len() - 2..], ["--", "https://example.com/v"]);
        assert!(!args.contains(&"-x".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--sponsorblock")));
    }

    #[test]
    fn test_audio_extraction_arguments() {
        let settings = DownloadSettings {
            format: "bestaudio/best".to_string(),
            final_ext: Some("mp3".to_string()),
            quality: Quality::Smallest,
            embed_thumbnail: true,
            add_metadata: true,
            sponsorblock: SponsorBlockMode::Remove,
            custom_output_dir: Some(PathBuf::from("/music")),
            extra_args: vec!["--limit-rate".to_string(), "1M".to_string()],
            ..DownloadSettings::default()
        };
        let args = adapter()
            .with_ffmpeg_location(Some(PathBuf::from("/opt/ffmpeg")))
            .build_arguments("ytsearch:lofi", &settings);

        assert!(args
            .windows(5)
            .any(|w| w == ["-x", "--audio-format", "mp3", "--audio-quality", "9"]));
        assert!(args.contains(&"--embed-thumbnail".to_string()));
        assert!(args.contains(&"--embed-metadata".to_string()));
        assert!(args
            .windows(2)
            .any(|w| w[0] == "--sponsorblock-remove" && w[1].starts_with("sponsor,intro,outro")));
        assert!(args.windows(2).any(|w| w == ["--ffmpeg-location", "/opt/ffmpeg"]));
        assert!(args.windows(2).any(|w| w == ["--limit-rate", "1M"]));
        assert!(args.iter().any(|a| a.starts_with("/music")));
        assert_eq!(args.last().map(String::as_str), Some("ytsearch:lofi"));
    }

    #[test]
    fn test_video_and_subtitle_arguments() {
        let settings = DownloadSettings {
            final_ext: Some("mkv".to_string()),
            write_auto_subs: true,
            sponsorblock: SponsorBlockMode::Mark,
            extract_comments: true,
            ..DownloadSettings::default()
        };
        let args = adapter().build_arguments("https://example.com/v", &settings);

        assert!(args.windows(2).any(|w| w == ["--recode-video", "mkv"]));
        assert!(args.contains(&"--write-subs".to_string()));
        assert!(args.contains(&"--embed-subs".to_string()));
        assert!(args.contains(&"--write-auto-subs".to_string()));
        assert!(args.contains(&"--sponsorblock-mark".to_string()));
        assert!(args.contains(&"--write-comments".to_string()));
        assert!(args.contains(&"--write-info-json".to_string()));
        assert!(!args.contains(&"-x".to_string()));

        let plain = adapter().build_arguments("https://example.com/v", &DownloadSettings::default());
        assert!(!plain.contains(&"--write-info-json".to_string()));
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_partial_artifacts() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("clip.mp4");
        for name in [
            "clip.mp4.part",
            "clip.mp4.ytdl",
            "clip.mp4.part-Frag3",
            "clip.mp4.part-Frag4.part",
            "clip.mp4",
            "other.mp4.part",
        ] {
            std::fs::write(dir.path().join(name), b"data").unwrap();
        }

        let removed = cleanup_partial_files(&[dest]).await;

        assert_eq!(removed, 4);
        assert!(dir.path().join("clip.mp4").exists());
        assert!(dir.path().join("other.mp4.part").exists());
        assert!(!dir.path().join("clip.mp4.part").exists());
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_start() {
        let dir = tempdir().unwrap();
        let adapter = YtDlpAdapter::new(dir.path().join("no-such-yt-dlp"), dir.path());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();

        let result = adapter.fetch(
            FetchRequest {
                job_id: "job-1".to_string(),
                source: JobSource::parse("https://example.com/v").unwrap(),
                settings: DownloadSettings::default().snapshot(),
            },
            ProgressReporter::new("job-1", tx),
        );

        assert!(matches!(result, Err(AppError::Adapter(_))));
        assert!(adapter.check_available().await.is_err());
    }

    #[cfg(unix)]
    mod child_process {
        use super::*;
        use crate::core::adapter::{AdapterEvent, FetchOutcome};
        use std::os::unix::fs::PermissionsExt;
        use tokio::time::timeout;

        /// Install a shell script standing in for yt-dlp; `@DIR@` expands to `dir`
        fn fake_ytdlp(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-yt-dlp");
            let body = body.replace("@DIR@", &dir.to_string_lossy());
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        async fn run_job(adapter: &YtDlpAdapter, settings: DownloadSettings) -> Vec<AdapterEvent> {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            adapter
                .fetch(
                    FetchRequest {
                        job_id: "job-1".to_string(),
                        source: JobSource::parse("https://example.com/watch?v=abc").unwrap(),
                        settings: settings.snapshot(),
                    },
                    ProgressReporter::new("job-1", tx),
                )
                .unwrap();

            let mut events = Vec::new();
            while let Some(event) = timeout(Duration::from_secs(10), rx.recv()).await.unwrap() {
                let done = matches!(event, AdapterEvent::Finished { .. });
                events.push(event);
                if done {
                    break;
                }
            }
            events
        }

        fn progress_values(events: &[AdapterEvent]) -> Vec<f64> {
            events
                .iter()
                .filter_map(|e| match e {
                    AdapterEvent::Progress { percent, .. } => Some(*percent),
                    _ => None,
                })
                .collect()
        }

        fn outcome(events: &[AdapterEvent]) -> Option<&FetchOutcome> {
            match events.last() {
                Some(AdapterEvent::Finished { outcome, .. }) => Some(outcome),
                _ => None,
            }
        }

        #[tokio::test]
        async fn test_merged_download_reports_scaled_progress() {
            let dir = tempfile::tempdir().unwrap();
            let script = fake_ytdlp(
                dir.path(),
                r#"echo "[info] abc: Downloading 1 format(s): 137+140"
echo "[download] Destination: @DIR@/clip.f137.mp4"
echo "  10.0%"
echo " 100.0%"
echo "[download] Destination: @DIR@/clip.f140.m4a"
echo "  50.0%"
echo "[Merger] Merging formats into \"@DIR@/clip.mp4\""
exit 0"#,
            );
            let adapter = YtDlpAdapter::new(script, dir.path());

            let events = run_job(&adapter, DownloadSettings::default()).await;

            assert_eq!(progress_values(&events), vec![4.75, 47.5, 71.25, 99.0, 100.0]);
            assert_eq!(outcome(&events), Some(&FetchOutcome::Success));
        }

        #[tokio::test]
        async fn test_single_stream_fallback_reaches_full_range() {
            let dir = tempfile::tempdir().unwrap();
            let script = fake_ytdlp(
                dir.path(),
                r#"echo "[info] abc: Downloading 1 format(s): 18"
echo "[download] Destination: @DIR@/clip.mp4"
echo "  30.0%"
echo "  80.0%"
exit 0"#,
            );
            let adapter = YtDlpAdapter::new(script, dir.path());

            let events = run_job(&adapter, DownloadSettings::default()).await;

            assert_eq!(progress_values(&events), vec![30.0, 80.0, 100.0]);
            assert_eq!(outcome(&events), Some(&FetchOutcome::Success));
        }

        #[tokio::test]
        async fn test_error_line_becomes_failure_detail() {
            let dir = tempfile::tempdir().unwrap();
            let script = fake_ytdlp(
                dir.path(),
                r#"echo "WARNING: retrying" >&2
echo "ERROR: [youtube] abc: Video unavailable" >&2
exit 1"#,
            );
            let adapter = YtDlpAdapter::new(script, dir.path());

            let events = run_job(&adapter, DownloadSettings::default()).await;

            assert!(progress_values(&events).is_empty());
            assert_eq!(
                outcome(&events),
                Some(&FetchOutcome::Failure("[youtube] abc: Video unavailable".to_string()))
            );
        }

        #[tokio::test]
        async fn test_comments_written_after_download() {
            let dir = tempfile::tempdir().unwrap();
            let script = fake_ytdlp(
                dir.path(),
                r#"cat > "@DIR@/clip.info.json" <<'JSON'
{"comments": [
  {"id": "a", "parent": "root", "author": "@ann", "text": "great", "timestamp": 5},
  {"id": "b", "parent": "a", "author": "@bob", "text": "yes", "timestamp": 6}
]}
JSON
echo "[download] Destination: @DIR@/clip.mp4"
echo " 100.0%"
exit 0"#,
            );
            let adapter = YtDlpAdapter::new(script, dir.path());
            let settings = DownloadSettings {
                extract_comments: true,
                ..DownloadSettings::default()
            };

            let events = run_job(&adapter, settings).await;

            assert_eq!(outcome(&events), Some(&FetchOutcome::Success));
            let comments = std::fs::read_to_string(dir.path().join("clip_comments.txt")).unwrap();
            assert_eq!(comments, "1. [5] @ann: great\n    ↳ 1.1 [6] @bob: yes");
        }
    }
}
