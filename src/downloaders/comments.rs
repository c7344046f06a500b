//! Readable comment dumps built from yt-dlp's `.info.json`
//!
//! yt-dlp stores comments as a flat list where replies point at their parent
//! through the `parent` field. Some extractors nest them under `replies`
//! instead; both shapes are rendered as one numbered thread per top-level
//! comment.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use crate::core::models::{AppError, AppResult};

/// `.info.json` written next to a downloaded file.
///
/// Intermediate stream files (`clip.f137.mp4`) share the info file of the
/// merged output (`clip.info.json`).
pub fn info_json_path(media_file: &Path) -> PathBuf {
    media_file.with_file_name(format!("{}.info.json", base_name(media_file)))
}

/// `<name>_comments.txt` next to the downloaded file
pub fn comments_path(media_file: &Path) -> PathBuf {
    media_file.with_file_name(format!("{}_comments.txt", base_name(media_file)))
}

fn base_name(media_file: &Path) -> String {
    let stem = media_file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match stem.rsplit_once(".f") {
        Some((base, format_id))
            if !base.is_empty()
                && !format_id.is_empty()
                && format_id.chars().all(|c| c.is_ascii_digit()) =>
        {
            base.to_string()
        }
        _ => stem,
    }
}

fn field(comment: &Value, key: &str, fallback: &str) -> String {
    match comment.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    }
}

fn render_line(comment: &Value) -> String {
    format!(
        "[{}] {}: {}",
        field(comment, "timestamp", "Unknown Timestamp"),
        field(comment, "author", "Unknown Author"),
        field(comment, "text", "No text available"),
    )
}

/// Render the comments of an info document; `None` when it carries none
pub fn render_comments(info: &Value) -> Option<(usize, String)> {
    let comments = info.get("comments")?.as_array()?;

    let is_top_level = |c: &Value| match c.get("parent").and_then(Value::as_str) {
        None | Some("root") => true,
        Some(_) => false,
    };

    let mut lines = Vec::new();
    for (idx, comment) in comments.iter().filter(|c| is_top_level(c)).enumerate() {
        let idx = idx + 1;
        lines.push(format!("{}. {}", idx, render_line(comment)));

        let nested = comment
            .get("replies")
            .and_then(Value::as_array)
            .into_iter()
            .flatten();
        let id = comment.get("id").and_then(Value::as_str);
        let flat = comments.iter().filter(|c| {
            id.is_some() && c.get("parent").and_then(Value::as_str) == id
        });

        for (reply_idx, reply) in nested.chain(flat).enumerate() {
            lines.push(format!("    ↳ {}.{} {}", idx, reply_idx + 1, render_line(reply)));
        }
    }

    Some((comments.len(), lines.join("\n")))
}

/// Write `<name>_comments.txt` for a finished download. Returns the number of
/// comments written.
pub async fn write_comments_file(media_file: &Path) -> AppResult<usize> {
    let info_path = info_json_path(media_file);
    let raw = tokio::fs::read_to_string(&info_path).await.map_err(|e| {
        AppError::Adapter(format!("info.json not found at {}: {}", info_path.display(), e))
    })?;
    let info: Value = serde_json::from_str(&raw).map_err(|e| {
        AppError::Adapter(format!("Malformed {}: {}", info_path.display(), e))
    })?;

    let Some((count, body)) = render_comments(&info) else {
        warn!("[comments] {} has no comments", info_path.display());
        return Ok(0);
    };

    let target = comments_path(media_file);
    tokio::fs::write(&target, body).await?;
    info!("[comments] extracted {} comments to {}", count, target.display());
    Ok(count)
}
