//! URL and input validation utilities

use anyhow::{anyhow, Result};
use url::Url;

/// Parse a media URL, requiring an http(s) scheme and a host
pub fn validate_media_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| anyhow!("Invalid URL format: {}", e))?;
    if !is_http_scheme(&parsed) {
        return Err(anyhow!("Unsupported scheme: {}", parsed.scheme()));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("URL has no host"));
    }
    Ok(parsed)
}

fn is_http_scheme(url: &Url) -> bool {
    let scheme = url.scheme();
    scheme == "http" || scheme == "https"
}

/// Playlist links carry `playlist?` in the path or a `list=` query parameter
pub fn is_playlist_url(url: &Url) -> bool {
    url.path().trim_end_matches('/').ends_with("/playlist")
        || url.query_pairs().any(|(key, _)| key == "list")
}

/// Preset names are shown in menus and used as map keys
pub fn is_valid_preset_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && trimmed == name && !name.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_media_url() {
        assert!(validate_media_url("https://example.com/watch?v=1").is_ok());
        assert!(validate_media_url("http://example.com").is_ok());
        assert!(validate_media_url("ftp://example.com/a.mp4").is_err());
        assert!(validate_media_url("not a url").is_err());
    }

    #[test]
    fn test_playlist_url() {
        let url = Url::parse("https://www.youtube.com/playlist?list=PLx").unwrap();
        assert!(is_playlist_url(&url));
        let url = Url::parse("https://www.youtube.com/watch?v=a&list=PLx").unwrap();
        assert!(is_playlist_url(&url));
        let url = Url::parse("https://www.youtube.com/watch?v=a").unwrap();
        assert!(!is_playlist_url(&url));
    }

    #[test]
    fn test_preset_names() {
        assert!(is_valid_preset_name("audio only"));
        assert!(!is_valid_preset_name(""));
        assert!(!is_valid_preset_name(" padded "));
    }
}
