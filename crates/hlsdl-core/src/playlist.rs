//! Playlist Analyzer (§4.A): fetches and parses HLS master/media
//! playlists, with a page-scan fallback for pages that embed an `.m3u8`
//! URL rather than linking it directly. Grounded on the original
//! `analyzer.py`'s three-pass page scan and tag-by-tag line parser.

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::error::PlaylistError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionKind {
    None,
    Aes128,
    SampleAes,
    Custom,
}

#[derive(Debug, Clone)]
pub struct Variant {
    pub resolution: Option<(u32, u32)>,
    pub bandwidth: Option<u64>,
    pub codecs: Option<String>,
    pub url: Url,
}

#[derive(Debug, Clone)]
pub struct KeyInfo {
    pub method: String,
    pub uri: Option<String>,
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone)]
pub struct MediaPlaylist {
    pub segment_urls: Vec<Url>,
    pub total_duration_secs: f64,
    pub encryption: EncryptionKind,
    pub key_url: Option<Url>,
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone)]
pub enum PlaylistResult {
    Master(Vec<Variant>),
    Media(MediaPlaylist),
}

pub struct FetchConfig {
    pub user_agent: String,
    pub verify_ssl: bool,
    pub proxy: Option<String>,
    pub request_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "hlsdl/0.1".to_string(),
            verify_ssl: true,
            proxy: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

static RE_DIRECT_M3U8: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"https?://[^"'<>\s]+\.m3u8[^"'<>\s]*"#).unwrap());
static RE_JSON_M3U8: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(https?://[^"]+\.m3u8[^"]*)""#).unwrap());
static RE_API_ENDPOINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(https?://[^"]*/api/[^"]*)""#).unwrap());

static RE_STREAM_INF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#EXT-X-STREAM-INF:").unwrap());
static RE_RESOLUTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"RESOLUTION=(\d+)x(\d+)").unwrap());
static RE_BANDWIDTH: Lazy<Regex> = Lazy::new(|| Regex::new(r"BANDWIDTH=(\d+)").unwrap());
static RE_CODECS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"CODECS="([^"]+)""#).unwrap());

static RE_EXTINF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#EXTINF:([\d.]+)").unwrap());
static RE_KEY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#EXT-X-KEY:(.*)$").unwrap());
static RE_KEY_METHOD: Lazy<Regex> = Lazy::new(|| Regex::new(r"METHOD=(\w+)").unwrap());
static RE_KEY_URI: Lazy<Regex> = Lazy::new(|| Regex::new(r#"URI="([^"]+)""#).unwrap());
static RE_KEY_IV: Lazy<Regex> = Lazy::new(|| Regex::new(r"IV=0x([0-9a-fA-F]+)").unwrap());

/// Scans an HTML/JS page body for an `.m3u8` URL using three ordered
/// passes, stopping at the first that yields a candidate (§4.A).
pub fn scan_page_for_playlist_url(body: &str, base: &Url) -> Option<Url> {
    if let Some(m) = RE_DIRECT_M3U8.find(body) {
        if let Ok(u) = Url::parse(m.as_str()) {
            return Some(u);
        }
    }
    if let Some(cap) = RE_JSON_M3U8.captures(body) {
        if let Ok(u) = Url::parse(&cap[1]) {
            return Some(u);
        }
    }
    if let Some(cap) = RE_API_ENDPOINT.captures(body) {
        if let Ok(u) = base.join(&cap[1]) {
            return Some(u);
        }
    }
    None
}

fn resolve(base: &Url, candidate: &str) -> Result<Url, PlaylistError> {
    if let Ok(u) = Url::parse(candidate) {
        return Ok(u);
    }
    base.join(candidate)
        .map_err(|e| PlaylistError::InvalidUrl(format!("{candidate}: {e}")))
}

fn parse_hex_iv(hex_digits: &str) -> Option<[u8; 16]> {
    let bytes = hex::decode(hex_digits).ok()?;
    if bytes.len() != 16 {
        return None;
    }
    let mut iv = [0u8; 16];
    iv.copy_from_slice(&bytes);
    Some(iv)
}

fn parse_key_line(attrs: &str) -> KeyInfo {
    let method = RE_KEY_METHOD
        .captures(attrs)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| "NONE".to_string());
    let uri = RE_KEY_URI.captures(attrs).map(|c| c[1].to_string());
    let iv = RE_KEY_IV.captures(attrs).and_then(|c| parse_hex_iv(&c[1]));
    KeyInfo { method, uri, iv }
}

fn encryption_kind_for_method(method: &str) -> EncryptionKind {
    match method {
        "NONE" => EncryptionKind::None,
        "AES-128" => EncryptionKind::Aes128,
        "SAMPLE-AES" => EncryptionKind::SampleAes,
        _ => EncryptionKind::Custom,
    }
}

/// Parses a playlist body already known to be `#EXTM3U` text, resolving
/// relative URLs against `base` (§4.A).
pub fn parse_playlist(body: &str, base: &Url) -> Result<PlaylistResult, PlaylistError> {
    let mut lines = body.lines().peekable();
    let first = lines.next().unwrap_or("").trim();
    if first != "#EXTM3U" {
        return Err(PlaylistError::MissingHeader);
    }

    let is_master = RE_STREAM_INF.is_match(body);
    if is_master {
        parse_master(body, base)
    } else {
        parse_media(body, base)
    }
}

fn parse_master(body: &str, base: &Url) -> Result<PlaylistResult, PlaylistError> {
    let mut variants = Vec::new();
    let mut pending_attrs: Option<&str> = None;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if RE_STREAM_INF.is_match(line) {
            pending_attrs = Some(line);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if let Some(attrs) = pending_attrs.take() {
            let resolution = RE_RESOLUTION.captures(attrs).and_then(|c| {
                Some((c[1].parse().ok()?, c[2].parse().ok()?))
            });
            let bandwidth = RE_BANDWIDTH.captures(attrs).and_then(|c| c[1].parse().ok());
            let codecs = RE_CODECS.captures(attrs).map(|c| c[1].to_string());
            let url = resolve(base, line)?;
            variants.push(Variant {
                resolution,
                bandwidth,
                codecs,
                url,
            });
        }
    }

    if variants.is_empty() {
        return Err(PlaylistError::Empty);
    }
    Ok(PlaylistResult::Master(variants))
}

fn parse_media(body: &str, base: &Url) -> Result<PlaylistResult, PlaylistError> {
    let mut segment_urls = Vec::new();
    let mut total_duration_secs = 0.0;
    let mut current_key: Option<KeyInfo> = None;
    let mut last_duration: Option<f64> = None;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(cap) = RE_EXTINF.captures(line) {
            last_duration = cap[1].parse().ok();
            continue;
        }
        if let Some(cap) = RE_KEY.captures(line) {
            current_key = Some(parse_key_line(&cap[1]));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        segment_urls.push(resolve(base, line)?);
        total_duration_secs += last_duration.take().unwrap_or(0.0);
    }

    if segment_urls.is_empty() {
        return Err(PlaylistError::Empty);
    }

    let (encryption, key_url, iv) = match &current_key {
        Some(key) => {
            let kind = encryption_kind_for_method(&key.method);
            let key_url = key
                .uri
                .as_deref()
                .map(|u| resolve(base, u))
                .transpose()?;
            (kind, key_url, key.iv)
        }
        None => (EncryptionKind::None, None, None),
    };

    Ok(PlaylistResult::Media(MediaPlaylist {
        segment_urls,
        total_duration_secs,
        encryption,
        key_url,
        iv,
    }))
}

/// Optional headers to send alongside a playlist/segment request, learned
/// from the analyzer's fetch config.
pub fn default_headers(config: &FetchConfig) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("User-Agent".to_string(), config.user_agent.clone());
    headers
}

/// Fetches `url`'s body as bytes over a one-shot curl handle (§4.A step 1),
/// the same `curl::easy::Easy` GET pattern `downloader::segment` uses for
/// segments, applied here to playlists and key material.
pub fn fetch_url_bytes(
    url: &str,
    headers: &HashMap<String, String>,
    config: &FetchConfig,
) -> Result<Vec<u8>, PlaylistError> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(|e| PlaylistError::Fetch(e.to_string()))?;
    easy.follow_location(true)
        .map_err(|e| PlaylistError::Fetch(e.to_string()))?;
    easy.timeout(config.request_timeout)
        .map_err(|e| PlaylistError::Fetch(e.to_string()))?;
    easy.ssl_verify_peer(config.verify_ssl)
        .map_err(|e| PlaylistError::Fetch(e.to_string()))?;
    if let Some(proxy) = &config.proxy {
        easy.proxy(proxy).map_err(|e| PlaylistError::Fetch(e.to_string()))?;
    }

    let mut header_list = curl::easy::List::new();
    for (key, value) in headers {
        let _ = header_list.append(&format!("{key}: {value}"));
    }
    easy.http_headers(header_list)
        .map_err(|e| PlaylistError::Fetch(e.to_string()))?;

    let mut body = Vec::new();
    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(|e| PlaylistError::Fetch(e.to_string()))?;
        transfer.perform().map_err(|e| PlaylistError::Fetch(e.to_string()))?;
    }

    let status = easy.response_code().unwrap_or(0);
    if !(200..300).contains(&status) {
        return Err(PlaylistError::Fetch(format!("HTTP {status} fetching {url}")));
    }
    Ok(body)
}

/// Fetches and parses the playlist at `url` (§4.A). Master playlists are
/// followed to their first variant so callers always end up with a
/// `MediaPlaylist`; page-scan fallback runs when the body isn't a valid
/// `#EXTM3U` document.
pub fn analyze(url: &Url, config: &FetchConfig) -> Result<MediaPlaylist, PlaylistError> {
    let headers = default_headers(config);
    let body = fetch_url_bytes(url.as_str(), &headers, config)?;
    let text = String::from_utf8_lossy(&body).into_owned();

    let parsed = match parse_playlist(&text, url) {
        Ok(result) => result,
        Err(_) => {
            let found = scan_page_for_playlist_url(&text, url)
                .ok_or(PlaylistError::MissingHeader)?;
            let nested_body = fetch_url_bytes(found.as_str(), &headers, config)?;
            let nested_text = String::from_utf8_lossy(&nested_body).into_owned();
            parse_playlist(&nested_text, &found)?
        }
    };

    match parsed {
        PlaylistResult::Media(media) => Ok(media),
        PlaylistResult::Master(variants) => {
            let best = variants
                .iter()
                .max_by_key(|v| v.bandwidth.unwrap_or(0))
                .ok_or(PlaylistError::Empty)?;
            let variant_body = fetch_url_bytes(best.url.as_str(), &headers, config)?;
            let variant_text = String::from_utf8_lossy(&variant_body).into_owned();
            match parse_playlist(&variant_text, &best.url)? {
                PlaylistResult::Media(media) => Ok(media),
                PlaylistResult::Master(_) => Err(PlaylistError::Empty),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://cdn.example.com/video/").unwrap()
    }

    #[test]
    fn parses_master_playlist_variants() {
        let body = "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1920x1080,CODECS=\"avc1.640028\"\n\
1080p.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=640000,RESOLUTION=1280x720\n\
720p.m3u8\n";
        let result = parse_playlist(body, &base()).unwrap();
        match result {
            PlaylistResult::Master(variants) => {
                assert_eq!(variants.len(), 2);
                assert_eq!(variants[0].resolution, Some((1920, 1080)));
                assert_eq!(variants[0].bandwidth, Some(1280000));
                assert_eq!(variants[0].codecs.as_deref(), Some("avc1.640028"));
                assert_eq!(variants[0].url.as_str(), "https://cdn.example.com/video/1080p.m3u8");
                assert_eq!(variants[1].codecs, None);
            }
            _ => panic!("expected master playlist"),
        }
    }

    #[test]
    fn parses_media_playlist_with_key() {
        let body = "#EXTM3U\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\",IV=0x00000000000000000000000000000001\n\
#EXTINF:6.000,\n\
seg0.ts\n\
#EXTINF:6.000,\n\
seg1.ts\n";
        let result = parse_playlist(body, &base()).unwrap();
        match result {
            PlaylistResult::Media(m) => {
                assert_eq!(m.segment_urls.len(), 2);
                assert_eq!(m.total_duration_secs, 12.0);
                assert_eq!(m.encryption, EncryptionKind::Aes128);
                assert_eq!(m.key_url.unwrap().as_str(), "https://cdn.example.com/video/key.bin");
                assert!(m.iv.is_some());
            }
            _ => panic!("expected media playlist"),
        }
    }

    #[test]
    fn media_playlist_without_key_has_no_encryption() {
        let body = "#EXTM3U\n#EXTINF:4.0,\nseg0.ts\n";
        let result = parse_playlist(body, &base()).unwrap();
        match result {
            PlaylistResult::Media(m) => {
                assert_eq!(m.encryption, EncryptionKind::None);
                assert!(m.key_url.is_none());
            }
            _ => panic!("expected media playlist"),
        }
    }

    #[test]
    fn missing_header_is_an_error() {
        let result = parse_playlist("not a playlist\n", &base());
        assert!(matches!(result, Err(PlaylistError::MissingHeader)));
    }

    #[test]
    fn empty_media_playlist_is_an_error() {
        let result = parse_playlist("#EXTM3U\n", &base());
        assert!(matches!(result, Err(PlaylistError::Empty)));
    }

    #[test]
    fn page_scan_finds_direct_m3u8_url() {
        let body = r#"<video src="https://cdn.example.com/stream/master.m3u8"></video>"#;
        let found = scan_page_for_playlist_url(body, &base()).unwrap();
        assert_eq!(found.as_str(), "https://cdn.example.com/stream/master.m3u8");
    }

    #[test]
    fn page_scan_falls_back_to_json_embedded_url() {
        let body = r#"{"sources":["https://cdn.example.com/stream/master.m3u8?token=abc"]}"#;
        let found = scan_page_for_playlist_url(body, &base()).unwrap();
        assert_eq!(
            found.as_str(),
            "https://cdn.example.com/stream/master.m3u8?token=abc"
        );
    }

    #[test]
    fn key_without_iv_is_valid() {
        let body = "#EXTM3U\n\
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n\
#EXTINF:6.000,\n\
seg0.ts\n";
        let result = parse_playlist(body, &base()).unwrap();
        match result {
            PlaylistResult::Media(m) => {
                assert!(m.key_url.is_some());
                assert!(m.iv.is_none());
            }
            _ => panic!("expected media playlist"),
        }
    }
}
