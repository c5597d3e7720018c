//! Display filename derivation.
//!
//! Names end up inside a `Content-Disposition` header and a Telegram reply,
//! so the output is restricted to `[A-Za-z0-9_.-]`.

use std::sync::OnceLock;

use regex::Regex;

pub const MAX_NAME_LEN: usize = 255;
const MAX_EXT_LEN: usize = 16;
const DEFAULT_EXT: &str = "dat";

/// Everything the display name can be derived from.
#[derive(Clone, Copy, Debug, Default)]
pub struct NameSource<'a> {
    /// Filename supplied by the uploader (documents, videos, audio).
    pub original_name: Option<&'a str>,
    /// Provider-side path, e.g. `documents/file_12.pdf`.
    pub provider_path: Option<&'a str>,
    pub mime_type: Option<&'a str>,
    /// Unix millis used for synthesized names.
    pub timestamp_ms: i64,
}

/// Derive a safe display name. Pure: equal inputs give equal outputs.
pub fn derive_display_name(src: &NameSource<'_>) -> String {
    let fallback_stem = format!("file_{}", src.timestamp_ms);

    let base = src
        .original_name
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| src.provider_path.and_then(last_segment))
        .unwrap_or(&fallback_stem);

    let clean = sanitize(base);
    let (stem, ext) = match split_extension(&clean) {
        Some((stem, ext)) => (stem, Some(ext.to_string())),
        None => (clean.as_str(), None),
    };

    let stem = stem
        .trim_start_matches(&['_', '.', '-'][..])
        .trim_end_matches(&['_', '.'][..]);
    let stem = if stem.is_empty() {
        fallback_stem.as_str()
    } else {
        stem
    };

    let ext = ext
        .or_else(|| src.provider_path.and_then(extension_from_path))
        .or_else(|| src.mime_type.and_then(extension_from_mime))
        .unwrap_or_else(|| DEFAULT_EXT.to_string());

    // Sanitized text is ASCII, so byte offsets are char offsets.
    let max_stem = MAX_NAME_LEN - 1 - ext.len();
    let stem = if stem.len() > max_stem {
        stem[..max_stem].trim_end_matches(&['_', '.'][..])
    } else {
        stem
    };

    format!("{stem}.{ext}")
}

/// Replace unsafe characters with `_`, collapse runs and trim the edges.
pub fn sanitize(raw: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    static RUNS: OnceLock<Regex> = OnceLock::new();

    let unsafe_re = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_.\-]").expect("valid regex"));
    let runs_re = RUNS.get_or_init(|| Regex::new(r"_{2,}").expect("valid regex"));

    let replaced = unsafe_re.replace_all(raw, "_");
    let collapsed = runs_re.replace_all(&replaced, "_");
    collapsed
        .trim_start_matches('_')
        .trim_end_matches(&['_', '.'][..])
        .to_string()
}

/// Split `name` into stem and extension when it ends in `.<alnum{1,16}>`.
/// The stem may be empty (`.pdf`); callers substitute a synthesized one.
fn split_extension(name: &str) -> Option<(&str, &str)> {
    let (stem, ext) = name.rsplit_once('.')?;
    is_extension(ext).then_some((stem, ext))
}

fn is_extension(ext: &str) -> bool {
    !ext.is_empty() && ext.len() <= MAX_EXT_LEN && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn last_segment(path: &str) -> Option<&str> {
    path.rsplit('/').next().map(str::trim).filter(|s| !s.is_empty())
}

fn extension_from_path(path: &str) -> Option<String> {
    let clean = sanitize(last_segment(path)?);
    split_extension(&clean).map(|(_, ext)| ext.to_ascii_lowercase())
}

fn extension_from_mime(mime: &str) -> Option<String> {
    let essence = mime.split(';').next()?.trim();
    let (_, subtype) = essence.split_once('/')?;
    let subtype = subtype.split('+').next()?.to_ascii_lowercase();
    let subtype = subtype.strip_prefix("x-").unwrap_or(&subtype);
    let subtype = subtype.rsplit('.').next().unwrap_or(subtype);

    let ext = match subtype {
        "jpeg" => "jpg".to_string(),
        "plain" => "txt".to_string(),
        "octet-stream" => "bin".to_string(),
        "quicktime" => "mov".to_string(),
        other => other
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(MAX_EXT_LEN)
            .collect(),
    };
    (!ext.is_empty()).then_some(ext)
}
