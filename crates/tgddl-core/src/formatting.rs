//! Formatting utilities for Telegram HTML replies.

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Human-readable byte size (`512 B`, `1.5 KB`, `20.0 MB`, `2.00 GB`).
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Reply sent after a successful ingestion.
pub fn link_message(url: &str, display_name: &str, size: Option<u64>) -> String {
    let url = escape_html(url);
    let mut out = format!(
        "🌐 <b>Permanent Download Link</b>:\n\n<a href=\"{url}\">{url}</a>\n\n📁 File: {}",
        escape_html(display_name)
    );
    if let Some(size) = size {
        out.push_str(&format!("\n📦 Size: {}", format_bytes(size)));
    }
    out
}
