//! Plain-text extraction from decrypted message bodies.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

/// Wrap width handed to the HTML renderer. Lines are joined again
/// afterwards, so it only needs to exceed typical word lengths.
const RENDER_WIDTH: usize = 1_000;

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Returns the searchable text of a body.
///
/// HTML bodies are rendered to undecorated text, which drops markup,
/// scripts and styles and decodes character references. Everything ends
/// up with collapsed whitespace.
pub fn extract_text(body: &str, mime_type: Option<&str>) -> String {
    let is_html = match mime_type {
        Some(mime) => mime.eq_ignore_ascii_case("text/html"),
        None => looks_like_html(body),
    };

    if is_html {
        collapse_whitespace(&html_to_text(body))
    } else {
        collapse_whitespace(body)
    }
}

fn looks_like_html(body: &str) -> bool {
    let trimmed = body.trim_start();
    let head = trimmed.get(..trimmed.len().min(512)).unwrap_or(trimmed);
    let lower = head.to_ascii_lowercase();
    lower.starts_with("<!doctype html") || lower.contains("<html") || lower.contains("<body")
}

fn html_to_text(html: &str) -> String {
    let rendered =
        html2text::config::plain_no_decorate().string_from_read(html.as_bytes(), RENDER_WIDTH);
    match rendered {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "HTML rendering failed, indexing raw body");
            html.to_string()
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text.trim(), " ").into_owned()
}
