//! Markdown → chat text, and splitting long replies into sendable chunks.
//!
//! Chat surfaces render a small markup subset (`*bold*`, no headings, no
//! link syntax), so agent Markdown is flattened line by line.  Fenced code
//! blocks pass through untouched.

use std::sync::OnceLock;

use regex::Regex;

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"\[([^\]]+)\]\(([^)\s]+)\)")
}

fn bold_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"\*\*(.+?)\*\*|__(.+?)__")
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"^\s{0,3}#{1,6}\s+(.*?)[\s#]*$")
}

fn bullet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    compiled(&RE, r"^(\s*)[-+*]\s+(.*)$")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Markdown flattening
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert agent Markdown into chat markup.
pub fn to_chat(markdown: &str) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut in_fence = false;

    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            out.push(line.to_owned());
        } else if in_fence {
            out.push(line.to_owned());
        } else {
            out.push(convert_line(line));
        }
    }

    out.join("\n")
}

fn convert_line(line: &str) -> String {
    let line = link_re().replace_all(line, "$1 ($2)");
    let line = bold_re().replace_all(&line, "*${1}${2}*");

    if let Some(caps) = heading_re().captures(&line) {
        let title = caps[1].replace('*', "");
        let title = title.trim();
        return if title.is_empty() {
            String::new()
        } else {
            format!("*{title}*")
        };
    }

    if let Some(caps) = bullet_re().captures(&line) {
        return format!("{}• {}", &caps[1], &caps[2]);
    }

    line.into_owned()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split `text` into pieces of at most `max_chars` characters.
///
/// Prefers paragraph breaks, then line breaks, then spaces; a run with
/// none of those is cut at the character limit.  Empty pieces are dropped.
pub fn chunk(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    loop {
        // Byte offset of the first character past the limit.
        let Some((limit, _)) = rest.char_indices().nth(max_chars) else {
            push_trimmed(&mut chunks, rest);
            break;
        };
        let window = &rest[..limit];

        let (cut, skip) = if let Some(i) = window.rfind("\n\n").filter(|&i| i > 0) {
            (i, 2)
        } else if let Some(i) = window.rfind('\n').filter(|&i| i > 0) {
            (i, 1)
        } else if let Some(i) = window.rfind(' ').filter(|&i| i > 0) {
            (i, 1)
        } else {
            (limit, 0)
        };

        push_trimmed(&mut chunks, &rest[..cut]);
        rest = &rest[cut + skip..];
    }

    chunks
}

fn push_trimmed(chunks: &mut Vec<String>, piece: &str) {
    let piece = piece.trim_end();
    let piece = piece.trim_start_matches('\n');
    if !piece.is_empty() {
        chunks.push(piece.to_owned());
    }
}
