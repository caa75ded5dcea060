//! Agent stdout/stderr interpretation.
//!
//! The agent writes one JSON record per line.  Only records with
//! `"type": "result"` are authoritative; they carry the reply text in
//! `result` and the continuity token in `session_id`.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Reply extracted from a result record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
    pub session_id: Option<String>,
}

impl From<Record> for AgentReply {
    fn from(r: Record) -> Self {
        Self {
            text: r.result.unwrap_or_default(),
            session_id: r.session_id.filter(|s| !s.is_empty()),
        }
    }
}

/// Extract the reply from agent stdout.
///
/// Scans lines from the end and takes the first (i.e. last emitted) record
/// tagged `result`.  Failing that, the whole trimmed output is tried as a
/// single record.  `None` means no structured record could be extracted.
pub fn parse_reply(stdout: &str) -> Option<AgentReply> {
    for line in stdout.lines().rev() {
        let line = line.trim();
        if !line.starts_with('{') {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<Record>(line) {
            if record.kind.as_deref() == Some("result") {
                return Some(record.into());
            }
        }
    }

    let whole = stdout.trim();
    if whole.is_empty() {
        return None;
    }
    let value = serde_json::from_str::<serde_json::Value>(whole).ok()?;
    if !value.is_object() {
        return None;
    }
    serde_json::from_value::<Record>(value).ok().map(AgentReply::from)
}

/// Raw-text reply for output that held no structured record.
///
/// Returns `None` when stdout is blank.  Longer output is cut to
/// `max_chars` characters and marked with a trailing ellipsis.
pub fn fallback_text(stdout: &str, max_chars: usize) -> Option<String> {
    let raw = stdout.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.char_indices().nth(max_chars) {
        None => Some(raw.to_owned()),
        Some((cut, _)) => {
            let mut text = raw[..cut].trim_end().to_owned();
            text.push('…');
            Some(text)
        }
    }
}

/// Whether the agent refused to start because another process still holds
/// the requested session ("session id … already in use").
pub fn is_lock_contention(error_text: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"(?i)session\s+id\b.*\balready\s+in\s+use").expect("static regex")
        })
        .is_match(error_text)
}
