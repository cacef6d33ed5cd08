//! Storage-safe identifiers derived from visitor nicknames.
//!
//! Nicknames are free text (often Korean). Dropbox receives the target path
//! inside an HTTP header, so only printable ASCII survives here. Accented and
//! full-width letters are folded to their ASCII base first (NFKD).

use chrono::{DateTime, FixedOffset, Utc};
use unicode_normalization::UnicodeNormalization;

/// Placeholder used when a nickname sanitizes to nothing.
pub const FALLBACK_LABEL: &str = "guest";

/// Upper bound on the sanitized label length.
pub const MAX_LABEL_LEN: usize = 48;

/// Characters that break storage paths.
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Sanitized label plus a wall-clock tag, e.g. `mina_145210`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeId {
    label: String,
    time_tag: String,
}

impl SafeId {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Display for SafeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.label, self.time_tag)
    }
}

/// Build a [`SafeId`] from a raw nickname and the current time.
///
/// Total over all input: empty, whitespace-only or entirely non-ASCII
/// nicknames fall back to [`FALLBACK_LABEL`]. Two submissions with the same
/// nickname in the same second produce the same id; callers disambiguate.
pub fn make_identifier(raw_label: &str, now: DateTime<Utc>, offset: FixedOffset) -> SafeId {
    let label = sanitize_label(raw_label);
    SafeId {
        label: if label.is_empty() {
            FALLBACK_LABEL.to_string()
        } else {
            label
        },
        time_tag: time_tag(now, offset),
    }
}

/// Strip everything a storage path cannot carry.
pub fn sanitize_label(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_LABEL_LEN));
    let mut pending_gap = false;

    for c in raw.trim().nfkd() {
        if c.is_whitespace() {
            pending_gap = true;
            continue;
        }
        if !c.is_ascii() || c.is_ascii_control() || UNSAFE_CHARS.contains(&c) {
            continue;
        }
        if pending_gap && !out.is_empty() {
            out.push('_');
        }
        pending_gap = false;
        out.push(c);
        if out.len() >= MAX_LABEL_LEN {
            break;
        }
    }

    out.truncate(MAX_LABEL_LEN);
    let kept = out.trim_end_matches('_').len();
    out.truncate(kept);
    out
}

/// `HHMMSS` in the booth's fixed-offset local time.
pub fn time_tag(now: DateTime<Utc>, offset: FixedOffset) -> String {
    now.with_timezone(&offset).format("%H%M%S").to_string()
}
