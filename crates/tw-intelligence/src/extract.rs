//! Structured-response extractor.
//!
//! Generation output is untrusted: it may wrap JSON in markdown fences,
//! surround it with prose, leave trailing commas, include comments, or cut
//! off mid-structure. `extract_json` is the single chokepoint that coerces
//! such output into a parsed value or a typed failure — it never panics on
//! malformed input, and callers decide whether to re-invoke the upstream
//! generation call.

use thiserror::Error;
use tracing::debug;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The raw text could not be coerced into a JSON object even after
    /// repair heuristics.
    #[error("unparsable {context} response at position {position}: {reason}")]
    Unparsable {
        context: String,
        reason: String,
        position: usize,
        /// Leading slice of the offending text, for diagnosis.
        snippet: String,
    },
}

impl ExtractError {
    fn unparsable(context: &str, reason: impl Into<String>, position: usize, raw: &str) -> Self {
        let snippet: String = raw.chars().take(200).collect();
        ExtractError::Unparsable {
            context: context.to_string(),
            reason: reason.into(),
            position,
            snippet,
        }
    }
}

// ---------------------------------------------------------------------------
// extract_json
// ---------------------------------------------------------------------------

/// Extract and parse a JSON object out of raw generation text.
///
/// Steps, in order of increasing aggressiveness: strip markdown code
/// fences; locate the outermost balanced `{...}` span; attempt a direct
/// parse; on failure remove comments and trailing commas (string-aware) and,
/// when the structure looks truncated, cut back to the last fully balanced
/// brace; retry once.
pub fn extract_json(raw: &str, context: &str) -> Result<serde_json::Value, ExtractError> {
    let defenced = strip_fences(raw);

    let span = match object_span(&defenced) {
        Some(span) => span,
        None => {
            return Err(ExtractError::unparsable(
                context,
                "no JSON object found",
                0,
                raw,
            ))
        }
    };

    match serde_json::from_str(span) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            debug!(
                context,
                error = %first_err,
                "direct parse failed, applying repair heuristics"
            );

            let mut repaired = strip_comments(span);
            repaired = strip_trailing_commas(&repaired);

            // A structure that never closes cannot be fixed by comma/comment
            // removal alone; fall back to the longest balanced prefix.
            if first_err.is_eof() || !is_balanced(&repaired) {
                if let Some(prefix) = balanced_prefix(&repaired) {
                    repaired = prefix.to_string();
                }
            }

            serde_json::from_str(&repaired).map_err(|second_err| {
                ExtractError::unparsable(
                    context,
                    second_err.to_string(),
                    second_err.column(),
                    span,
                )
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Repair passes
// ---------------------------------------------------------------------------

/// Drop markdown fence lines (```json, ```), keeping everything between.
fn strip_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Slice from the first `{` to its matching close brace, or to the end of
/// input when the object never closes (truncated output).
fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

/// Remove `//` line comments and `/* */` block comments outside strings.
fn strip_comments(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            out.push(b as char);
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match b {
            b'"' => {
                in_string = true;
                out.push('"');
                i += 1;
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            _ => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    out
}

/// Remove commas that directly precede a closing brace or bracket, outside
/// strings.
fn strip_trailing_commas(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    let mut in_string = false;
    let mut escaped = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            out.push(b as char);
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if b == b'"' {
            in_string = true;
            out.push('"');
            i += 1;
            continue;
        }
        if b == b',' {
            let mut j = i + 1;
            while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                j += 1;
            }
            if j < bytes.len() && (bytes[j] == b'}' || bytes[j] == b']') {
                i += 1; // drop the comma, keep the whitespace
                continue;
            }
        }
        out.push(b as char);
        i += 1;
    }
    out
}

/// Whether every brace opened outside a string is closed.
fn is_balanced(text: &str) -> bool {
    let mut depth = 0i64;
    let mut in_string = false;
    let mut escaped = false;
    for b in text.bytes() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => depth -= 1,
            _ => {}
        }
    }
    depth == 0 && !in_string
}

/// The longest prefix ending exactly where the outermost object closes.
/// Returns `None` when the outermost object never closes.
fn balanced_prefix(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut seen_open = false;

    for (i, &b) in bytes.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => {
                depth += 1;
                seen_open = true;
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && seen_open {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
