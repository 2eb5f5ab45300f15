//! Directive patching: set one `key = value` line in a `gitlab.rb` document.
//!
//! Pure text transform. A line is a directive for `key` when, after leading
//! whitespace and an optional `#`, it starts with the key followed by optional
//! whitespace and an optional `=`. Matching is case-sensitive and does not
//! check word boundaries, so `external_url` also matches `external_url_ssl`.
//!
//! - The first directive becomes `key = value`.
//! - Every later directive is disabled (commented out) and otherwise left alone.
//! - With no directive at all, a provenance comment and `key = value` are appended.
//!
//! The value is written verbatim: callers supply it in Ruby syntax
//! (`"'http://gitlab.example.com'"`, `"true"`, `"8080"`).

use regex::Regex;

use crate::error::HelperError;
use crate::types::RunStamp;

/// What happened to the directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// An existing (possibly commented) directive was replaced.
    Replaced {
        /// 1-based line number of the replaced directive.
        line: usize,
        /// The directive as it was, trimmed.
        previous: String,
        /// Later occurrences that were commented out.
        duplicates: Vec<DuplicateDisabled>,
    },
    /// The key was not present; the directive was added at the end.
    Appended,
}

/// A repeated directive that was forced into commented form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateDisabled {
    /// 1-based line number.
    pub line: usize,
    /// The line as it was, trimmed.
    pub original: String,
}

/// The patched document plus the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patched {
    pub document: String,
    pub outcome: PatchOutcome,
}

/// Build the line matcher for `key`.
pub fn directive_pattern(key: &str) -> Result<Regex, HelperError> {
    Regex::new(&format!(r"^\s*(?:#\s*)?{}\s*=?\s*.*", regex::escape(key))).map_err(|e| {
        HelperError::InvalidSetting {
            key: key.into(),
            reason: e.to_string(),
        }
    })
}

/// Pure function: set `key` to `value` in `document`.
///
/// `stamp` only feeds the provenance comment written on the append path.
/// The result always ends with exactly one newline.
pub fn patch(
    document: &str,
    key: &str,
    value: &str,
    stamp: &RunStamp,
) -> Result<Patched, HelperError> {
    validate(key, value)?;
    let pattern = directive_pattern(key)?;
    let directive = format!("{key} = {value}");

    let body = document.trim_end_matches(['\n', '\r']);
    let mut lines: Vec<String> = Vec::new();
    let mut replaced: Option<(usize, String)> = None;
    let mut duplicates = Vec::new();

    if !body.is_empty() {
        for (idx, line) in body.lines().enumerate() {
            if !pattern.is_match(line) {
                lines.push(line.to_string());
                continue;
            }
            let trimmed = line.trim();
            if replaced.is_none() {
                replaced = Some((idx + 1, trimmed.to_string()));
                lines.push(directive.clone());
            } else {
                duplicates.push(DuplicateDisabled {
                    line: idx + 1,
                    original: trimmed.to_string(),
                });
                lines.push(disable(trimmed));
            }
        }
    }

    let outcome = match replaced {
        Some((line, previous)) => PatchOutcome::Replaced {
            line,
            previous,
            duplicates,
        },
        None => {
            lines.push(provenance_comment(stamp));
            lines.push(directive);
            PatchOutcome::Appended
        }
    };

    let mut patched = lines.join("\n");
    patched.push('\n');
    Ok(Patched {
        document: patched,
        outcome,
    })
}

/// The comment written above an appended directive.
pub fn provenance_comment(stamp: &RunStamp) -> String {
    format!("# Added by {} {}", env!("CARGO_PKG_NAME"), stamp.iso())
}

/// Comment out a trimmed directive. Lines that are already comments are kept
/// as they are, so patching twice gives the same document as patching once.
fn disable(trimmed: &str) -> String {
    if trimmed.starts_with('#') {
        trimmed.to_string()
    } else {
        format!("# {trimmed}")
    }
}

/// Reject keys and values that cannot form a single directive line.
pub fn validate(key: &str, value: &str) -> Result<(), HelperError> {
    let invalid = |reason: &str| HelperError::InvalidSetting {
        key: key.into(),
        reason: reason.into(),
    };
    if key.trim().is_empty() {
        return Err(invalid("the key is empty"));
    }
    if key.contains(['\n', '\r']) {
        return Err(invalid("the key contains a line break"));
    }
    if value.contains(['\n', '\r']) {
        return Err(invalid("the value contains a line break"));
    }
    Ok(())
}
