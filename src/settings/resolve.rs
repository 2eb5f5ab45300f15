//! Layer merging for [`Settings`], with no I/O.
//!
//! Everything the loader found is handed over in a [`ResolveInput`], so the
//! whole precedence chain can be tested with synthetic files and env pairs.

use std::path::{Path, PathBuf};

use confique::Config;
use toml::{Table, Value};

use super::Settings;
use super::layers::{deep_merge, env_to_table, overrides_to_table};
use crate::error::HelperError;

type SettingsLayer = <Settings as Config>::Layer;

/// Pre-loaded inputs for [`resolve`].
pub struct ResolveInput {
    /// File contents, lowest priority first.
    pub files: Vec<(PathBuf, String)>,
    pub env_vars: Vec<(String, String)>,
    /// `None` disables the environment layer.
    pub env_prefix: Option<String>,
    /// `(dotted_key, value)` pairs, applied last.
    pub overrides: Vec<(String, Value)>,
    pub strict: bool,
}

/// Files, then env, then overrides are deep-merged into one table which
/// confique completes with defaults.
pub fn resolve(input: ResolveInput) -> Result<Settings, HelperError> {
    let mut merged = Table::new();
    for (path, content) in &input.files {
        if input.strict {
            reject_unknown_keys(content, path)?;
        }
        let table: Table = toml::from_str(content).map_err(|source| HelperError::SettingsParse {
            path: path.clone(),
            source,
        })?;
        merged = deep_merge(merged, table);
    }

    if let Some(prefix) = &input.env_prefix {
        merged = deep_merge(merged, env_to_table(prefix, input.env_vars));
    }

    if !input.overrides.is_empty() {
        merged = deep_merge(merged, overrides_to_table(&input.overrides));
    }

    let layer: SettingsLayer =
        Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| HelperError::InvalidSetting {
                key: "settings".into(),
                reason: e.to_string(),
            })?;

    Ok(Settings::builder().preloaded(layer).load()?)
}

/// Fail with every key in `content` that [`Settings`] does not define.
fn reject_unknown_keys(content: &str, path: &Path) -> Result<(), HelperError> {
    let mut unknown: Vec<String> = Vec::new();
    let deserializer = toml::Deserializer::new(content);
    let _: SettingsLayer = serde_ignored::deserialize(deserializer, |ignored| {
        unknown.push(ignored.to_string());
    })
    .map_err(|source| HelperError::SettingsParse {
        path: path.to_path_buf(),
        source,
    })?;

    if unknown.is_empty() {
        return Ok(());
    }
    Err(HelperError::UnknownSettingsKeys(
        unknown
            .into_iter()
            .map(|key| HelperError::UnknownSettingsKey {
                line: key_line(content, &key),
                key,
                path: path.to_path_buf(),
            })
            .collect(),
    ))
}

/// 1-indexed line of `dotted_key`, following `[section]` headers. Quoted keys
/// and inline tables are not tracked; 0 when not found.
fn key_line(content: &str, dotted_key: &str) -> usize {
    let (section, leaf) = match dotted_key.rsplit_once('.') {
        Some((section, leaf)) => (section, leaf),
        None => ("", dotted_key),
    };

    let mut current = String::new();
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') && !trimmed.starts_with("[[") {
            current = trimmed
                .trim_matches(|c: char| c == '[' || c == ']')
                .split('.')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join(".");
            continue;
        }
        if current == section
            && let Some(rest) = trimmed.strip_prefix(leaf)
            && rest.trim_start().starts_with('=')
        {
            return i + 1;
        }
    }
    0
}
