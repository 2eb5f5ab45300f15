//! `settings gen` and `settings show`.

use std::fmt;
use std::path::PathBuf;

use confique::Config;
use confique::meta::{FieldKind, Meta};

use super::{Settings, SettingsLoader};
use crate::error::HelperError;

/// What to do with the operator settings.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsAction {
    /// Emit a commented template, to stdout or to `output`.
    Gen { output: Option<PathBuf> },
    /// Load every layer and list the effective values.
    Show,
}

/// Result of a [`SettingsAction`], for display.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsOutcome {
    Template(String),
    TemplateWritten { path: PathBuf },
    /// Dotted keys in declaration order.
    Listing { entries: Vec<(String, String)> },
}

impl fmt::Display for SettingsOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsOutcome::Template(t) => write!(f, "{t}"),
            SettingsOutcome::TemplateWritten { path } => {
                write!(f, "Settings template written to {}", path.display())
            }
            SettingsOutcome::Listing { entries } => {
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{key} = {value}")?;
                }
                Ok(())
            }
        }
    }
}

impl SettingsLoader {
    pub fn handle(self, action: &SettingsAction) -> Result<SettingsOutcome, HelperError> {
        match action {
            SettingsAction::Gen { output: None } => Ok(SettingsOutcome::Template(Settings::template())),
            SettingsAction::Gen { output: Some(path) } => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|source| HelperError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                std::fs::write(path, Settings::template()).map_err(|source| HelperError::Io {
                    path: path.clone(),
                    source,
                })?;
                Ok(SettingsOutcome::TemplateWritten { path: path.clone() })
            }
            SettingsAction::Show => list_values(&self.load()?),
        }
    }
}

/// Flatten `settings` into `section.key = value` pairs. Unset optionals show
/// as `<not set>`.
pub fn list_values(settings: &Settings) -> Result<SettingsOutcome, HelperError> {
    let value = toml::Value::try_from(settings).map_err(|e| HelperError::InvalidSetting {
        key: "settings".into(),
        reason: e.to_string(),
    })?;
    let empty = toml::Table::new();
    let table = value.as_table().unwrap_or(&empty);
    let mut entries = Vec::new();
    collect(&Settings::META, table, "", &mut entries);
    Ok(SettingsOutcome::Listing { entries })
}

fn collect(meta: &Meta, table: &toml::Table, prefix: &str, out: &mut Vec<(String, String)>) {
    for field in meta.fields {
        let key = if prefix.is_empty() {
            field.name.to_string()
        } else {
            format!("{prefix}.{}", field.name)
        };
        let value = table.get(field.name);
        match &field.kind {
            FieldKind::Nested { meta: nested, .. } => {
                let empty = toml::Table::new();
                let sub = value.and_then(toml::Value::as_table).unwrap_or(&empty);
                collect(nested, sub, &key, out);
            }
            FieldKind::Leaf { .. } => {
                let shown = value.map_or_else(|| "<not set>".to_string(), format_value);
                out.push((key, shown));
            }
        }
    }
}

fn format_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
