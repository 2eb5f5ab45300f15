//! Sources for each settings layer: files found on the search path,
//! `GITLAB_HELPER__*` environment variables, and dotted-key overrides. Each
//! becomes a `toml::Table`; [`deep_merge`] stacks them.

use std::path::PathBuf;

use toml::{Table, Value};

use crate::error::HelperError;
use crate::types::SearchPath;

/// Resolve search paths to concrete directories, priority-ascending.
/// Paths that cannot be resolved (no home directory, etc.) are skipped.
pub fn expand_search_paths(search_paths: &[SearchPath], app_name: &str) -> Vec<PathBuf> {
    search_paths
        .iter()
        .filter_map(|sp| match sp {
            SearchPath::Platform => directories::ProjectDirs::from("", "", app_name)
                .map(|dirs| dirs.config_dir().to_path_buf()),
            SearchPath::Home(subdir) => {
                directories::UserDirs::new().map(|user| user.home_dir().join(subdir))
            }
            SearchPath::Cwd => std::env::current_dir().ok(),
            SearchPath::Path(p) => Some(p.clone()),
        })
        .collect()
}

/// Read `{dir}/{file_name}` from every directory that has one. Missing files
/// are skipped; other I/O errors are returned.
pub fn load_files(dirs: &[PathBuf], file_name: &str) -> Result<Vec<(PathBuf, String)>, HelperError> {
    let mut found = Vec::new();
    for dir in dirs {
        let path = dir.join(file_name);
        match std::fs::read_to_string(&path) {
            Ok(content) => found.push((path, content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(HelperError::Io { path, source }),
        }
    }
    Ok(found)
}

/// Build a table from `{PREFIX}__SECTION__KEY` variables. Segments are
/// lowercased; a single `_` stays part of the name.
pub fn env_to_table(prefix: &str, vars: impl IntoIterator<Item = (String, String)>) -> Table {
    let needle = format!("{prefix}__");
    let mut table = Table::new();
    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(&needle) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let dotted = rest
            .split("__")
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(".");
        insert_dotted(&mut table, &dotted, parse_scalar(&value));
    }
    table
}

/// Expand `("ssh.port", 2222)` pairs into nested tables. Last entry wins.
pub fn overrides_to_table(entries: &[(String, Value)]) -> Table {
    let mut table = Table::new();
    for (key, value) in entries {
        insert_dotted(&mut table, key, value.clone());
    }
    table
}

/// Merge `overlay` into `base`; nested tables merge, anything else is replaced.
pub fn deep_merge(mut base: Table, overlay: Table) -> Table {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(Value::Table(lower)), Value::Table(upper)) => Value::Table(deep_merge(lower, upper)),
            (_, upper) => upper,
        };
        base.insert(key, merged);
    }
    base
}

fn insert_dotted(table: &mut Table, dotted: &str, value: Value) {
    match dotted.split_once('.') {
        None => {
            table.insert(dotted.to_string(), value);
        }
        Some((head, rest)) => {
            let entry = table
                .entry(head)
                .or_insert_with(|| Value::Table(Table::new()));
            if !entry.is_table() {
                *entry = Value::Table(Table::new());
            }
            if let Value::Table(sub) = entry {
                insert_dotted(sub, rest, value);
            }
        }
    }
}

/// bool, then integer, then float (only with a dot), then string.
fn parse_scalar(s: &str) -> Value {
    if s.eq_ignore_ascii_case("true") {
        return Value::Boolean(true);
    }
    if s.eq_ignore_ascii_case("false") {
        return Value::Boolean(false);
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Integer(i);
    }
    if s.contains('.')
        && let Ok(f) = s.parse::<f64>()
    {
        return Value::Float(f);
    }
    Value::String(s.to_string())
}
