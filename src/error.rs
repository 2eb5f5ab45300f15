use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Every failure the helper can report, one variant per failure class.
#[derive(Debug, Error)]
pub enum HelperError {
    #[error("Cannot reach {host}: {reason}")]
    Transport { host: String, reason: String },

    #[error("Privileged command `{command}` exited with status {status}{}", stderr_suffix(.stderr))]
    Privilege {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Activation command `{command}` exited with status {status}; the file was replaced but is not live")]
    Activation { command: String, status: i32 },

    #[error(
        "CRITICAL: upload failed ({upload}) and restoring {backup} -> {path} also failed ({restore}). Manual intervention required on {host}"
    )]
    Restore {
        host: String,
        path: String,
        backup: String,
        upload: Box<HelperError>,
        restore: Box<HelperError>,
    },

    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("{path} on the remote host is not valid UTF-8")]
    Decode { path: String },

    #[error("No remote host configured for this action; pass --host and --key-file")]
    MissingTarget,

    #[error("SSH key file {0} does not exist")]
    KeyFileMissing(PathBuf),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unknown key '{key}' in {path} (line {line})")]
    UnknownSettingsKey {
        key: String,
        path: PathBuf,
        line: usize,
    },

    #[error("Unknown keys in settings file: {}", join_errors(.0))]
    UnknownSettingsKeys(Vec<HelperError>),

    #[error("Failed to parse {path}: {source}")]
    SettingsParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Settings error: {0}")]
    Settings(#[from] confique::Error),
}

/// Why rendering a template failed. All of these surface as "render failed"
/// but stay distinguishable for callers and tests.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Template {0} not found")]
    TemplateNotFound(PathBuf),

    #[error("Variables file {0} not found")]
    VariablesNotFound(PathBuf),

    #[error("Failed to parse variables file {path}: {source}")]
    VariablesParse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("Variables file {0} must contain a mapping at the top level")]
    VariablesNotMapping(PathBuf),

    #[error("Failed to render {name}: {source}")]
    Template {
        name: String,
        source: minijinja::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The pipeline stage a run stopped at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Connect,
    Verify,
    Backup,
    Fetch,
    Patch,
    Render,
    Upload,
    Activate,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Setup => "setup",
            Stage::Connect => "connect",
            Stage::Verify => "verify",
            Stage::Backup => "backup",
            Stage::Fetch => "fetch",
            Stage::Patch => "patch",
            Stage::Render => "render",
            Stage::Upload => "upload",
            Stage::Activate => "activate",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

/// A failed run: the stage that stopped it and the underlying error.
#[derive(Debug, Error)]
#[error("{stage} failed: {source}")]
pub struct RunError {
    pub stage: Stage,
    #[source]
    pub source: HelperError,
}

impl RunError {
    pub fn new(stage: Stage, source: impl Into<HelperError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    /// True when the remote file may be left in an unknown state and an
    /// operator has to look at the host.
    pub fn is_critical(&self) -> bool {
        matches!(self.source, HelperError::Restore { .. })
    }
}

/// Attach a stage to a `Result<_, HelperError>`.
pub(crate) trait StageExt<T> {
    fn at(self, stage: Stage) -> Result<T, RunError>;
}

impl<T, E: Into<HelperError>> StageExt<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, RunError> {
        self.map_err(|e| RunError::new(stage, e))
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

fn join_errors(errors: &[HelperError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
