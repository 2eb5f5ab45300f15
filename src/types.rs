//! Plain data shared across the pipelines: where to connect, when the run
//! started, and what to do.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::HelperError;

/// Canonical location of the file every action mutates.
pub const GITLAB_RB_PATH: &str = "/etc/gitlab/gitlab.rb";

/// Privileged command that makes a new `gitlab.rb` live.
pub const RECONFIGURE_COMMAND: &str = "gitlab-ctl reconfigure";

/// How the helper proves its identity to the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// A private key file (PEM / OpenSSH format) on the local machine.
    KeyFile(PathBuf),
}

/// The host a run talks to. Built once per invocation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub credential: Credential,
}

impl RemoteTarget {
    /// Build a target authenticating with `key_file`, which must exist locally.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        port: u16,
        key_file: impl Into<PathBuf>,
    ) -> Result<Self, HelperError> {
        let key_file = key_file.into();
        if !key_file.is_file() {
            return Err(HelperError::KeyFileMissing(key_file));
        }
        Ok(Self {
            host: host.into(),
            user: user.into(),
            port,
            credential: Credential::KeyFile(key_file),
        })
    }

    /// Whether commands already run with root privileges.
    pub fn is_root(&self) -> bool {
        self.user == "root"
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

/// The single "now" of a run.
///
/// Backup names, temp-file names and provenance comments are all derived from
/// this value so that the artifacts of one run share a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStamp(DateTime<Local>);

impl RunStamp {
    pub fn now() -> Self {
        Self(Local::now())
    }

    /// `YYYYMMDDHHMMSS`, used in remote file names.
    pub fn compact(&self) -> String {
        self.0.format("%Y%m%d%H%M%S").to_string()
    }

    /// ISO-8601 local time, used in generated comments.
    pub fn iso(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

impl From<DateTime<Local>> for RunStamp {
    fn from(at: DateTime<Local>) -> Self {
        Self(at)
    }
}

/// Optional steps around the upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Copy the remote file to `<path>.bak.<stamp>` before touching it.
    pub backup: bool,
    /// Run the activation command after a successful upload.
    pub reconfigure: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            backup: true,
            reconfigure: false,
        }
    }
}

/// A helper operation, independent of any CLI framework.
/// The CLI layer converts parsed clap args into this.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Patch a single directive in the remote file.
    SetConfig {
        setting: String,
        value: String,
        options: RunOptions,
    },
    /// Render a template locally and replace the remote file with it.
    ApplyTemplate {
        template: PathBuf,
        vars: Option<PathBuf>,
        options: RunOptions,
    },
    /// Render a template locally only. Prints the result, or writes it to
    /// `output` when given. Never connects anywhere.
    RenderTemplate {
        template: PathBuf,
        vars: Option<PathBuf>,
        output: Option<PathBuf>,
    },
}

/// Where to search for the helper's own settings files.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchPath {
    /// Platform config directory (XDG on Linux, ~/Library/Application Support on macOS).
    Platform,
    /// A subdirectory under the user's home directory, e.g. `Home(".gitlab-helper")`.
    Home(&'static str),
    /// Current working directory.
    Cwd,
    /// An explicit directory.
    Path(PathBuf),
}

/// Final path component of a remote or local path, for temp names and headers.
pub(crate) fn basename(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}
