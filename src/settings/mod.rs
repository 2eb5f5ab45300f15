//! Operator defaults for the helper itself.
//!
//! Nothing here describes the remote `gitlab.rb`; these are the values an
//! operator would otherwise repeat on every invocation (SSH user, port, key
//! file, whether to back up or reconfigure). Layers, lowest to highest:
//!
//! ```text
//! Compiled defaults     #[config(default = ...)]
//!        ↑ overridden by
//! Settings files        platform dir, ~/.gitlab-helper/, cwd (later wins)
//!        ↑ overridden by
//! Environment vars      GITLAB_HELPER__SSH__PORT=2222
//!        ↑ overridden by
//! Overrides             explicit CLI flags
//! ```
//!
//! Files are sparse overlays, deep-merged key by key. Unknown keys are
//! rejected with file and line unless strict mode is turned off.

mod layers;
mod ops;
mod resolve;

use std::path::PathBuf;

use confique::Config;
use serde::{Deserialize, Serialize};

use crate::error::HelperError;
use crate::types::{RunOptions, SearchPath};

pub use ops::{SettingsAction, SettingsOutcome, list_values};
pub use resolve::{ResolveInput, resolve};

/// App name used for the platform config directory and the file name.
pub const APP_NAME: &str = "gitlab-helper";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "GITLAB_HELPER";

/// Root of the settings file.
#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Settings {
    /// How to reach GitLab hosts.
    #[config(nested)]
    pub ssh: SshSettings,

    /// Default behaviour of set-config and apply-template.
    #[config(nested)]
    pub run: RunSettings,
}

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SshSettings {
    /// SSH user name.
    #[config(default = "root")]
    pub user: String,

    /// SSH port.
    #[config(default = 22)]
    pub port: u16,

    /// Private key used when --key-file is not given.
    pub key_file: Option<PathBuf>,

    /// TCP connect timeout in seconds (0 waits indefinitely).
    #[config(default = 30)]
    pub connect_timeout_secs: u64,
}

#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Back up gitlab.rb before modifying it.
    #[config(default = true)]
    pub backup: bool,

    /// Run `gitlab-ctl reconfigure` after a successful upload.
    #[config(default = false)]
    pub reconfigure: bool,
}

impl Settings {
    pub fn loader() -> SettingsLoader {
        SettingsLoader::new()
    }

    /// Run options as configured, before any per-invocation flags.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            backup: self.run.backup,
            reconfigure: self.run.reconfigure,
        }
    }

    /// A commented TOML template derived from the doc comments above.
    pub fn template() -> String {
        confique::toml::template::<Settings>(confique::toml::FormatOptions::default())
    }
}

/// Discovers and merges settings files, environment and overrides.
pub struct SettingsLoader {
    file_name: String,
    search_paths: Vec<SearchPath>,
    env_prefix: Option<String>,
    strict: bool,
    overrides: Vec<(String, toml::Value)>,
}

impl SettingsLoader {
    fn new() -> Self {
        Self {
            file_name: format!("{APP_NAME}.toml"),
            search_paths: vec![
                SearchPath::Platform,
                SearchPath::Home(".gitlab-helper"),
                SearchPath::Cwd,
            ],
            env_prefix: Some(ENV_PREFIX.to_string()),
            strict: true,
            overrides: Vec::new(),
        }
    }

    /// Override the settings file name (default: `gitlab-helper.toml`).
    pub fn file_name(mut self, name: &str) -> Self {
        self.file_name = name.to_string();
        self
    }

    /// Replace the search paths. Priority-ascending: the last entry wins.
    pub fn search_paths(mut self, paths: Vec<SearchPath>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Disable environment variable loading.
    pub fn no_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// Reject unknown keys in settings files (default: `true`).
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Add an override at the highest priority. `None` is ignored, which fits
    /// optional CLI flags.
    pub fn override_value<V: Into<toml::Value>>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.overrides.push((key.to_string(), v.into()));
        }
        self
    }

    /// Directories searched, in priority-ascending order.
    pub fn directories(&self) -> Vec<PathBuf> {
        layers::expand_search_paths(&self.search_paths, APP_NAME)
    }

    pub fn load(self) -> Result<Settings, HelperError> {
        let files = layers::load_files(&self.directories(), &self.file_name)?;
        resolve(ResolveInput {
            files,
            env_vars: std::env::vars().collect(),
            env_prefix: self.env_prefix,
            overrides: self.overrides,
            strict: self.strict,
        })
    }
}
