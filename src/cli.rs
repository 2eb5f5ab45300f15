//! Clap adapter for the helper.
//!
//! Compiled only with the `clap` feature (on by default). The core never sees
//! these types: subcommands convert into an [`Action`] or a
//! [`SettingsAction`], and connection flags become settings overrides so that
//! a flag, an environment variable and a settings file all feed the same
//! value.
//!
//! Boolean options come in `--x/--no-x` pairs. Passing neither leaves the
//! configured default in place; when both are passed the last one wins.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::settings::{SettingsAction, SettingsLoader};
use crate::types::{Action, RunOptions};

/// Modify or replace /etc/gitlab/gitlab.rb on a GitLab host over SSH.
#[derive(Debug, Parser)]
#[command(name = "gitlab-helper", version)]
pub struct Cli {
    /// Log debug output (command traces, remote stdout).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set one directive in gitlab.rb, replacing or appending it.
    SetConfig(SetConfigArgs),
    /// Render a template and replace gitlab.rb with the result.
    ApplyTemplate(ApplyTemplateArgs),
    /// Inspect the helper's own settings.
    Settings(SettingsArgs),
}

/// Connection and run flags shared by the remote commands.
#[derive(Debug, Args)]
pub struct RemoteArgs {
    /// SSH user (default from settings: root).
    #[arg(long)]
    pub user: Option<String>,

    /// SSH port (default from settings: 22).
    #[arg(long)]
    pub port: Option<u16>,

    /// Back up gitlab.rb before modifying it.
    #[arg(long, overrides_with = "no_backup")]
    pub backup: bool,

    #[arg(long, overrides_with = "backup", hide = true)]
    pub no_backup: bool,

    /// Run 'gitlab-ctl reconfigure' after a successful upload.
    #[arg(long, overrides_with = "no_reconfigure")]
    pub reconfigure: bool,

    #[arg(long, overrides_with = "reconfigure", hide = true)]
    pub no_reconfigure: bool,
}

impl RemoteArgs {
    /// Feed explicitly passed flags to the loader as overrides.
    pub fn apply(&self, key_file: Option<&PathBuf>, loader: SettingsLoader) -> SettingsLoader {
        loader
            .override_value("ssh.user", self.user.clone())
            .override_value("ssh.port", self.port.map(i64::from))
            .override_value("ssh.key_file", key_file.map(|p| p.display().to_string()))
            .override_value("run.backup", flag(self.backup, self.no_backup))
            .override_value("run.reconfigure", flag(self.reconfigure, self.no_reconfigure))
    }
}

#[derive(Debug, Args)]
pub struct SetConfigArgs {
    /// GitLab host name or address.
    #[arg(long)]
    pub host: String,

    /// Private key for SSH authentication.
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Key to set, e.g. "external_url" or "gitlab_rails['time_zone']".
    #[arg(long)]
    pub setting: String,

    /// Value written verbatim, including any quotes, e.g. "'https://gitlab.example.com'".
    #[arg(long)]
    pub value: String,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl SetConfigArgs {
    pub fn into_action(self, options: RunOptions) -> Action {
        Action::SetConfig {
            setting: self.setting,
            value: self.value,
            options,
        }
    }
}

#[derive(Debug, Args)]
pub struct ApplyTemplateArgs {
    /// Template file (Jinja syntax).
    #[arg(long)]
    pub template: PathBuf,

    /// YAML file with template variables.
    #[arg(long)]
    pub vars: Option<PathBuf>,

    /// GitLab host; required unless --render-only.
    #[arg(long, required_unless_present = "render_only")]
    pub host: Option<String>,

    /// Private key for SSH authentication.
    #[arg(long)]
    pub key_file: Option<PathBuf>,

    /// Render locally and print, without connecting.
    #[arg(long)]
    pub render_only: bool,

    /// With --render-only, write the result here instead of printing it.
    #[arg(long, requires = "render_only")]
    pub result_file: Option<PathBuf>,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl ApplyTemplateArgs {
    pub fn into_action(self, options: RunOptions) -> Action {
        if self.render_only {
            Action::RenderTemplate {
                template: self.template,
                vars: self.vars,
                output: self.result_file,
            }
        } else {
            Action::ApplyTemplate {
                template: self.template,
                vars: self.vars,
                options,
            }
        }
    }
}

#[derive(Debug, Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    pub action: Option<SettingsSubcommand>,
}

#[derive(Debug, Subcommand)]
pub enum SettingsSubcommand {
    /// Show the effective settings after all layers are merged.
    Show,
    /// Generate a commented settings file.
    Gen {
        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl SettingsArgs {
    /// Bare `settings` means `settings show`.
    pub fn into_action(self) -> SettingsAction {
        match self.action {
            None | Some(SettingsSubcommand::Show) => SettingsAction::Show,
            Some(SettingsSubcommand::Gen { output }) => SettingsAction::Gen { output },
        }
    }
}

fn flag(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}
