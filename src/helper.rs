//! Pipeline orchestration: turns an [`Action`] into a run against one host.
//!
//! ```text
//! SetConfig       connect → verify → backup? → fetch → patch → upload → activate?
//! ApplyTemplate   render → connect → verify → backup? → upload → activate?
//! RenderTemplate  render → print or write
//! ```
//!
//! The session is closed before [`Helper::handle`] returns, whatever the
//! outcome. Rendering happens before any connection, so a bad template or
//! variables file never touches the network.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{HelperError, RunError, Stage, StageExt};
use crate::patch::{self, PatchOutcome};
use crate::render::{self, RenderedDocument};
use crate::report::{Reporter, SilentReporter};
use crate::session::{BackupHandle, Session, with_session};
use crate::transport::{Connector, Transport};
use crate::types::{Action, GITLAB_RB_PATH, RECONFIGURE_COMMAND, RemoteTarget, RunOptions, RunStamp};

static SILENT: SilentReporter = SilentReporter;

/// Result of a successful run. Returned to the caller for display.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A single directive was written to the remote file.
    SettingApplied {
        host: String,
        key: String,
        value: String,
        outcome: PatchOutcome,
        backup: Option<String>,
        reconfigured: bool,
    },
    /// A rendered template replaced the remote file.
    TemplateApplied {
        host: String,
        template: String,
        backup: Option<String>,
        reconfigured: bool,
    },
    /// Rendered text, for printing.
    Rendered(String),
    /// Rendered text was written to a local file.
    RenderWritten { path: PathBuf },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::SettingApplied {
                host,
                key,
                value,
                outcome,
                ..
            } => match outcome {
                PatchOutcome::Replaced { line, .. } => {
                    write!(f, "Set {key} = {value} on {host} (line {line})")
                }
                PatchOutcome::Appended => write!(f, "Set {key} = {value} on {host} (appended)"),
            },
            Outcome::TemplateApplied { host, template, .. } => {
                write!(f, "Applied {template} to {host}")
            }
            Outcome::Rendered(text) => write!(f, "{text}"),
            Outcome::RenderWritten { path } => {
                write!(f, "Rendered template written to {}", path.display())
            }
        }
    }
}

/// Runs actions against one GitLab host.
pub struct Helper<'a, C: Connector> {
    connector: C,
    target: Option<RemoteTarget>,
    reporter: &'a dyn Reporter,
    remote_path: String,
    activation_command: String,
    stamp: Option<RunStamp>,
}

impl<'a, C: Connector> Helper<'a, C> {
    pub fn builder(connector: C) -> HelperBuilder<'a, C> {
        HelperBuilder {
            connector,
            target: None,
            reporter: &SILENT,
            remote_path: GITLAB_RB_PATH.to_string(),
            activation_command: RECONFIGURE_COMMAND.to_string(),
            stamp: None,
        }
    }

    pub fn handle(&self, action: &Action) -> Result<Outcome, RunError> {
        let stamp = self.stamp.unwrap_or_else(RunStamp::now);
        match action {
            Action::SetConfig {
                setting,
                value,
                options,
            } => self.set_config(setting, value, *options, stamp),
            Action::ApplyTemplate {
                template,
                vars,
                options,
            } => self.apply_template(template, vars.as_deref(), *options, stamp),
            Action::RenderTemplate {
                template,
                vars,
                output,
            } => self.render_only(template, vars.as_deref(), output.as_deref(), stamp),
        }
    }

    fn set_config(
        &self,
        key: &str,
        value: &str,
        options: RunOptions,
        stamp: RunStamp,
    ) -> Result<Outcome, RunError> {
        let target = self.target()?;
        patch::validate(key, value).at(Stage::Setup)?;

        let path = self.remote_path.as_str();
        let reporter = self.reporter;
        with_session(&self.connector, target, stamp, reporter, |session| {
            let backup = self.maybe_backup(session, options)?;

            let raw = session.fetch_privileged(path).at(Stage::Fetch)?;
            let document = String::from_utf8(raw)
                .map_err(|_| HelperError::Decode { path: path.into() })
                .at(Stage::Fetch)?;

            reporter.info(&format!("Modifying setting: {key}"));
            let patched = patch::patch(&document, key, value, &stamp).at(Stage::Patch)?;
            match &patched.outcome {
                PatchOutcome::Replaced {
                    line,
                    previous,
                    duplicates,
                } => {
                    reporter.info(&format!("Found existing setting at line {line}: {previous}"));
                    for dup in duplicates {
                        reporter.warn(&format!(
                            "Duplicate '{key}' at line {}; commented out: {}",
                            dup.line, dup.original
                        ));
                    }
                }
                PatchOutcome::Appended => {
                    reporter.info(&format!("Setting '{key}' not found; appending it."));
                }
            }

            session
                .upload_privileged(patched.document.as_bytes(), path, backup.as_ref())
                .at(Stage::Upload)?;
            self.maybe_activate(session, options)?;

            Ok(Outcome::SettingApplied {
                host: target.host.clone(),
                key: key.to_string(),
                value: value.to_string(),
                outcome: patched.outcome,
                backup: backup.map(|b| b.path),
                reconfigured: options.reconfigure,
            })
        })
    }

    fn apply_template(
        &self,
        template: &Path,
        vars: Option<&Path>,
        options: RunOptions,
        stamp: RunStamp,
    ) -> Result<Outcome, RunError> {
        let target = self.target()?;
        let rendered = self.render(template, vars, &stamp)?;

        let path = self.remote_path.as_str();
        with_session(&self.connector, target, stamp, self.reporter, |session| {
            let backup = self.maybe_backup(session, options)?;
            session
                .upload_privileged(rendered.text.as_bytes(), path, backup.as_ref())
                .at(Stage::Upload)?;
            self.maybe_activate(session, options)?;

            Ok(Outcome::TemplateApplied {
                host: target.host.clone(),
                template: rendered.template_name.clone(),
                backup: backup.map(|b| b.path),
                reconfigured: options.reconfigure,
            })
        })
    }

    fn render_only(
        &self,
        template: &Path,
        vars: Option<&Path>,
        output: Option<&Path>,
        stamp: RunStamp,
    ) -> Result<Outcome, RunError> {
        let rendered = self.render(template, vars, &stamp)?;
        let Some(output) = output else {
            return Ok(Outcome::Rendered(rendered.text));
        };

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|source| HelperError::Io {
                    path: parent.to_path_buf(),
                    source,
                })
                .at(Stage::Write)?;
        }
        std::fs::write(output, &rendered.text)
            .map_err(|source| HelperError::Io {
                path: output.to_path_buf(),
                source,
            })
            .at(Stage::Write)?;
        self.reporter
            .info(&format!("Rendered configuration written to {}", output.display()));
        Ok(Outcome::RenderWritten {
            path: output.to_path_buf(),
        })
    }

    fn render(
        &self,
        template: &Path,
        vars: Option<&Path>,
        stamp: &RunStamp,
    ) -> Result<RenderedDocument, RunError> {
        self.reporter
            .info(&format!("Rendering template {}...", template.display()));
        let rendered = render::render(template, vars, stamp).at(Stage::Render)?;
        self.reporter.info("Template rendered successfully.");
        Ok(rendered)
    }

    fn target(&self) -> Result<&RemoteTarget, RunError> {
        self.target
            .as_ref()
            .ok_or(HelperError::MissingTarget)
            .at(Stage::Setup)
    }

    fn maybe_backup<T: Transport>(
        &self,
        session: &mut Session<'_, T>,
        options: RunOptions,
    ) -> Result<Option<BackupHandle>, RunError> {
        if !options.backup {
            self.reporter.warn("Skipping backup of the remote file.");
            return Ok(None);
        }
        session.backup(&self.remote_path).map(Some).at(Stage::Backup)
    }

    fn maybe_activate<T: Transport>(
        &self,
        session: &mut Session<'_, T>,
        options: RunOptions,
    ) -> Result<(), RunError> {
        if !options.reconfigure {
            self.reporter.info(&format!(
                "Skipping '{}'. Run it manually to apply the change.",
                self.activation_command
            ));
            return Ok(());
        }
        session
            .activate(&self.activation_command)
            .at(Stage::Activate)
    }
}

pub struct HelperBuilder<'a, C: Connector> {
    connector: C,
    target: Option<RemoteTarget>,
    reporter: &'a dyn Reporter,
    remote_path: String,
    activation_command: String,
    stamp: Option<RunStamp>,
}

impl<'a, C: Connector> HelperBuilder<'a, C> {
    /// The host to act on. Only [`Action::RenderTemplate`] works without one.
    pub fn target(mut self, target: RemoteTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn reporter(mut self, reporter: &'a dyn Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Remote file to manage (default: `/etc/gitlab/gitlab.rb`).
    pub fn remote_path(mut self, path: &str) -> Self {
        self.remote_path = path.to_string();
        self
    }

    /// Command run after upload when reconfigure is on
    /// (default: `gitlab-ctl reconfigure`).
    pub fn activation_command(mut self, command: &str) -> Self {
        self.activation_command = command.to_string();
        self
    }

    /// Pin the run timestamp instead of taking "now" per action.
    pub fn stamp(mut self, stamp: RunStamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    pub fn build(self) -> Helper<'a, C> {
        Helper {
            connector: self.connector,
            target: self.target,
            reporter: self.reporter,
            remote_path: self.remote_path,
            activation_command: self.activation_command,
            stamp: self.stamp,
        }
    }
}
