//! Patch or replace `/etc/gitlab/gitlab.rb` on a remote GitLab host, one host
//! at a time, with a backup and a rollback attempt on failure.
//!
//! ```ignore
//! let reporter = TracingReporter;
//! let helper = Helper::builder(SshConnector::new())
//!     .target(RemoteTarget::new("gitlab.example.com", "root", 22, "/keys/id_ed25519")?)
//!     .reporter(&reporter)
//!     .build();
//!
//! helper.handle(&Action::SetConfig {
//!     setting: "external_url".into(),
//!     value: "'https://gitlab.example.com'".into(),
//!     options: RunOptions::default(),
//! })?;
//! ```
//!
//! # Two ways to change the file
//!
//! - **Set one directive** ([`Action::SetConfig`]). The current file is
//!   fetched, the first line that sets the key (commented or not) is replaced
//!   with `key = value`, later occurrences are commented out, and a missing
//!   key is appended under a provenance comment. See [`patch`].
//! - **Apply a template** ([`Action::ApplyTemplate`]). A Jinja template is
//!   rendered locally with variables from a YAML file and replaces the remote
//!   file wholesale, under a four-line generated-file header. See [`render`].
//!   [`Action::RenderTemplate`] stops after rendering and never connects.
//!
//! # Remote protocol
//!
//! Every remote action runs inside one session:
//!
//! ```text
//! connect → uname -a → [backup] → fetch → patch → upload → [gitlab-ctl reconfigure]
//! ```
//!
//! The file is root-owned, so reads and writes go through `/tmp` with
//! privileged `cp`, `chown`, `chmod` and `mv`. Non-root users are wrapped in
//! `sudo -n`, so a missing sudo rule fails instead of hanging on a prompt.
//!
//! Backups are named `<path>.bak.<YYYYMMDDHHMMSS>`. All names and comments of
//! a run share a single [`RunStamp`].
//!
//! # Failure handling
//!
//! Every failure is a [`RunError`]: the [`Stage`] that stopped the run plus a
//! [`HelperError`] naming the failure class. If the upload fails after a
//! backup was taken, the backup is moved back over the file. If that restore
//! fails too, the error is [`HelperError::Restore`] and
//! [`RunError::is_critical`] is true: the host needs an operator.
//!
//! A failed activation leaves the new file in place; it just is not live yet.
//!
//! The session is closed on every path, including panics inside a step.
//!
//! # Transport
//!
//! [`Connector`] and [`Transport`] are the seam to the network.
//! [`SshConnector`] speaks SSH via libssh2 with key-file authentication.
//! Tests plug in an in-memory host.
//!
//! # Logging
//!
//! Nothing here installs a global logger. Components report through a
//! [`Reporter`]; [`TracingReporter`] forwards to `tracing`, and the
//! `gitlab-helper` binary installs a `tracing-subscriber` writing to stderr.
//!
//! # Operator settings
//!
//! Defaults the operator would otherwise repeat (SSH user, port, key file,
//! backup and reconfigure switches) come from [`Settings`]: compiled
//! defaults, then `gitlab-helper.toml` files, then `GITLAB_HELPER__*`
//! environment variables, then CLI flags. See the [`settings`] module.
//!
//! # Clap adapter
//!
//! The `cli` module (behind the `clap` feature, on by default) holds the
//! clap derive types of the `gitlab-helper` binary. They only produce
//! [`Action`] and [`SettingsAction`] values; the core does not depend on
//! clap.

pub mod error;
pub mod helper;
pub mod patch;
pub mod render;
pub mod report;
pub mod session;
pub mod settings;
pub mod transport;
pub mod types;

#[cfg(feature = "clap")]
pub mod cli;

#[cfg(test)]
mod fixtures;

pub use error::{HelperError, RenderError, RunError, Stage};
pub use helper::{Helper, HelperBuilder, Outcome};
pub use patch::{PatchOutcome, Patched};
pub use render::RenderedDocument;
pub use report::{Reporter, SilentReporter, TracingReporter};
pub use settings::{Settings, SettingsAction, SettingsLoader, SettingsOutcome};
pub use transport::{CommandOutput, Connector, SshConnector, SshTransport, Transport};
pub use types::{Action, Credential, RemoteTarget, RunOptions, RunStamp, SearchPath};
