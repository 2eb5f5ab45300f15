//! Remote session management: connect, verify, back up, fetch, upload,
//! activate, and always close.
//!
//! `gitlab.rb` is owned by root, so reads and writes go through `/tmp`:
//!
//! ```text
//! fetch:   cp <path> /tmp/<name>.download.<stamp>  (root)
//!          chown <ssh user> <tmp>                   (root)
//!          sftp get <tmp>
//!          rm -f <tmp>                              (root)
//!
//! upload:  sftp put /tmp/<name>.upload.<stamp>
//!          chown root:root <tmp>; chmod 600 <tmp>   (root)
//!          mv <tmp> <path>                          (root)
//! ```
//!
//! If any upload step fails and a backup was taken, the backup is moved back
//! over `<path>` once. A failed restore is reported as
//! [`HelperError::Restore`], which callers must treat as needing an operator.

use crate::error::{HelperError, RunError, Stage, StageExt};
use crate::report::Reporter;
use crate::transport::{CommandOutput, Connector, Transport, shell_escape};
use crate::types::{RemoteTarget, RunStamp, basename};

/// Remote location of a backup taken during this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupHandle {
    pub path: String,
}

/// Open a session to `target`, verify it, run `body`, and close the session
/// whatever `body` returns.
pub fn with_session<C, R, F>(
    connector: &C,
    target: &RemoteTarget,
    stamp: RunStamp,
    reporter: &dyn Reporter,
    body: F,
) -> Result<R, RunError>
where
    C: Connector,
    F: FnOnce(&mut Session<'_, C::Transport>) -> Result<R, RunError>,
{
    reporter.info(&format!("Connecting to {target}..."));
    let transport = connector.connect(target).at(Stage::Connect)?;
    let mut session = Session {
        transport,
        target,
        stamp,
        reporter,
        closed: false,
    };

    session.verify().at(Stage::Verify)?;
    reporter.info("Connection successful.");

    let result = body(&mut session);
    session.close();
    result
}

/// One open connection for one run. Dropping it closes the connection.
pub struct Session<'a, T: Transport> {
    transport: T,
    target: &'a RemoteTarget,
    stamp: RunStamp,
    reporter: &'a dyn Reporter,
    closed: bool,
}

impl<T: Transport> Session<'_, T> {
    pub fn target(&self) -> &RemoteTarget {
        self.target
    }

    pub fn stamp(&self) -> &RunStamp {
        &self.stamp
    }

    /// Fail fast on hosts that accept the connection but cannot run commands.
    fn verify(&mut self) -> Result<(), HelperError> {
        let out = self.transport.run("uname -a")?;
        if !out.success() {
            return Err(HelperError::Transport {
                host: self.target.host.clone(),
                reason: format!("liveness check exited with status {}", out.status),
            });
        }
        self.reporter.debug(out.stdout.trim());
        Ok(())
    }

    /// Copy `path` to `<path>.bak.<stamp>` on the remote host.
    pub fn backup(&mut self, path: &str) -> Result<BackupHandle, HelperError> {
        let backup = format!("{path}.bak.{}", self.stamp.compact());
        self.reporter.info(&format!("Creating backup: {backup}"));
        self.privileged(&format!(
            "cp -p {} {}",
            shell_escape(path),
            shell_escape(&backup)
        ))?;
        self.reporter.info("Backup created successfully.");
        Ok(BackupHandle { path: backup })
    }

    /// Read a root-owned file through a temporary copy.
    pub fn fetch_privileged(&mut self, path: &str) -> Result<Vec<u8>, HelperError> {
        let tmp = self.temp_path(path, "download");
        self.reporter.info(&format!("Downloading current {path}..."));

        self.privileged(&format!("cp {} {}", shell_escape(path), shell_escape(&tmp)))?;
        self.privileged(&format!(
            "chown {} {}",
            shell_escape(&self.target.user),
            shell_escape(&tmp)
        ))?;

        let contents = match self.transport.download(&tmp) {
            Ok(contents) => contents,
            Err(e) => {
                self.remove_quietly(&tmp);
                return Err(e);
            }
        };
        self.privileged(&format!("rm -f {}", shell_escape(&tmp)))?;

        self.reporter
            .info(&format!("{path} downloaded successfully ({} bytes).", contents.len()));
        Ok(contents)
    }

    /// Replace `path` with `contents` (root:root, mode 600).
    ///
    /// On failure the backup, when there is one, is moved back over `path`.
    pub fn upload_privileged(
        &mut self,
        contents: &[u8],
        path: &str,
        backup: Option<&BackupHandle>,
    ) -> Result<(), HelperError> {
        self.reporter.info(&format!("Uploading modified {path}..."));
        let upload = match self.try_upload(contents, path) {
            Ok(()) => {
                self.reporter.info("Modified configuration uploaded successfully.");
                return Ok(());
            }
            Err(e) => e,
        };
        self.reporter
            .error(&format!("Failed to upload modified configuration: {upload}"));

        let Some(backup) = backup else {
            return Err(upload);
        };

        self.reporter
            .warn(&format!("Attempting to restore backup {}...", backup.path));
        match self.privileged(&format!(
            "mv {} {}",
            shell_escape(&backup.path),
            shell_escape(path)
        )) {
            Ok(()) => {
                self.reporter.info("Backup restored.");
                Err(upload)
            }
            Err(restore) => {
                let err = HelperError::Restore {
                    host: self.target.host.clone(),
                    path: path.to_string(),
                    backup: backup.path.clone(),
                    upload: Box::new(upload),
                    restore: Box::new(restore),
                };
                self.reporter.error(&format!("!!! {err} !!!"));
                Err(err)
            }
        }
    }

    /// Run the activation command with a pseudo-terminal. Its captured output
    /// is forwarded to the reporter line by line once the command exits.
    pub fn activate(&mut self, command: &str) -> Result<(), HelperError> {
        self.reporter.info(&format!("Running '{command}'..."));
        let out = self.transport.run_privileged(command, true)?;
        for line in out.stdout.lines().chain(out.stderr.lines()) {
            self.reporter.info(&format!("  | {line}"));
        }
        if !out.success() {
            let err = HelperError::Activation {
                command: command.to_string(),
                status: out.status,
            };
            self.reporter.error(&err.to_string());
            return Err(err);
        }
        self.reporter
            .info(&format!("'{command}' completed successfully."));
        Ok(())
    }

    /// Close the connection. Failures are logged; the run result stands.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.reporter.info("Closing connection.");
        if let Err(e) = self.transport.close() {
            self.reporter
                .warn(&format!("Error while closing connection: {e}"));
        }
    }

    fn try_upload(&mut self, contents: &[u8], path: &str) -> Result<(), HelperError> {
        let tmp = self.temp_path(path, "upload");
        self.transport.upload(contents, &tmp)?;
        let tmp = shell_escape(&tmp);
        self.privileged(&format!("chown root:root {tmp}"))?;
        self.privileged(&format!("chmod 600 {tmp}"))?;
        self.privileged(&format!("mv {tmp} {}", shell_escape(path)))
    }

    fn remove_quietly(&mut self, tmp: &str) {
        if let Err(e) = self.privileged(&format!("rm -f {}", shell_escape(tmp))) {
            self.reporter
                .warn(&format!("Could not remove temporary file {tmp}: {e}"));
        }
    }

    fn privileged(&mut self, command: &str) -> Result<(), HelperError> {
        self.reporter.debug(&format!("sudo: {command}"));
        let CommandOutput { status, stderr, .. } = self.transport.run_privileged(command, false)?;
        if status != 0 {
            return Err(HelperError::Privilege {
                command: command.to_string(),
                status,
                stderr,
            });
        }
        Ok(())
    }

    fn temp_path(&self, path: &str, direction: &str) -> String {
        format!("/tmp/{}.{direction}.{}", basename(path), self.stamp.compact())
    }
}

impl<T: Transport> Drop for Session<'_, T> {
    fn drop(&mut self) {
        self.close();
    }
}
