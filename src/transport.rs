//! Remote shell and file transfer.
//!
//! The pipelines only see the [`Connector`] and [`Transport`] traits. The
//! production implementation speaks SSH through libssh2 (`ssh2`): commands go
//! over exec channels, files over SFTP, authentication is by private key.
//!
//! Privileged commands run as-is for `root`, and through `sudo -n sh -c` for
//! any other user so a missing sudo rule fails instead of prompting.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use ssh2::{OpenFlags, OpenType, Session as SshSession};

use crate::error::HelperError;
use crate::types::{Credential, RemoteTarget};

/// Mode of uploaded temp files, set at creation so other users never see
/// their contents.
const UPLOAD_MODE: i32 = 0o600;

/// Pause between polls while a command has no output ready.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exit status and captured output of a remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// An open, authenticated connection to one host.
pub trait Transport {
    /// Run `command` as the connecting user.
    fn run(&mut self, command: &str) -> Result<CommandOutput, HelperError>;

    /// Run `command` with root privileges. With `pty`, a pseudo-terminal is
    /// allocated so interactive programs behave as on a console.
    fn run_privileged(&mut self, command: &str, pty: bool) -> Result<CommandOutput, HelperError>;

    /// Write `contents` to `remote_path` as the connecting user.
    fn upload(&mut self, contents: &[u8], remote_path: &str) -> Result<(), HelperError>;

    /// Read `remote_path` as the connecting user.
    fn download(&mut self, remote_path: &str) -> Result<Vec<u8>, HelperError>;

    fn close(&mut self) -> Result<(), HelperError>;
}

/// Opens transports. One call per run.
pub trait Connector {
    type Transport: Transport;

    fn connect(&self, target: &RemoteTarget) -> Result<Self::Transport, HelperError>;
}

/// Connects over SSH with key-file authentication.
#[derive(Debug, Clone, Copy)]
pub struct SshConnector {
    connect_timeout: Option<Duration>,
}

impl SshConnector {
    pub fn new() -> Self {
        Self {
            connect_timeout: None,
        }
    }

    /// Bound the TCP connect. Commands themselves are never timed out.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for SshConnector {
    type Transport = SshTransport;

    fn connect(&self, target: &RemoteTarget) -> Result<SshTransport, HelperError> {
        let fail = |reason: String| HelperError::Transport {
            host: target.host.clone(),
            reason,
        };

        let tcp = match self.connect_timeout {
            Some(timeout) => {
                let addr = (target.host.as_str(), target.port)
                    .to_socket_addrs()
                    .map_err(|e| fail(e.to_string()))?
                    .next()
                    .ok_or_else(|| fail("host name did not resolve".into()))?;
                TcpStream::connect_timeout(&addr, timeout)
            }
            None => TcpStream::connect((target.host.as_str(), target.port)),
        }
        .map_err(|e| fail(e.to_string()))?;

        let mut session = SshSession::new().map_err(|e| fail(e.to_string()))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|e| fail(e.to_string()))?;

        let Credential::KeyFile(key) = &target.credential;
        session
            .userauth_pubkey_file(&target.user, None, key, None)
            .map_err(|e| fail(format!("authentication as {} rejected: {e}", target.user)))?;
        if !session.authenticated() {
            return Err(fail(format!("authentication as {} rejected", target.user)));
        }

        Ok(SshTransport {
            session,
            host: target.host.clone(),
            root: target.is_root(),
        })
    }
}

/// A live SSH session.
pub struct SshTransport {
    session: SshSession,
    host: String,
    root: bool,
}

impl SshTransport {
    fn fail(&self, reason: impl ToString) -> HelperError {
        HelperError::Transport {
            host: self.host.clone(),
            reason: reason.to_string(),
        }
    }

    fn exec(&mut self, command: &str, pty: bool) -> Result<CommandOutput, HelperError> {
        let mut channel = self.session.channel_session().map_err(|e| self.fail(e))?;
        if pty {
            channel
                .request_pty("xterm", None, None)
                .map_err(|e| self.fail(e))?;
        }
        channel.exec(command).map_err(|e| self.fail(e))?;

        self.session.set_blocking(false);
        let drained = drain_streams(channel.stream(0), channel.stderr(), || {
            std::thread::sleep(POLL_INTERVAL)
        });
        self.session.set_blocking(true);
        let (stdout, stderr) = drained.map_err(|e| self.fail(e))?;

        channel.wait_close().map_err(|e| self.fail(e))?;
        let status = channel.exit_status().map_err(|e| self.fail(e))?;
        Ok(CommandOutput {
            status,
            stdout,
            stderr,
        })
    }
}

impl Transport for SshTransport {
    fn run(&mut self, command: &str) -> Result<CommandOutput, HelperError> {
        self.exec(command, false)
    }

    fn run_privileged(&mut self, command: &str, pty: bool) -> Result<CommandOutput, HelperError> {
        let command = privileged_command(command, self.root);
        self.exec(&command, pty)
    }

    fn upload(&mut self, contents: &[u8], remote_path: &str) -> Result<(), HelperError> {
        let sftp = self.session.sftp().map_err(|e| self.fail(e))?;
        let mut file = sftp
            .open_mode(
                Path::new(remote_path),
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
                UPLOAD_MODE,
                OpenType::File,
            )
            .map_err(|e| self.fail(format!("cannot create {remote_path}: {e}")))?;
        file.write_all(contents)
            .map_err(|e| self.fail(format!("cannot write {remote_path}: {e}")))?;
        Ok(())
    }

    fn download(&mut self, remote_path: &str) -> Result<Vec<u8>, HelperError> {
        let sftp = self.session.sftp().map_err(|e| self.fail(e))?;
        let mut file = sftp
            .open(Path::new(remote_path))
            .map_err(|e| self.fail(format!("cannot open {remote_path}: {e}")))?;
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)
            .map_err(|e| self.fail(format!("cannot read {remote_path}: {e}")))?;
        Ok(contents)
    }

    fn close(&mut self) -> Result<(), HelperError> {
        self.session
            .disconnect(None, "closing", None)
            .map_err(|e| self.fail(e))
    }
}

/// Wrap `command` for root execution.
pub fn privileged_command(command: &str, already_root: bool) -> String {
    if already_root {
        command.to_string()
    } else {
        format!("sudo -n sh -c {}", shell_escape(command))
    }
}

/// Quote `s` for a POSIX shell. Plain path-like words are returned bare.
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '@' | '+'))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Read both streams to EOF, taking whatever each has ready in turn. Neither
/// stream waits on the other reaching EOF. `WouldBlock` from either stream means "nothing yet"; `wait` runs when
/// neither made progress.
fn drain_streams(
    mut stdout: impl Read,
    mut stderr: impl Read,
    mut wait: impl FnMut(),
) -> std::io::Result<(String, String)> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let (mut out_done, mut err_done) = (false, false);
    let mut buf = [0u8; 8192];

    while !(out_done && err_done) {
        let mut progressed = false;
        if !out_done {
            progressed |= read_ready(&mut stdout, &mut buf, &mut out, &mut out_done)?;
        }
        if !err_done {
            progressed |= read_ready(&mut stderr, &mut buf, &mut err, &mut err_done)?;
        }
        if !progressed && !(out_done && err_done) {
            wait();
        }
    }

    Ok((
        String::from_utf8_lossy(&out).into_owned(),
        String::from_utf8_lossy(&err).into_owned(),
    ))
}

/// One read from `source`. Returns whether any bytes arrived.
fn read_ready(
    source: &mut impl Read,
    buf: &mut [u8],
    sink: &mut Vec<u8>,
    done: &mut bool,
) -> std::io::Result<bool> {
    match source.read(buf) {
        Ok(0) => {
            *done = true;
            Ok(false)
        }
        Ok(n) => {
            sink.extend_from_slice(&buf[..n]);
            Ok(true)
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(false),
        Err(e) => Err(e),
    }
}
