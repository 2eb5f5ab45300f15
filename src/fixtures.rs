#[cfg(test)]
pub mod test {
    //! Test doubles: an in-memory remote host and a recording reporter.

    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::rc::Rc;

    use chrono::{Local, TimeZone};
    use tracing::Level;

    use crate::error::HelperError;
    use crate::report::Reporter;
    use crate::transport::{CommandOutput, Connector, Transport};
    use crate::types::{Credential, RemoteTarget, RunStamp};

    /// 2024-05-17 09:30:00 local time.
    pub fn fixed_stamp() -> RunStamp {
        Local
            .with_ymd_and_hms(2024, 5, 17, 9, 30, 0)
            .single()
            .expect("unambiguous local time")
            .into()
    }

    /// A non-root target; the key file is never opened by the fake.
    pub fn fake_target() -> RemoteTarget {
        RemoteTarget {
            host: "gitlab.test".into(),
            user: "deploy".into(),
            port: 22,
            credential: Credential::KeyFile(PathBuf::from("/keys/id_ed25519")),
        }
    }

    // -- Fake host -------------------------------------------------------------

    #[derive(Default)]
    struct HostState {
        files: HashMap<String, Vec<u8>>,
        commands: Vec<String>,
        pty_commands: Vec<String>,
        failing: Vec<String>,
        refuse_connections: bool,
        fail_uploads: bool,
        fail_downloads: bool,
        connects: usize,
        closed: bool,
    }

    /// A remote host with a flat in-memory filesystem that understands the
    /// handful of shell commands the session manager issues. Cloning shares
    /// the same host.
    #[derive(Clone, Default)]
    pub struct FakeHost(Rc<RefCell<HostState>>);

    impl FakeHost {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn put_file(&self, path: &str, content: impl AsRef<[u8]>) {
            self.0
                .borrow_mut()
                .files
                .insert(path.into(), content.as_ref().to_vec());
        }

        pub fn file(&self, path: &str) -> Option<String> {
            self.0
                .borrow()
                .files
                .get(path)
                .map(|b| String::from_utf8_lossy(b).into_owned())
        }

        pub fn file_names(&self) -> Vec<String> {
            let mut names: Vec<String> = self.0.borrow().files.keys().cloned().collect();
            names.sort();
            names
        }

        /// Every command that starts with `prefix` exits with status 1.
        pub fn fail_command(&self, prefix: &str) {
            self.0.borrow_mut().failing.push(prefix.into());
        }

        pub fn refuse_connections(&self) {
            self.0.borrow_mut().refuse_connections = true;
        }

        pub fn fail_uploads(&self) {
            self.0.borrow_mut().fail_uploads = true;
        }

        pub fn fail_downloads(&self) {
            self.0.borrow_mut().fail_downloads = true;
        }

        pub fn commands(&self) -> Vec<String> {
            self.0.borrow().commands.clone()
        }

        pub fn pty_commands(&self) -> Vec<String> {
            self.0.borrow().pty_commands.clone()
        }

        pub fn connects(&self) -> usize {
            self.0.borrow().connects
        }

        pub fn is_closed(&self) -> bool {
            self.0.borrow().closed
        }

        fn execute(&self, command: &str) -> CommandOutput {
            let mut state = self.0.borrow_mut();
            state.commands.push(command.into());

            if state.failing.iter().any(|p| command.starts_with(p.as_str())) {
                return status(1, "", &format!("simulated failure: {command}"));
            }

            let words: Vec<String> = command
                .split_whitespace()
                .map(|w| w.trim_matches('\'').to_string())
                .collect();
            let args: Vec<&str> = words.iter().map(String::as_str).collect();
            let files = &mut state.files;

            match args.as_slice() {
                ["uname", "-a"] => status(0, "Linux gitlab 6.1.0 x86_64 GNU/Linux\n", ""),
                ["cp", src, dst] | ["cp", "-p", src, dst] => match files.get(*src).cloned() {
                    Some(content) => {
                        files.insert((*dst).into(), content);
                        status(0, "", "")
                    }
                    None => status(1, "", &format!("cp: cannot stat '{src}'")),
                },
                ["mv", src, dst] => match files.remove(*src) {
                    Some(content) => {
                        files.insert((*dst).into(), content);
                        status(0, "", "")
                    }
                    None => status(1, "", &format!("mv: cannot stat '{src}'")),
                },
                ["chown", _, path] | ["chmod", _, path] => {
                    if files.contains_key(*path) {
                        status(0, "", "")
                    } else {
                        status(1, "", &format!("{}: cannot access '{path}'", args[0]))
                    }
                }
                ["rm", "-f", path] => {
                    files.remove(*path);
                    status(0, "", "")
                }
                ["gitlab-ctl", "reconfigure"] => status(
                    0,
                    "Starting Chef Infra Client\ngitlab Reconfigured!\n",
                    "",
                ),
                _ => status(127, "", &format!("sh: {command}: not found")),
            }
        }
    }

    fn status(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            status: code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Connects to a [`FakeHost`].
    pub struct FakeConnector {
        host: FakeHost,
    }

    impl FakeConnector {
        pub fn new(host: &FakeHost) -> Self {
            Self { host: host.clone() }
        }
    }

    impl Connector for FakeConnector {
        type Transport = FakeTransport;

        fn connect(&self, target: &RemoteTarget) -> Result<FakeTransport, HelperError> {
            let mut state = self.host.0.borrow_mut();
            state.connects += 1;
            if state.refuse_connections {
                return Err(HelperError::Transport {
                    host: target.host.clone(),
                    reason: "connection refused".into(),
                });
            }
            state.closed = false;
            Ok(FakeTransport {
                host: self.host.clone(),
                name: target.host.clone(),
            })
        }
    }

    pub struct FakeTransport {
        host: FakeHost,
        name: String,
    }

    impl FakeTransport {
        fn fail(&self, reason: &str) -> HelperError {
            HelperError::Transport {
                host: self.name.clone(),
                reason: reason.into(),
            }
        }
    }

    impl Transport for FakeTransport {
        fn run(&mut self, command: &str) -> Result<CommandOutput, HelperError> {
            Ok(self.host.execute(command))
        }

        fn run_privileged(
            &mut self,
            command: &str,
            pty: bool,
        ) -> Result<CommandOutput, HelperError> {
            if pty {
                self.host.0.borrow_mut().pty_commands.push(command.into());
            }
            Ok(self.host.execute(command))
        }

        fn upload(&mut self, contents: &[u8], remote_path: &str) -> Result<(), HelperError> {
            if self.host.0.borrow().fail_uploads {
                return Err(self.fail("sftp write failed"));
            }
            self.host.put_file(remote_path, contents);
            Ok(())
        }

        fn download(&mut self, remote_path: &str) -> Result<Vec<u8>, HelperError> {
            let state = self.host.0.borrow();
            if state.fail_downloads {
                return Err(self.fail("sftp read failed"));
            }
            state
                .files
                .get(remote_path)
                .cloned()
                .ok_or_else(|| self.fail("no such file"))
        }

        fn close(&mut self) -> Result<(), HelperError> {
            self.host.0.borrow_mut().closed = true;
            Ok(())
        }
    }

    // -- Reporter --------------------------------------------------------------

    /// Keeps every event for assertions.
    #[derive(Default)]
    pub struct RecordingReporter {
        events: RefCell<Vec<(Level, String)>>,
    }

    impl RecordingReporter {
        pub fn contains(&self, needle: &str) -> bool {
            self.events.borrow().iter().any(|(_, m)| m.contains(needle))
        }

        pub fn messages_at(&self, level: Level) -> Vec<String> {
            self.events
                .borrow()
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    impl Reporter for RecordingReporter {
        fn event(&self, level: Level, message: &str) {
            self.events.borrow_mut().push((level, message.into()));
        }
    }

    #[test]
    fn fake_host_copies_and_moves() {
        let host = FakeHost::new();
        host.put_file("/a", "x");
        assert!(host.execute("cp -p /a /b").success());
        assert!(host.execute("mv /b /c").success());
        assert_eq!(host.file("/c").as_deref(), Some("x"));
        assert!(host.file("/b").is_none());
        assert_eq!(host.execute("mv /b /d").status, 1);
    }

    #[test]
    fn fake_host_unknown_command() {
        assert_eq!(FakeHost::new().execute("reboot").status, 127);
    }
}
