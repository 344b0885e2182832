//! Command channel to the archive host.
//!
//! One [`SshSession`] is opened per process and reused for every remote
//! command of every night. Commands never fail from the caller's point of
//! view: a channel or read error yields an empty [`CommandOutput`].

use regex::Regex;
use std::borrow::Cow;
use std::io::{self, Read};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::RemoteConfig;
use crate::utils::errors::{Result, SyncError};
use crate::utils::NightLog;

/// Normalized output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    /// Split raw output into lines and strip terminal escape sequences.
    pub fn from_raw(stdout: &str, stderr: &str) -> Self {
        Self {
            stdout: normalize_lines(stdout),
            stderr: normalize_lines(stderr),
        }
    }
}

fn normalize_lines(raw: &str) -> Vec<String> {
    raw.lines().map(|line| strip_ansi(line).into_owned()).collect()
}

/// Remove color/control sequences of the form `ESC ... m`.
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| Regex::new(r"\x1b[^m]*m").expect("static regex"));
    re.replace_all(line, "")
}

/// An authenticated command channel to the archive host.
///
/// Not safe for concurrent use; the pipeline drives it from one thread.
pub trait RemoteSession {
    /// `<user>@<host>` as written into manifests and copy destinations.
    fn destination(&self) -> &str;

    /// Run one command non-interactively and collect its output.
    fn execute(&mut self, command: &str, log: &mut NightLog) -> CommandOutput;

    /// Copy a local file to `remote_path` (already escaped for the remote
    /// shell). The result is advisory only.
    fn copy_to(&mut self, local: &Path, remote_path: &str, log: &mut NightLog) -> Result<()>;
}

/// libssh2-backed session; copies go through the system `scp` client.
pub struct SshSession {
    session: ssh2::Session,
    destination: String,
    port: u16,
    identity: Option<PathBuf>,
    timeout_secs: u64,
}

impl SshSession {
    /// Connect and authenticate, trying the ssh-agent first and then the
    /// configured identity files.
    pub fn connect(remote: &RemoteConfig) -> Result<Self> {
        let tcp = TcpStream::connect((remote.host.as_str(), remote.port))?;
        let mut session = ssh2::Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake()?;

        if remote.command_timeout_secs > 0 {
            let millis = remote.command_timeout_secs.saturating_mul(1000);
            session.set_timeout(u32::try_from(millis).unwrap_or(u32::MAX));
        }

        let mut auth_errors: Vec<String> = Vec::new();
        let mut identity = None;

        if let Err(e) = session.userauth_agent(&remote.user) {
            auth_errors.push(format!("agent: {}", e));
        }

        if !session.authenticated() {
            for key in identity_candidates(&remote.identity_files) {
                match session.userauth_pubkey_file(&remote.user, None, &key, None) {
                    Ok(()) if session.authenticated() => {
                        identity = Some(key);
                        break;
                    }
                    Ok(()) => {}
                    Err(e) => auth_errors.push(format!("{}: {}", key.display(), e)),
                }
            }
        }

        if !session.authenticated() {
            return Err(SyncError::Authentication(format!(
                "could not authenticate as {} on {} ({})",
                remote.user,
                remote.host,
                auth_errors.join("; ")
            )));
        }

        tracing::info!(host = %remote.host, user = %remote.user, "Connected to archive host");

        Ok(Self {
            session,
            destination: format!("{}@{}", remote.user, remote.host),
            port: remote.port,
            identity,
            timeout_secs: remote.command_timeout_secs,
        })
    }

    fn run(&mut self, command: &str) -> Result<(String, String)> {
        let mut channel = self.session.channel_session()?;
        channel.exec(command)?;

        let deadline = (self.timeout_secs > 0)
            .then(|| Instant::now() + Duration::from_secs(self.timeout_secs));

        self.session.set_blocking(false);
        let drained = drain_streams(&mut channel, deadline);
        self.session.set_blocking(true);
        let (stdout, stderr) = drained?;
        channel.wait_close()?;

        Ok((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
        ))
    }
}

/// Both output streams of a running command.
trait CommandStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn eof(&self) -> bool;
}

impl CommandStreams for ssh2::Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stderr().read(buf)
    }

    fn eof(&self) -> bool {
        ssh2::Channel::eof(self)
    }
}

/// Read one chunk, treating `WouldBlock` as no data. Returns the bytes read.
fn read_chunk<F>(read: F, buf: &mut [u8], out: &mut Vec<u8>) -> io::Result<usize>
where
    F: FnOnce(&mut [u8]) -> io::Result<usize>,
{
    match read(buf) {
        Ok(n) => {
            out.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

/// Collect stdout and stderr by alternating reads, so a full stderr queue
/// never stalls a reader waiting on stdout. Expects non-blocking streams.
fn drain_streams<S>(streams: &mut S, deadline: Option<Instant>) -> io::Result<(Vec<u8>, Vec<u8>)>
where
    S: CommandStreams + ?Sized,
{
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 16 * 1024];

    loop {
        let mut read = read_chunk(|b| streams.read_stdout(b), &mut buf, &mut stdout)?;
        read += read_chunk(|b| streams.read_stderr(b), &mut buf, &mut stderr)?;
        if read > 0 {
            continue;
        }

        if streams.eof() {
            // Pick up anything queued alongside the EOF.
            while read_chunk(|b| streams.read_stdout(b), &mut buf, &mut stdout)?
                + read_chunk(|b| streams.read_stderr(b), &mut buf, &mut stderr)?
                > 0
            {}
            return Ok((stdout, stderr));
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "remote command timed out"));
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn identity_candidates(configured: &[PathBuf]) -> Vec<PathBuf> {
    if !configured.is_empty() {
        return configured.to_vec();
    }
    let Some(home) = std::env::var_os("HOME").map(PathBuf::from) else {
        return Vec::new();
    };
    ["id_ed25519", "id_rsa", "id_ecdsa"]
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .filter(|p| p.exists())
        .collect()
}

impl RemoteSession for SshSession {
    fn destination(&self) -> &str {
        &self.destination
    }

    fn execute(&mut self, command: &str, log: &mut NightLog) -> CommandOutput {
        log.debug(format!("  Running remote command: {}", command));

        let output = match self.run(command) {
            Ok((stdout, stderr)) => CommandOutput::from_raw(&stdout, &stderr),
            Err(e) => {
                log.warn(format!("  Remote command did not complete ({}): {}", command, e));
                CommandOutput::default()
            }
        };

        for line in &output.stdout {
            log.debug(format!("  STDOUT: {}", line));
        }
        for line in &output.stderr {
            log.debug(format!("  STDERR: {}", line));
        }
        output
    }

    fn copy_to(&mut self, local: &Path, remote_path: &str, log: &mut NightLog) -> Result<()> {
        let mut cmd = Command::new("scp");
        cmd.arg("-q")
            .arg("-P")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes");
        if self.timeout_secs > 0 {
            cmd.arg("-o").arg(format!("ConnectTimeout={}", self.timeout_secs));
        }
        if let Some(identity) = &self.identity {
            cmd.arg("-i").arg(identity);
        }
        cmd.arg(local)
            .arg(format!("{}:{}", self.destination, remote_path));

        log.debug(format!("  Running: {:?}", cmd));

        let status = cmd
            .status()
            .map_err(|e| SyncError::Transfer(format!("failed to spawn scp: {}", e)))?;
        if !status.success() {
            return Err(SyncError::Transfer(format!("scp exited with {}", status)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[0;32mabc\x1b[0m def"), "abc def");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn test_output_normalization() {
        let out = CommandOutput::from_raw(
            "\x1b[1mdeadbeef\x1b[0m  /a/b.fts\nsecond\n",
            "shasum: /a/c.fts: No such file or directory\n",
        );
        assert_eq!(out.stdout, vec!["deadbeef  /a/b.fts", "second"]);
        assert_eq!(out.stderr, vec!["shasum: /a/c.fts: No such file or directory"]);
    }

    #[test]
    fn test_empty_output() {
        let out = CommandOutput::from_raw("", "");
        assert!(out.stdout.is_empty());
        assert!(out.stderr.is_empty());
    }

    /// Serves queued chunks. Stdout stays blocked while stderr has data
    /// pending, like a channel whose window is full of unread stderr.
    struct QueuedStreams {
        stdout: Vec<Vec<u8>>,
        stderr: Vec<Vec<u8>>,
    }

    fn pop(queue: &mut Vec<Vec<u8>>, buf: &mut [u8]) -> io::Result<usize> {
        if queue.is_empty() {
            return Ok(0);
        }
        let chunk = queue.remove(0);
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }

    impl CommandStreams for QueuedStreams {
        fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.stderr.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            pop(&mut self.stdout, buf)
        }

        fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            pop(&mut self.stderr, buf)
        }

        fn eof(&self) -> bool {
            self.stdout.is_empty() && self.stderr.is_empty()
        }
    }

    #[test]
    fn test_drain_reads_stderr_while_stdout_is_blocked() {
        let mut streams = QueuedStreams {
            stdout: vec![b"/a/1.fts\n".to_vec(), b"/a/2.fts\n".to_vec()],
            stderr: (0..50)
                .map(|i| format!("ls: /b/{}: No such file or directory\n", i).into_bytes())
                .collect(),
        };

        let (stdout, stderr) = drain_streams(&mut streams, None).unwrap();

        assert_eq!(stdout, b"/a/1.fts\n/a/2.fts\n");
        let out = CommandOutput::from_raw(
            &String::from_utf8_lossy(&stdout),
            &String::from_utf8_lossy(&stderr),
        );
        assert_eq!(out.stderr.len(), 50);
        assert_eq!(out.stderr[49], "ls: /b/49: No such file or directory");
    }

    #[test]
    fn test_drain_times_out_on_silent_command() {
        struct Silent;
        impl CommandStreams for Silent {
            fn read_stdout(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::WouldBlock.into())
            }
            fn read_stderr(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::ErrorKind::WouldBlock.into())
            }
            fn eof(&self) -> bool {
                false
            }
        }

        let err = drain_streams(&mut Silent, Some(Instant::now())).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_identity_candidates_prefers_configured() {
        let configured = vec![PathBuf::from("/keys/archive_ed25519")];
        assert_eq!(identity_candidates(&configured), configured);
    }
}
