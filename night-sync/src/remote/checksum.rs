//! Content checksums, computed locally and queried on the archive host.
//!
//! Both sides use SHA-256 so digests compare directly as lowercase hex.

use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use super::session::{CommandOutput, RemoteSession};
use crate::utils::NightLog;

/// Remote command producing `<hex digest>  <path>` for a file.
pub const REMOTE_CHECKSUM_COMMAND: &str = "shasum -a 256";

/// Placeholder token some acquisition scripts leave in file names.
const TEMPLATE_TOKEN: &str = "$TGTNAME-$INTERVAL";

/// What the archive host said about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteQueryResult {
    /// The file does not exist remotely (not copied yet).
    Absent,
    /// The query itself failed; the file may or may not exist.
    Error(String),
    /// Remote digest, lowercase hex.
    Hash(String),
}

/// Escape a path before embedding it in a remote shell command.
///
/// `$` is escaped only when the template token is present; `+` is always
/// escaped.
pub fn escape_remote_path(path: &str) -> Cow<'_, str> {
    let mut escaped = Cow::Borrowed(path);
    if escaped.contains(TEMPLATE_TOKEN) {
        escaped = Cow::Owned(escaped.replace('$', "\\$"));
    }
    if escaped.contains('+') {
        escaped = Cow::Owned(escaped.replace('+', "\\+"));
    }
    escaped
}

pub fn hashes_match(a: &str, b: &str) -> bool {
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}

/// SHA-256 of a local file, streamed.
pub fn local_checksum(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Classify the output of a remote checksum command for `remote_path`.
pub fn classify(output: &CommandOutput, remote_path: &str) -> RemoteQueryResult {
    if output.stderr.is_empty() {
        let Some(first) = output.stdout.first() else {
            return RemoteQueryResult::Error("empty checksum output".to_string());
        };
        return match parse_checksum_line(first, remote_path) {
            Some(hash) => RemoteQueryResult::Hash(hash),
            None => RemoteQueryResult::Error(format!("unexpected checksum output: {}", first)),
        };
    }

    if output
        .stderr
        .iter()
        .any(|line| line.contains("No such file or directory"))
    {
        RemoteQueryResult::Absent
    } else {
        RemoteQueryResult::Error(output.stderr.join("; "))
    }
}

fn parse_checksum_line(line: &str, remote_path: &str) -> Option<String> {
    let (hash, name) = line.trim().split_once(char::is_whitespace)?;
    let name = name.trim_start().trim_start_matches('*');

    if hash.is_empty() || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }

    let same_file = name == remote_path
        || match (Path::new(name).file_name(), Path::new(remote_path).file_name()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        };

    same_file.then(|| hash.to_ascii_lowercase())
}

/// Ask the archive host for the checksum of `remote_path`.
pub fn query_remote<S>(session: &mut S, remote_path: &str, log: &mut NightLog) -> RemoteQueryResult
where
    S: RemoteSession + ?Sized,
{
    let escaped = escape_remote_path(remote_path);
    if escaped != remote_path {
        log.debug(format!("  Escaped remote path to {}", escaped));
    }

    let output = session.execute(&format!("{} {}", REMOTE_CHECKSUM_COMMAND, escaped), log);
    let result = classify(&output, remote_path);

    match &result {
        RemoteQueryResult::Hash(_) => log.debug("  Checksum received"),
        RemoteQueryResult::Absent => log.info("  Did not find file on remote machine."),
        RemoteQueryResult::Error(detail) => {
            log.warn(format!("  Remote checksum query failed: {}", detail))
        }
    }
    result
}
