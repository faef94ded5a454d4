use std::io::{Read, Write};
use std::path::Path;

use sha2::{Digest, Sha256};

/// sha256 of the empty payload; used for zero-length symlink placeholders.
pub const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

// Lightweight path display wrapper that renders with forward slashes.
// Avoids allocating strings until actually formatted for logs.
pub(crate) struct DisplayPath<'a>(pub(crate) &'a Path);

impl<'a> std::fmt::Display for DisplayPath<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.to_string_lossy();
        f.write_str(&normalize_path(&s, true))
    }
}

pub(crate) fn display_path(p: &Path) -> DisplayPath<'_> {
    DisplayPath(p)
}

/// Normalize a path-like string for internal use:
/// - converts backslashes to forward slashes
/// - collapses repeated slashes
/// - optionally preserves a trailing slash (a trailing '/' marks a directory target)
pub fn normalize_path(p: &str, preserve_trailing_slash: bool) -> String {
    if p.is_empty() {
        return String::new();
    }
    let mut s = p.replace('\\', "/");
    while s.contains("//") {
        s = s.replace("//", "/");
    }
    if !preserve_trailing_slash {
        while s.len() > 1 && s.ends_with('/') {
            s.pop();
        }
    }
    s
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut f = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Which side of a stream copy failed.
#[derive(Debug)]
pub(crate) enum StreamError {
    Read(std::io::Error),
    Write(std::io::Error),
}

/// Copy from a reader into `tmp_path`, hashing as we go. On any read/write
/// error the tmp file is removed. Returns bytes written and the sha256.
pub(crate) fn copy_stream_with_cleanup<R: Read>(
    mut reader: R,
    tmp_path: &Path,
    buf_size: usize,
    mut on_chunk: impl FnMut(u64),
) -> Result<(u64, String), StreamError> {
    let mut local_f = std::fs::File::create(tmp_path).map_err(StreamError::Write)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut written = 0u64;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = local_f.write_all(&buf[..n]) {
                    let _ = std::fs::remove_file(tmp_path);
                    return Err(StreamError::Write(e));
                }
                hasher.update(&buf[..n]);
                written += n as u64;
                on_chunk(n as u64);
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = std::fs::remove_file(tmp_path);
                return Err(StreamError::Read(e));
            }
        }
    }
    if let Err(e) = local_f.sync_all() {
        let _ = std::fs::remove_file(tmp_path);
        return Err(StreamError::Write(e));
    }
    Ok((written, hex(&hasher.finalize())))
}

/// Attempt to atomically rename `tmp_path` to `local_target`, retrying a few times
/// if the target already exists or is temporarily permission-denied (Windows semantics).
pub(crate) fn atomic_rename_with_retries(
    tmp_path: &Path,
    local_target: &Path,
) -> Result<(), std::io::Error> {
    use std::time::Duration;
    let mut attempts = 0;
    loop {
        match std::fs::rename(tmp_path, local_target) {
            Ok(()) => return Ok(()),
            Err(e) => {
                let kind = e.kind();
                if attempts < 2
                    && (kind == std::io::ErrorKind::AlreadyExists
                        || kind == std::io::ErrorKind::PermissionDenied)
                {
                    let _ = std::fs::remove_file(local_target);
                    std::thread::sleep(Duration::from_millis(50));
                    attempts += 1;
                    continue;
                }
                return Err(e);
            }
        }
    }
}
