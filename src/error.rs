use std::path::Path;

/// Structured errors raised while resolving file specs and executing transfers.
///
/// A symlink cycle is never represented here: the walker prunes it silently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Malformed include/exclude pattern (invalid regex after conversion).
    Pattern { pattern: String, message: String },
    /// `{N}` in a target template refers past the available capture groups.
    Placeholder { template: String, index: usize, available: usize },
    BuildNotFound { name: String, number: String },
    Filesystem { path: String, message: String },
    /// An explicitly named symlink whose destination does not exist.
    BrokenSymlink(String),
    ChecksumMismatch { path: String, expected: String, actual: String },
    Transport(String),
    NotFound(String),
    /// Authentication/authorization rejected; aborts the whole command.
    FatalAuth(String),
    InvalidSpec(String),
    Unsupported(String),
    /// A worker panicked while running the operation.
    Internal(String),
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use TransferError::*;
        match self {
            Pattern { pattern, message } => write!(f, "invalid pattern '{}': {}", pattern, message),
            Placeholder { template, index, available } => write!(
                f,
                "placeholder {{{}}} in '{}' has no matching capture group ({} available)",
                index, template, available
            ),
            BuildNotFound { name, number } => write!(f, "build not found: {}/{}", name, number),
            Filesystem { path, message } => write!(f, "filesystem error at {}: {}", path, message),
            BrokenSymlink(p) => write!(f, "broken symlink: {}", p),
            ChecksumMismatch { path, expected, actual } => write!(
                f,
                "checksum mismatch for {} (expected {}, got {})",
                path, expected, actual
            ),
            Transport(msg) => write!(f, "transport error: {}", msg),
            NotFound(p) => write!(f, "not found: {}", p),
            FatalAuth(msg) => write!(f, "authentication failed: {}", msg),
            InvalidSpec(msg) => write!(f, "invalid file spec: {}", msg),
            Unsupported(msg) => write!(f, "unsupported: {}", msg),
            Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for TransferError {}

impl TransferError {
    pub fn filesystem(path: &Path, err: impl std::fmt::Display) -> Self {
        TransferError::Filesystem {
            path: crate::transfer::display_path(path).to_string(),
            message: err.to_string(),
        }
    }

    /// Errors that stop dispatching the remaining operations of a command.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransferError::FatalAuth(_))
    }

    /// Whether a single operation should be attempted again after this error.
    /// Only transport hiccups qualify; a checksum mismatch means the payload
    /// itself is wrong and is reported as-is.
    pub fn is_retriable(&self) -> bool {
        matches!(self, TransferError::Transport(_))
    }

    pub fn variant_name(&self) -> &'static str {
        use TransferError::*;
        match self {
            Pattern { .. } => "Pattern",
            Placeholder { .. } => "Placeholder",
            BuildNotFound { .. } => "BuildNotFound",
            Filesystem { .. } => "Filesystem",
            BrokenSymlink(_) => "BrokenSymlink",
            ChecksumMismatch { .. } => "ChecksumMismatch",
            Transport(_) => "Transport",
            NotFound(_) => "NotFound",
            FatalAuth(_) => "FatalAuth",
            InvalidSpec(_) => "InvalidSpec",
            Unsupported(_) => "Unsupported",
            Internal(_) => "Internal",
        }
    }

    /// Structured form used for the failures JSONL file.
    pub fn to_json(&self) -> serde_json::Value {
        use TransferError::*;
        let mut obj = match self {
            Pattern { pattern, .. } => serde_json::json!({ "pattern": pattern }),
            Placeholder { template, index, available } => {
                serde_json::json!({ "template": template, "index": index, "available": available })
            }
            BuildNotFound { name, number } => serde_json::json!({ "build": name, "number": number }),
            Filesystem { path, .. } | ChecksumMismatch { path, .. } => {
                serde_json::json!({ "path": path })
            }
            BrokenSymlink(p) | NotFound(p) => serde_json::json!({ "path": p }),
            Transport(_) | FatalAuth(_) | InvalidSpec(_) | Unsupported(_) | Internal(_) => {
                serde_json::json!({})
            }
        };
        obj["variant"] = serde_json::Value::from(self.variant_name());
        obj["message"] = serde_json::Value::from(self.to_string());
        obj
    }
}

impl From<rusqlite::Error> for TransferError {
    fn from(e: rusqlite::Error) -> Self {
        TransferError::Transport(format!("index database: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_is_fatal() {
        assert!(TransferError::FatalAuth("401".into()).is_fatal());
        assert!(!TransferError::Transport("reset".into()).is_fatal());
        assert!(!TransferError::NotFound("x".into()).is_fatal());
    }

    #[test]
    fn only_transport_is_retriable() {
        assert!(TransferError::Transport("timeout".into()).is_retriable());
        let mismatch = TransferError::ChecksumMismatch {
            path: "a".into(),
            expected: "1".into(),
            actual: "2".into(),
        };
        assert!(!mismatch.is_retriable());
        assert!(!TransferError::FatalAuth("403".into()).is_retriable());
    }

    #[test]
    fn placeholder_message_names_index() {
        let e = TransferError::Placeholder { template: "r/{3}/".into(), index: 3, available: 1 };
        let s = e.to_string();
        assert!(s.contains("{3}"), "{}", s);
        assert!(s.contains("1 available"), "{}", s);
    }

    #[test]
    fn json_carries_variant_and_path() {
        let e = TransferError::Filesystem { path: "out/a.bin".into(), message: "denied".into() };
        let v = e.to_json();
        assert_eq!(v["variant"], "Filesystem");
        assert_eq!(v["path"], "out/a.bin");
        assert!(v["message"].as_str().unwrap().contains("denied"));
    }
}
