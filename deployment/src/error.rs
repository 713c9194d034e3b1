//! Error taxonomy for the deployment pipeline.
//!
//! Every error in the library is represented here. Callers can query
//! `class()` / `is_retriable()` without string matching.
//!
//! ## Classes
//!
//! | Class        | Meaning                                         | Retry |
//! |--------------|-------------------------------------------------|-------|
//! | Precondition | missing config or input; nothing was attempted  | no    |
//! | Transient    | timeout / network / subprocess failure          | yes, re-invoke from scratch |
//! | Structural   | the input itself is wrong (corrupt, wrong shape)| no    |
//!
//! Advisory outcomes (ownership change, scratch cleanup) never appear here;
//! they are recorded on the owning report's warnings list instead.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Classification used by callers to decide whether re-invoking helps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Required configuration or input is absent; no side effect was attempted.
    Precondition,
    /// Timed out or the remote side misbehaved; safe to re-run the stage.
    Transient,
    /// The input is malformed; retrying with the same input cannot succeed.
    Structural,
}

impl ErrorClass {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition => write!(f, "precondition"),
            Self::Transient => write!(f, "transient"),
            Self::Structural => write!(f, "structural"),
        }
    }
}

/// Unified error type for bundle building, transfer, placement, and
/// node reconciliation.
#[derive(Debug, Error)]
pub enum DeployError {
    // ── Precondition ──────────────────────────────────────────────────────
    /// Required environment or configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// A bundle spec violates its own invariants (e.g. duplicate prefixes).
    #[error("invalid bundle spec: {0}")]
    InvalidBundleSpec(String),

    /// The archive expected as input does not exist.
    #[error("archive not found at {}", path.display())]
    ArchiveMissing { path: PathBuf },

    // ── Transient ─────────────────────────────────────────────────────────
    /// An operation exceeded its bounded timeout.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    /// The secure copy to the remote host failed.
    #[error("remote copy failed: {0}")]
    CopyFailed(String),

    /// A remote command over the secure channel failed.
    #[error("remote command failed: {0}")]
    RemoteCommandFailed(String),

    /// A local helper binary could not be launched at all.
    #[error("failed to launch {program}: {source}")]
    CommandSpawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// The orchestrator registry could not be reached or answered with an
    /// error status.
    #[error("registry request failed: {0}")]
    RegistryUnavailable(String),

    /// Filesystem I/O failed on a specific path.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Structural ────────────────────────────────────────────────────────
    /// The archive could not be decompressed or unpacked.
    #[error("failed to unpack archive: {0}")]
    ExtractFailed(String),

    /// The archive unpacked cleanly but does not contain the expected
    /// top-level directory. Distinct from `ExtractFailed` so callers can
    /// tell "corrupt" from "valid but wrong shape".
    #[error("archive has unexpected shape: missing top-level `{expected}` directory")]
    WrongArchiveShape { expected: &'static str },

    /// The registry answered but the body did not parse.
    #[error("malformed registry response: {0}")]
    MalformedResponse(String),

    /// A placement state transition that the state graph forbids.
    #[error("illegal placement transition: {0}")]
    State(String),
}

impl DeployError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingConfig(_) | Self::InvalidBundleSpec(_) | Self::ArchiveMissing { .. } => {
                ErrorClass::Precondition
            }
            Self::Timeout { .. }
            | Self::CopyFailed(_)
            | Self::RemoteCommandFailed(_)
            | Self::CommandSpawn { .. }
            | Self::RegistryUnavailable(_)
            | Self::Io { .. } => ErrorClass::Transient,
            Self::ExtractFailed(_)
            | Self::WrongArchiveShape { .. }
            | Self::MalformedResponse(_)
            | Self::State(_) => ErrorClass::Structural,
        }
    }

    /// Returns `true` if an external retry loop may re-invoke the stage.
    pub fn is_retriable(&self) -> bool {
        self.class().is_retriable()
    }

    /// Build an `Io` variant conveniently.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_precondition() {
        let err = DeployError::MissingConfig("FLEET_API_HOST".into());
        assert_eq!(err.class(), ErrorClass::Precondition);
        assert!(!err.is_retriable());
    }

    #[test]
    fn timeout_is_retriable() {
        let err = DeployError::Timeout {
            operation: "bundle copy",
            seconds: 60,
        };
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_retriable());
    }

    #[test]
    fn wrong_shape_is_structural_and_distinct_from_extract() {
        let shape = DeployError::WrongArchiveShape {
            expected: "deployment",
        };
        let extract = DeployError::ExtractFailed("truncated gzip stream".into());
        assert_eq!(shape.class(), ErrorClass::Structural);
        assert!(!shape.is_retriable());
        assert_ne!(shape.to_string(), extract.to_string());
    }

    #[test]
    fn io_helper_names_the_path() {
        let err = DeployError::io(
            "/tmp/deployment.tar.gz",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.to_string().contains("/tmp/deployment.tar.gz"));
        assert_eq!(err.class(), ErrorClass::Transient);
    }
}
