//! Fixed well-known paths shared with the remote bootstrap watcher.
//!
//! The transfer client and the placement engine never talk to the bootstrap
//! process directly; the whole protocol is file presence at these paths.
//! Changing any of them is a breaking change for already-imaged hosts.

/// Where the archive builder stages the bundle on the control-plane host.
pub const LOCAL_STAGING_PATH: &str = "/tmp/deployment.tar.gz";

/// Where the transfer client drops the bundle on the target host.
pub const REMOTE_ARCHIVE_PATH: &str = "/tmp/deployment.tar.gz";

/// Empty file created after the copy succeeds. The bootstrap watcher must
/// treat "archive present, marker absent" as not-yet-ready, never as corrupt.
pub const TRANSFER_MARKER_PATH: &str = "/tmp/deployment_complete";

/// Written by the external bootstrap once its setup step finishes. Not
/// consumed by this crate; listed because it belongs to the same protocol.
pub const SETUP_MARKER_PATH: &str = "/tmp/setup_complete";

/// Placement activity log on the target host.
pub const PLACEMENT_LOG_PATH: &str = "/var/log/deployment.log";

/// Scratch area the placement engine extracts into.
pub const SCRATCH_DIR: &str = "/tmp/deployment_scratch";

/// The single top-level directory the placement archive must contain.
pub const ARCHIVE_ROOT_DIR: &str = "deployment";

/// Unprivileged user/group placed files are handed to (advisory).
pub const DEPLOY_USER: &str = "fleet";
pub const DEPLOY_GROUP: &str = "fleet";

/// Bundle source prefix whose credential files are always stripped.
pub const FILES_PREFIX: &str = "files";

/// Credential filenames that must never leave the control-plane host inside
/// a bundle, regardless of what the caller asked for.
pub const ORCHESTRATOR_ENDPOINT_FILE: &str = "orchestrator_endpoint";
pub const ORCHESTRATOR_TOKEN_FILE: &str = "orchestrator_token";
