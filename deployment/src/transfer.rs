//! Bundle transfer to a target host.
//!
//! Two sequential remote operations, both required: copy the archive to the
//! fixed remote staging path, then create the completion marker. The marker
//! decouples "bytes arrived" from "bytes are usable": the bootstrap watcher
//! on the host only acts once the marker exists, so a partially uploaded
//! bundle is never consumed.

use std::path::Path;
use std::time::Duration;

use crate::error::DeployError;
use crate::executor::{RemoteExecutor, SshTarget, SubprocessExecutor};
use crate::paths;

/// Seconds allowed for the whole archive copy.
pub const COPY_TIMEOUT_SECS: u64 = 60;
/// Seconds allowed for the marker command.
pub const MARKER_TIMEOUT_SECS: u64 = 30;

/// What has been established on the remote host so far.
///
/// Flags are only ever set, never reset; a failed transfer is restarted
/// wholesale rather than resumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferState {
    /// The archive bytes arrived at [`paths::REMOTE_ARCHIVE_PATH`].
    pub bundle_present: bool,
    /// The marker exists at [`paths::TRANSFER_MARKER_PATH`].
    pub marker_present: bool,
}

/// Receives human-readable progress messages. Absence of an observer must
/// not change transfer behavior.
pub trait TransferObserver: Send + Sync {
    fn on_event(&self, message: &str);
}

/// Default observer routing messages through `tracing`.
pub struct LogObserver;

impl TransferObserver for LogObserver {
    fn on_event(&self, message: &str) {
        tracing::info!("{message}");
    }
}

/// Copies a built bundle onto a target host and signals completion.
pub struct TransferClient<E> {
    executor: E,
    observer: Option<Box<dyn TransferObserver>>,
}

impl TransferClient<SubprocessExecutor> {
    /// Client backed by the real scp/ssh binaries.
    pub fn new() -> Self {
        Self::with_executor(SubprocessExecutor)
    }
}

impl Default for TransferClient<SubprocessExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: RemoteExecutor> TransferClient<E> {
    pub fn with_executor(executor: E) -> Self {
        Self {
            executor,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn TransferObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn report(&self, message: String) {
        if let Some(observer) = &self.observer {
            observer.on_event(&message);
        }
    }

    /// Push `local_archive` to `target` and create the completion marker.
    ///
    /// The marker step only runs if the copy succeeded; if the marker step
    /// fails the transfer is failed even though the bytes are present, and
    /// the watcher must treat the host as not-yet-ready. Timeouts are
    /// failures — the caller re-invokes `transfer` to retry.
    pub async fn transfer(
        &self,
        target: &SshTarget,
        local_archive: &Path,
    ) -> Result<TransferState, DeployError> {
        if !local_archive.is_file() {
            return Err(DeployError::ArchiveMissing {
                path: local_archive.to_path_buf(),
            });
        }

        let mut state = TransferState::default();

        match self
            .executor
            .copy_to_remote(
                target,
                local_archive,
                paths::REMOTE_ARCHIVE_PATH,
                Duration::from_secs(COPY_TIMEOUT_SECS),
            )
            .await
        {
            Ok(()) => {
                state.bundle_present = true;
                self.report(format!(
                    "bundle copied to {}:{}",
                    target.destination(),
                    paths::REMOTE_ARCHIVE_PATH
                ));
            }
            Err(e) => {
                self.report(format!("bundle copy to {} failed: {e}", target.destination()));
                return Err(e);
            }
        }

        // Creating the marker twice is harmless, so a failed marker step can
        // be recovered by re-running the whole transfer.
        let marker_cmd = format!("touch {}", paths::TRANSFER_MARKER_PATH);
        match self
            .executor
            .run_remote(
                target,
                &marker_cmd,
                Duration::from_secs(MARKER_TIMEOUT_SECS),
            )
            .await
        {
            Ok(_) => {
                state.marker_present = true;
                self.report(format!(
                    "transfer marker created on {}",
                    target.destination()
                ));
                Ok(state)
            }
            Err(e) => {
                self.report(format!(
                    "marker creation on {} failed (bundle present, host not yet ready): {e}",
                    target.destination()
                ));
                Err(e)
            }
        }
    }
}
