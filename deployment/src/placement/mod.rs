//! Remote placement engine.
//!
//! Runs on the target host after the transfer marker appears (the external
//! bootstrap watcher does the polling; this engine makes exactly one
//! attempt per invocation). It extracts the placement archive into a
//! scratch directory, walks the tree under the well-known root, and copies
//! every regular file to its absolute destination with corrected
//! permissions and ownership. Placing always overwrites, so re-running the
//! engine on the same archive converges to the same filesystem state.

pub mod state;

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::read::GzDecoder;
use ignore::WalkBuilder;

use crate::error::DeployError;
use crate::paths;
use state::{IllegalTransition, PlacementState, StateMachine, TransitionRecord};

/// Filesystem locations and ownership for one placement run.
///
/// Defaults are the fixed well-known paths from [`paths`]; tests point
/// everything at temporary directories instead.
#[derive(Debug, Clone)]
pub struct PlacementConfig {
    /// Where the transferred archive is expected.
    pub archive_path: PathBuf,
    /// Private scratch area the archive is extracted into.
    pub scratch_dir: PathBuf,
    /// Root the relative paths are resolved against (normally `/`).
    pub target_root: PathBuf,
    /// Unprivileged owner placed files are handed to (advisory).
    pub deploy_user: String,
    pub deploy_group: String,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            archive_path: PathBuf::from(paths::REMOTE_ARCHIVE_PATH),
            scratch_dir: PathBuf::from(paths::SCRATCH_DIR),
            target_root: PathBuf::from("/"),
            deploy_user: paths::DEPLOY_USER.to_string(),
            deploy_group: paths::DEPLOY_GROUP.to_string(),
        }
    }
}

/// Outcome of a successful placement run.
#[derive(Debug)]
pub struct PlacementReport {
    /// Number of regular files copied to their targets.
    pub placed: usize,
    /// Advisory failures (ownership change, scratch cleanup); never fatal.
    pub warnings: Vec<String>,
    /// Full transition log for the run.
    pub transitions: Vec<TransitionRecord>,
    /// One-line state history.
    pub summary: String,
}

/// Single-shot placement engine.
pub struct PlacementEngine {
    config: PlacementConfig,
}

impl PlacementEngine {
    pub fn new(config: PlacementConfig) -> Self {
        Self { config }
    }

    /// Engine bound to the fixed well-known paths.
    pub fn with_defaults() -> Self {
        Self::new(PlacementConfig::default())
    }

    /// Run the full placement pipeline once.
    pub fn run(&self) -> Result<PlacementReport, DeployError> {
        let mut machine = StateMachine::new();
        let mut warnings = Vec::new();

        match self.run_stages(&mut machine, &mut warnings) {
            Ok(placed) => {
                let summary = machine.summary();
                tracing::info!(placed, warnings = warnings.len(), %summary, "placement done");
                Ok(PlacementReport {
                    placed,
                    warnings,
                    transitions: machine.transitions().to_vec(),
                    summary,
                })
            }
            Err(err) => {
                if !machine.is_terminal() {
                    let _ = machine.fail(&err.to_string());
                }
                tracing::error!(
                    stage = %machine.current(),
                    class = %err.class(),
                    error = %err,
                    "placement failed"
                );
                Err(err)
            }
        }
    }

    fn run_stages(
        &self,
        machine: &mut StateMachine,
        warnings: &mut Vec<String>,
    ) -> Result<usize, DeployError> {
        // The bootstrap watcher polls for the archive; by the time this runs
        // absence means the transfer never completed.
        if !self.config.archive_path.is_file() {
            return Err(DeployError::ArchiveMissing {
                path: self.config.archive_path.clone(),
            });
        }

        machine
            .advance(PlacementState::Extracting, Some("archive found"))
            .map_err(state_err)?;
        self.extract()?;

        let root = self.config.scratch_dir.join(paths::ARCHIVE_ROOT_DIR);
        if !root.is_dir() {
            return Err(DeployError::WrongArchiveShape {
                expected: paths::ARCHIVE_ROOT_DIR,
            });
        }

        machine
            .advance(PlacementState::Placing, None)
            .map_err(state_err)?;
        let placed = self.place(&root, warnings)?;

        machine
            .advance(
                PlacementState::CleaningUp,
                Some(&format!("{placed} files placed")),
            )
            .map_err(state_err)?;
        self.clean_up(warnings)?;

        machine
            .advance(PlacementState::Done, None)
            .map_err(state_err)?;
        Ok(placed)
    }

    fn extract(&self) -> Result<(), DeployError> {
        let scratch = &self.config.scratch_dir;
        if scratch.exists() {
            fs::remove_dir_all(scratch).map_err(|e| DeployError::io(scratch, e))?;
        }
        fs::create_dir_all(scratch).map_err(|e| DeployError::io(scratch, e))?;

        let file = File::open(&self.config.archive_path)
            .map_err(|e| DeployError::io(&self.config.archive_path, e))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        archive.set_preserve_permissions(true);
        archive
            .unpack(scratch)
            .map_err(|e| DeployError::ExtractFailed(e.to_string()))?;
        Ok(())
    }

    fn place(&self, root: &Path, warnings: &mut Vec<String>) -> Result<usize, DeployError> {
        let mut files = Vec::new();
        // Placement must see every file; no gitignore/hidden filtering.
        let walker = WalkBuilder::new(root).standard_filters(false).build();
        for entry in walker {
            let entry = entry.map_err(|e| DeployError::io(root, std::io::Error::other(e)))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push(entry.into_path());
            }
        }
        files.sort();

        let mut placed = 0;
        for path in files {
            let relative = path.strip_prefix(root).map_err(|_| {
                DeployError::ExtractFailed(format!(
                    "entry {} escaped the extraction root",
                    path.display()
                ))
            })?;
            let target = self.config.target_root.join(relative);

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| DeployError::io(parent, e))?;
            }
            fs::copy(&path, &target).map_err(|e| DeployError::io(&target, e))?;

            if is_script(&target) {
                set_executable(&target)?;
            }
            self.chown_advisory(&target, warnings);

            tracing::debug!(target = %target.display(), "placed");
            placed += 1;
        }
        Ok(placed)
    }

    /// Hand the placed file to the deployment user. The user may not exist
    /// yet and the process may lack privilege, so failure is recorded as a
    /// warning, never an error.
    fn chown_advisory(&self, target: &Path, warnings: &mut Vec<String>) {
        let owner = format!("{}:{}", self.config.deploy_user, self.config.deploy_group);
        let result = Command::new("chown").arg(&owner).arg(target).output();
        let failure = match result {
            Ok(output) if output.status.success() => return,
            Ok(output) => String::from_utf8_lossy(&output.stderr).trim().to_string(),
            Err(e) => e.to_string(),
        };
        let message = format!("chown {owner} {} failed: {failure}", target.display());
        tracing::warn!("{message}");
        warnings.push(message);
    }

    fn clean_up(&self, warnings: &mut Vec<String>) -> Result<(), DeployError> {
        if let Err(e) = fs::remove_dir_all(&self.config.scratch_dir) {
            let message = format!(
                "failed to remove scratch {}: {e}",
                self.config.scratch_dir.display()
            );
            tracing::warn!("{message}");
            warnings.push(message);
        }

        // A leftover archive would be reprocessed on the next boot, so this
        // removal failing is fatal, unlike the scratch cleanup above.
        fs::remove_file(&self.config.archive_path)
            .map_err(|e| DeployError::io(&self.config.archive_path, e))
    }
}

fn state_err(err: IllegalTransition) -> DeployError {
    DeployError::State(err.to_string())
}

/// Executable-script extensions that get their mode forced to 0755.
fn is_script(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("py") | Some("sh")
    )
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<(), DeployError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|e| DeployError::io(path, e))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<(), DeployError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn config_in(dir: &Path) -> PlacementConfig {
        PlacementConfig {
            archive_path: dir.join("deployment.tar.gz"),
            scratch_dir: dir.join("scratch"),
            target_root: dir.join("root"),
            ..PlacementConfig::default()
        }
    }

    /// Write a placement archive whose top-level directory is `root_name`.
    fn write_archive(archive_path: &Path, root_name: &str, tree: &Path) {
        let file = File::create(archive_path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut tar = tar::Builder::new(encoder);
        tar.append_dir_all(root_name, tree).unwrap();
        tar.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_missing_archive_is_precondition() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PlacementEngine::new(config_in(dir.path()));
        let err = engine.run().unwrap_err();
        assert!(matches!(err, DeployError::ArchiveMissing { .. }));
        assert_eq!(err.class(), crate::error::ErrorClass::Precondition);
    }

    #[test]
    fn test_corrupt_archive_is_extract_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(&config.archive_path, b"this is not gzip").unwrap();

        let engine = PlacementEngine::new(config);
        let err = engine.run().unwrap_err();
        assert!(matches!(err, DeployError::ExtractFailed(_)));
    }

    #[test]
    fn test_wrong_root_name_is_shape_error_and_places_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("etc")).unwrap();
        fs::write(tree.join("etc/agent.yaml"), "node: worker\n").unwrap();
        write_archive(&config.archive_path, "unexpected_name", &tree);

        let engine = PlacementEngine::new(config.clone());
        let err = engine.run().unwrap_err();
        assert!(matches!(
            err,
            DeployError::WrongArchiveShape {
                expected: paths::ARCHIVE_ROOT_DIR
            }
        ));
        // Nothing was placed under the target root.
        assert!(!config.target_root.exists());
    }

    #[test]
    fn test_successful_run_removes_archive_and_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let tree = dir.path().join("tree");
        fs::create_dir_all(tree.join("opt/fleet")).unwrap();
        fs::write(tree.join("opt/fleet/agent.yaml"), "node: worker\n").unwrap();
        write_archive(&config.archive_path, paths::ARCHIVE_ROOT_DIR, &tree);

        let engine = PlacementEngine::new(config.clone());
        let report = engine.run().unwrap();

        assert_eq!(report.placed, 1);
        assert!(config.target_root.join("opt/fleet/agent.yaml").is_file());
        assert!(!config.archive_path.exists());
        assert!(!config.scratch_dir.exists());
        assert!(report.summary.contains("Done"));
    }

    #[test]
    fn test_script_extensions_detected() {
        assert!(is_script(Path::new("/opt/fleet/start.sh")));
        assert!(is_script(Path::new("/opt/fleet/agent.py")));
        assert!(!is_script(Path::new("/opt/fleet/agent.yaml")));
        assert!(!is_script(Path::new("/opt/fleet/README")));
    }
}
