//! Deployment bundle construction.
//!
//! Two archive shapes share the gzip-compressed tar format:
//!
//! * the build-side bundle: one level of `prefix/filename` entries taken
//!   from a [`BundleSpec`]'s source directories, credential files stripped;
//! * the placement-side archive: a full recursive mirror of destination
//!   paths under the single [`paths::ARCHIVE_ROOT_DIR`] root, produced by
//!   [`pack_tree`] and consumed by the placement engine.
//!
//! Both writers stage to a `.partial` sibling and rename on success, so an
//! archive that exists at its final path is always complete.

use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, Header};

use crate::error::DeployError;
use crate::paths;

/// One source directory feeding the bundle.
#[derive(Debug, Clone)]
pub struct BundleSource {
    /// Directory scanned for regular files (single level, non-recursive).
    pub dir: PathBuf,
    /// Archive prefix the files land under.
    pub prefix: String,
    /// Filenames (not paths) to omit.
    pub exclude: HashSet<String>,
}

impl BundleSource {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            exclude: HashSet::new(),
        }
    }

    fn is_excluded(&self, filename: &str) -> bool {
        if self.exclude.contains(filename) {
            return true;
        }
        // Credential files never leave the control-plane host inside the
        // `files` source, regardless of what the caller configured. The
        // archive may transit less-trusted storage.
        self.prefix == paths::FILES_PREFIX
            && (filename == paths::ORCHESTRATOR_ENDPOINT_FILE
                || filename == paths::ORCHESTRATOR_TOKEN_FILE)
    }
}

/// Ordered set of sources packed into one bundle.
#[derive(Debug, Clone, Default)]
pub struct BundleSpec {
    pub sources: Vec<BundleSource>,
}

impl BundleSpec {
    /// The standard three-source layout under `base`: `scripts/`, `config/`,
    /// and `files/`.
    pub fn standard(base: &Path) -> Self {
        Self {
            sources: vec![
                BundleSource::new(base.join("scripts"), "scripts"),
                BundleSource::new(base.join("config"), "config"),
                BundleSource::new(base.join("files"), paths::FILES_PREFIX),
            ],
        }
    }

    fn validate(&self) -> Result<(), DeployError> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.prefix.as_str()) {
                return Err(DeployError::InvalidBundleSpec(format!(
                    "duplicate archive prefix `{}`",
                    source.prefix
                )));
            }
        }
        Ok(())
    }
}

/// Build the bundle described by `spec` at `staging`, overwriting any prior
/// archive there.
///
/// Missing source directories are skipped silently; a read error on any
/// file aborts the build and leaves nothing at `staging`.
pub fn build_bundle(spec: &BundleSpec, staging: &Path) -> Result<(), DeployError> {
    spec.validate()?;

    let partial = partial_path(staging);
    let file = File::create(&partial).map_err(|e| DeployError::io(&partial, e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut tar = Builder::new(encoder);

    for source in &spec.sources {
        if !source.dir.is_dir() {
            tracing::debug!(dir = %source.dir.display(), "source directory absent, skipping");
            continue;
        }
        append_source(&mut tar, source).map_err(|e| {
            let _ = fs::remove_file(&partial);
            e
        })?;
    }

    finish_archive(tar, &partial, staging)
}

/// Pack the tree rooted at `src_root` into a placement archive at `staging`.
///
/// The tree lands under [`paths::ARCHIVE_ROOT_DIR`] with its full recursive
/// structure; executable bits survive as the 0755/0644 mode distinction.
pub fn pack_tree(src_root: &Path, staging: &Path) -> Result<(), DeployError> {
    if !src_root.is_dir() {
        return Err(DeployError::io(
            src_root,
            std::io::Error::from(std::io::ErrorKind::NotFound),
        ));
    }

    let partial = partial_path(staging);
    let file = File::create(&partial).map_err(|e| DeployError::io(&partial, e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut tar = Builder::new(encoder);
    tar.mode(tar::HeaderMode::Deterministic);

    if let Err(e) = tar.append_dir_all(paths::ARCHIVE_ROOT_DIR, src_root) {
        let _ = fs::remove_file(&partial);
        return Err(DeployError::io(src_root, e));
    }

    finish_archive(tar, &partial, staging)
}

fn partial_path(staging: &Path) -> PathBuf {
    let mut name = staging.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

fn append_source(
    tar: &mut Builder<GzEncoder<File>>,
    source: &BundleSource,
) -> Result<(), DeployError> {
    let mut entries: Vec<_> = fs::read_dir(&source.dir)
        .map_err(|e| DeployError::io(&source.dir, e))?
        .collect::<Result<_, _>>()
        .map_err(|e| DeployError::io(&source.dir, e))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_type = entry
            .file_type()
            .map_err(|e| DeployError::io(entry.path(), e))?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if source.is_excluded(&name) {
            tracing::debug!(file = %name, prefix = %source.prefix, "excluded from bundle");
            continue;
        }

        let path = entry.path();
        let data = fs::read(&path).map_err(|e| DeployError::io(&path, e))?;
        let metadata = entry.metadata().map_err(|e| DeployError::io(&path, e))?;

        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(if is_executable(&metadata) { 0o755 } else { 0o644 });
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        tar.append_data(
            &mut header,
            format!("{}/{}", source.prefix, name),
            data.as_slice(),
        )
        .map_err(|e| DeployError::io(&path, e))?;
    }
    Ok(())
}

fn finish_archive(
    tar: Builder<GzEncoder<File>>,
    partial: &Path,
    staging: &Path,
) -> Result<(), DeployError> {
    let result = tar
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|e| DeployError::io(partial, e));
    if let Err(e) = result {
        let _ = fs::remove_file(partial);
        return Err(e);
    }
    fs::rename(partial, staging).map_err(|e| DeployError::io(staging, e))?;
    tracing::info!(archive = %staging.display(), "bundle written");
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn archive_entries(path: &Path) -> Vec<(String, Vec<u8>, u32)> {
        let file = File::open(path).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(file));
        let mut out = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().to_string();
            let mode = entry.header().mode().unwrap();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            out.push((name, data, mode));
        }
        out
    }

    #[test]
    fn test_standard_layout_excludes_credentials() {
        let base = tempfile::tempdir().unwrap();
        for dir in ["scripts", "config", "files"] {
            fs::create_dir(base.path().join(dir)).unwrap();
        }
        fs::write(base.path().join("scripts/foo.sh"), "#!/bin/sh\n").unwrap();
        fs::write(base.path().join("config/a.yaml"), "a: 1\n").unwrap();
        fs::write(base.path().join("files/orchestrator_token"), "secret").unwrap();
        fs::write(base.path().join("files/data.bin"), [0u8, 1, 2]).unwrap();

        let staging = base.path().join("bundle.tar.gz");
        build_bundle(&BundleSpec::standard(base.path()), &staging).unwrap();

        let names: Vec<String> = archive_entries(&staging)
            .into_iter()
            .map(|(n, _, _)| n)
            .collect();
        assert_eq!(names, vec!["scripts/foo.sh", "config/a.yaml", "files/data.bin"]);
    }

    #[test]
    fn test_credentials_excluded_even_when_not_requested() {
        let base = tempfile::tempdir().unwrap();
        let files = base.path().join("files");
        fs::create_dir(&files).unwrap();
        fs::write(files.join("orchestrator_endpoint"), "nats://o:4222").unwrap();
        fs::write(files.join("orchestrator_token"), "secret").unwrap();
        fs::write(files.join("keep.txt"), "ok").unwrap();

        // Spec with an empty exclusion set; the hard invariant still applies.
        let spec = BundleSpec {
            sources: vec![BundleSource::new(&files, "files")],
        };
        let staging = base.path().join("bundle.tar.gz");
        build_bundle(&spec, &staging).unwrap();

        let names: Vec<String> = archive_entries(&staging)
            .into_iter()
            .map(|(n, _, _)| n)
            .collect();
        assert_eq!(names, vec!["files/keep.txt"]);
    }

    #[test]
    fn test_missing_sources_yield_valid_empty_archive() {
        let base = tempfile::tempdir().unwrap();
        let staging = base.path().join("bundle.tar.gz");
        build_bundle(&BundleSpec::standard(base.path()), &staging).unwrap();

        assert!(staging.exists());
        assert!(archive_entries(&staging).is_empty());
    }

    #[test]
    fn test_single_level_only() {
        let base = tempfile::tempdir().unwrap();
        let scripts = base.path().join("scripts");
        fs::create_dir_all(scripts.join("nested")).unwrap();
        fs::write(scripts.join("top.sh"), "#!/bin/sh\n").unwrap();
        fs::write(scripts.join("nested/deep.sh"), "#!/bin/sh\n").unwrap();

        let spec = BundleSpec {
            sources: vec![BundleSource::new(&scripts, "scripts")],
        };
        let staging = base.path().join("bundle.tar.gz");
        build_bundle(&spec, &staging).unwrap();

        let names: Vec<String> = archive_entries(&staging)
            .into_iter()
            .map(|(n, _, _)| n)
            .collect();
        assert_eq!(names, vec!["scripts/top.sh"]);
    }

    #[test]
    fn test_executable_hint_preserved() {
        let base = tempfile::tempdir().unwrap();
        let scripts = base.path().join("scripts");
        fs::create_dir(&scripts).unwrap();
        let script = scripts.join("run.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }
        fs::write(scripts.join("plain.txt"), "data").unwrap();

        let spec = BundleSpec {
            sources: vec![BundleSource::new(&scripts, "scripts")],
        };
        let staging = base.path().join("bundle.tar.gz");
        build_bundle(&spec, &staging).unwrap();

        let entries = archive_entries(&staging);
        let modes: std::collections::HashMap<String, u32> =
            entries.into_iter().map(|(n, _, m)| (n, m)).collect();
        assert_eq!(modes["scripts/plain.txt"] & 0o777, 0o644);
        #[cfg(unix)]
        assert_eq!(modes["scripts/run.sh"] & 0o777, 0o755);
    }

    #[test]
    fn test_duplicate_prefix_rejected() {
        let base = tempfile::tempdir().unwrap();
        let spec = BundleSpec {
            sources: vec![
                BundleSource::new(base.path().join("a"), "same"),
                BundleSource::new(base.path().join("b"), "same"),
            ],
        };
        let err = build_bundle(&spec, &base.path().join("b.tar.gz")).unwrap_err();
        assert!(matches!(err, DeployError::InvalidBundleSpec(_)));
    }

    #[test]
    fn test_overwrites_prior_archive_and_leaves_no_partial() {
        let base = tempfile::tempdir().unwrap();
        let staging = base.path().join("bundle.tar.gz");
        fs::write(&staging, "stale garbage").unwrap();

        build_bundle(&BundleSpec::default(), &staging).unwrap();
        assert!(archive_entries(&staging).is_empty());
        assert!(!partial_path(&staging).exists());
    }

    #[test]
    fn test_pack_tree_preserves_structure() {
        let base = tempfile::tempdir().unwrap();
        let tree = base.path().join("tree");
        fs::create_dir_all(tree.join("etc/fleet")).unwrap();
        fs::write(tree.join("etc/fleet/agent.yaml"), "node: worker\n").unwrap();

        let staging = base.path().join("placement.tar.gz");
        pack_tree(&tree, &staging).unwrap();

        let names: Vec<String> = archive_entries(&staging)
            .into_iter()
            .map(|(n, _, _)| n)
            .collect();
        assert!(names.contains(&"deployment/etc/fleet/agent.yaml".to_string()));
    }

    #[test]
    fn test_pack_tree_missing_root_fails() {
        let base = tempfile::tempdir().unwrap();
        let err = pack_tree(
            &base.path().join("absent"),
            &base.path().join("out.tar.gz"),
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::Io { .. }));
    }
}
