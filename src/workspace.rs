//! Host workspace plumbing
//!
//! One base temp root holds every container workspace; each container gets a
//! deterministic subdirectory named after it, bound at `/workspace` inside
//! the container. This module also owns baseline/diff enumeration,
//! keep-generated pruning, and the base64 file helpers.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::{Error, Result};

static BASE_DIR: Lazy<PathBuf> = Lazy::new(|| std::env::temp_dir().join("runbox"));

/// Base temp root for all workspaces, created on first use
pub fn base_dir() -> Result<&'static Path> {
    fs::create_dir_all(&*BASE_DIR)?;
    Ok(BASE_DIR.as_path())
}

/// Deterministic workspace directory for a container name
pub fn dir_for(container_name: &str) -> Result<PathBuf> {
    Ok(base_dir()?.join(container_name))
}

/// Create and return the workspace directory for a container name
pub fn create_for(container_name: &str) -> Result<PathBuf> {
    let dir = dir_for(container_name)?;
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Fresh scratch directory under the base root (zip extraction targets)
pub fn scratch_dir(label: &str) -> Result<PathBuf> {
    let dir = base_dir()?.join(format!("scratch-{}-{}", label, uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Extract a zip archive into `dest`
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    zip.extract(dest)?;
    Ok(())
}

/// Every file path currently under `dir` (absolute); empty when `dir` is missing
pub fn collect_files(dir: &Path) -> Result<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.insert(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

/// Files present now but not in the baseline, restricted to paths under `root`
pub fn generated_since(
    current: &HashSet<PathBuf>,
    baseline: &HashSet<PathBuf>,
    root: &Path,
) -> HashSet<PathBuf> {
    current
        .iter()
        .filter(|p| !baseline.contains(*p) && p.starts_with(root))
        .cloned()
        .collect()
}

/// Delete every file under `root` not in `keep`, then drop empty directories
/// bottom-up, keeping the root itself
pub fn prune_except(root: &Path, keep: &HashSet<PathBuf>) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() {
            if !keep.contains(path) {
                if let Err(e) = fs::remove_file(path) {
                    warn!("Failed to prune {}: {}", path.display(), e);
                }
            }
        } else if entry.file_type().is_dir() && path != root {
            // Only removes directories left empty by the file pass
            let _ = fs::remove_dir(path);
        }
    }
    Ok(())
}

/// Remove a workspace directory entirely
pub fn remove_dir(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir) {
        if dir.exists() {
            warn!("Failed to remove workspace {}: {}", dir.display(), e);
        }
    }
}

/// Resolve a relative path inside `root`, rejecting traversal outside it
pub fn resolve_relative(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    if rel_path.is_absolute() {
        return Err(Error::Workspace(format!(
            "path {} must be relative to the workspace",
            rel
        )));
    }
    for component in rel_path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(Error::Workspace(format!(
                    "path {} escapes the workspace",
                    rel
                )))
            }
        }
    }
    Ok(root.join(rel_path))
}

/// Write base64-encoded content to a relative path inside the workspace
pub fn add_file_from_base64(root: &Path, rel: &str, b64: &str) -> Result<PathBuf> {
    let bytes = BASE64.decode(b64)?;
    let path = resolve_relative(root, rel)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, bytes)?;
    Ok(path)
}

/// Copy a local file to a relative destination inside the workspace
pub fn copy_into(root: &Path, local: &Path, dest_rel: &str) -> Result<PathBuf> {
    if !local.is_file() {
        return Err(Error::NotFound(format!(
            "local file {} does not exist",
            local.display()
        )));
    }
    let dest = resolve_relative(root, dest_rel)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(local, &dest)?;
    Ok(dest)
}

/// Read a workspace file as raw bytes
pub fn read_file_binary(root: &Path, rel: &str) -> Result<Vec<u8>> {
    let path = resolve_relative(root, rel)?;
    if !path.is_file() {
        return Err(Error::NotFound(format!(
            "workspace file {} does not exist",
            rel
        )));
    }
    Ok(fs::read(path)?)
}

/// Read a workspace file base64-encoded
pub fn read_file_base64(root: &Path, rel: &str) -> Result<String> {
    Ok(BASE64.encode(read_file_binary(root, rel)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_collect_and_diff() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("a.txt"), "a").unwrap();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/b.txt"), "b").unwrap();

        let baseline = collect_files(root).unwrap();
        assert_eq!(baseline.len(), 2);

        fs::write(root.join("sub/c.txt"), "c").unwrap();
        let current = collect_files(root).unwrap();
        let generated = generated_since(&current, &baseline, root);
        assert_eq!(generated.len(), 1);
        assert!(generated.contains(&root.join("sub/c.txt")));
    }

    #[test]
    fn test_collect_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(collect_files(&missing).unwrap().is_empty());
    }

    #[test]
    fn test_prune_keeps_generated() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("out")).unwrap();
        fs::create_dir_all(root.join("tmp")).unwrap();
        fs::write(root.join("code.py"), "print(1)").unwrap();
        fs::write(root.join("out/report.txt"), "kept").unwrap();
        fs::write(root.join("tmp/junk.bin"), "junk").unwrap();

        let keep: HashSet<PathBuf> = [root.join("out/report.txt")].into_iter().collect();
        prune_except(root, &keep).unwrap();

        assert!(root.join("out/report.txt").is_file());
        assert!(!root.join("code.py").exists());
        assert!(!root.join("tmp").exists());
        assert!(root.exists());
    }

    #[test]
    fn test_base64_round_trip() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let payload = BASE64.encode(b"hello runbox");

        add_file_from_base64(root, "data/input.bin", &payload).unwrap();
        let back = read_file_base64(root, "data/input.bin").unwrap();
        assert_eq!(back, payload);
        assert_eq!(read_file_binary(root, "data/input.bin").unwrap(), b"hello runbox");
    }

    #[test]
    fn test_traversal_rejected() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        assert!(resolve_relative(root, "../escape.txt").is_err());
        assert!(resolve_relative(root, "/etc/passwd").is_err());
        assert!(resolve_relative(root, "ok/nested.txt").is_ok());
    }

    #[test]
    fn test_copy_into() {
        let dir = tempdir().unwrap();
        let src_dir = tempdir().unwrap();
        let local = src_dir.path().join("seed.txt");
        fs::write(&local, "seeded").unwrap();

        let dest = copy_into(dir.path(), &local, "seed.txt").unwrap();
        assert_eq!(fs::read_to_string(dest).unwrap(), "seeded");
        assert!(copy_into(dir.path(), Path::new("/no/such/file"), "x").is_err());
    }
}
