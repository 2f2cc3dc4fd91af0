// Workspace Management
// Per-pipeline working directories under the workspace root

use crate::store::PipelineId;

use std::io;
use std::path::{Path, PathBuf};

/// Directory a pipeline run executes in
pub fn pipeline_dir(root: &Path, pipeline_id: PipelineId) -> PathBuf {
    root.join(format!("pipeline-{}", pipeline_id))
}

/// Directory a fetch lands in before it is handed to a run
pub fn setup_dir(root: &Path, label: &str) -> PathBuf {
    root.join(format!("pipeline-{}-setup", label))
}

/// Move `from` to `to`, replacing anything already at `to`
pub async fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    remove(to).await?;
    tokio::fs::rename(from, to).await
}

/// Recursively copy `from` into a fresh `to`
pub async fn duplicate(from: &Path, to: &Path) -> io::Result<()> {
    remove(to).await?;
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    tokio::task::spawn_blocking(move || copy_tree(&from, &to))
        .await
        .map_err(io::Error::other)?
}

/// Remove a directory tree; absence is not an error
pub async fn remove(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else if file_type.is_symlink() {
            copy_symlink(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    let link = std::fs::read_link(from)?;
    std::os::unix::fs::symlink(link, to)
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> io::Result<()> {
    std::fs::copy(from, to).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_names() {
        let root = Path::new("/srv/kiln");
        assert_eq!(pipeline_dir(root, 12), PathBuf::from("/srv/kiln/pipeline-12"));
        assert_eq!(
            setup_dir(root, "abc"),
            PathBuf::from("/srv/kiln/pipeline-abc-setup")
        );
    }

    #[tokio::test]
    async fn test_duplicate_copies_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        std::fs::create_dir_all(src.join(".kiln")).unwrap();
        std::fs::write(src.join(".kiln/ci.yml"), "jobs: {}").unwrap();
        std::fs::write(src.join("README"), "hi").unwrap();

        let dest = dir.path().join("copy");
        duplicate(&src, &dest).await.unwrap();

        assert_eq!(std::fs::read_to_string(dest.join(".kiln/ci.yml")).unwrap(), "jobs: {}");
        assert_eq!(std::fs::read_to_string(dest.join("README")).unwrap(), "hi");
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_relocate_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dest = dir.path().join("dest");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(src.join("a"), "new").unwrap();
        std::fs::write(dest.join("stale"), "old").unwrap();

        relocate(&src, &dest).await.unwrap();

        assert!(!src.exists());
        assert!(dest.join("a").exists());
        assert!(!dest.join("stale").exists());
    }

    #[tokio::test]
    async fn test_remove_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        remove(&dir.path().join("nope")).await.unwrap();
    }
}
