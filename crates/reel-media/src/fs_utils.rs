//! Filesystem helpers for render artifacts and scratch directories.

use std::path::Path;
use tokio::fs;

use crate::error::{MediaError, MediaResult};

/// Create `dir` and its parents if missing.
pub async fn ensure_dir(dir: impl AsRef<Path>) -> MediaResult<()> {
    fs::create_dir_all(dir.as_ref()).await.map_err(MediaError::from)
}

/// Create the parent directory of `path` if it has one.
pub async fn ensure_parent_dir(path: impl AsRef<Path>) -> MediaResult<()> {
    match path.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent).await,
        _ => Ok(()),
    }
}

/// Remove a scratch directory tree, logging instead of failing.
///
/// A missing directory counts as removed.
pub async fn remove_dir_logged(dir: impl AsRef<Path>) -> bool {
    let dir = dir.as_ref();
    match fs::remove_dir_all(dir).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("Failed to remove scratch directory {}: {}", dir.display(), e);
            false
        }
    }
}

/// Remove a file, logging instead of failing.
///
/// A missing file counts as removed.
pub async fn remove_file_logged(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// Tries a rename first and falls back to copy-and-delete on EXDEV. The copy
/// lands in a sibling temp file which is then renamed over `dst`.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    ensure_parent_dir(dst).await?;

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename, copying instead: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// EXDEV is 18 on Linux and macOS.
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(18)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = dst.with_extension("partial");

    if let Err(e) = fs::copy(src, &tmp_dst).await {
        remove_file_logged(&tmp_dst).await;
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        remove_file_logged(&tmp_dst).await;
        tracing::error!("Failed to finalize {}: {}", dst.display(), e);
        return Err(e.into());
    }

    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!("Failed to remove {} after copy: {}", src.display(), e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_to_new_subdirectory() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("step-0.mp4");
        let dst = dir.path().join("output").join("job.mp4");

        fs::write(&src, b"frames").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_move_file_overwrites_destination() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("new.mp4");
        let dst = dir.path().join("old.mp4");

        fs::write(&src, b"new").await.unwrap();
        fs::write(&dst, b"old").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert_eq!(fs::read(&dst).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_remove_dir_logged() {
        let dir = TempDir::new().unwrap();
        let work = dir.path().join("job-1");
        fs::create_dir_all(work.join("nested")).await.unwrap();
        fs::write(work.join("nested/step-0.mp4"), b"x").await.unwrap();

        assert!(remove_dir_logged(&work).await);
        assert!(!work.exists());
        assert!(remove_dir_logged(&work).await);
    }

    #[tokio::test]
    async fn test_remove_file_logged() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("job.mp4");
        fs::write(&file, b"partial").await.unwrap();

        assert!(remove_file_logged(&file).await);
        assert!(!file.exists());
        // Already gone
        assert!(remove_file_logged(&file).await);

        // A directory cannot be unlinked as a file; the failure is reported
        let blocked = dir.path().join("blocked.mp4");
        fs::create_dir_all(&blocked).await.unwrap();
        assert!(!remove_file_logged(&blocked).await);
        assert!(blocked.exists());
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
