use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{debug, error, info};

use crate::error_handling::types::PipelineError;

/// Object storage holding source images and published annotated images.
pub trait ImageStore: Send + Sync {
    /// Copies the object `key` to the local file `destination`.
    fn download(&self, key: &str, destination: &Path) -> Result<(), PipelineError>;

    /// Publishes the local file `source` under `key`.
    fn upload(&self, source: &Path, key: &str) -> Result<(), PipelineError>;
}

/// Rejects keys that would escape the store root.
pub fn relative_key(key: &str) -> Result<&Path, PipelineError> {
    let path = Path::new(key);
    let safe = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(path)
    } else {
        Err(PipelineError::InvalidImageKey(key.to_string()))
    }
}

fn transfer_error(context: &str, path: &Path, e: std::io::Error) -> PipelineError {
    error!("{} {}: {}", context, path.display(), e);
    PipelineError::ImageTransfer(format!("{} {}: {}", context, path.display(), e))
}

/// Object storage emulated by a local directory tree, keys being relative paths.
pub struct LocalImageStore {
    root: PathBuf,
}

impl LocalImageStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, PipelineError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| transfer_error("Failed to create", &root, e))?;
        info!("LocalImageStore initialized at {}", root.display());
        Ok(Self { root })
    }

    pub fn object_path(&self, key: &str) -> Result<PathBuf, PipelineError> {
        Ok(self.root.join(relative_key(key)?))
    }
}

impl ImageStore for LocalImageStore {
    fn download(&self, key: &str, destination: &Path) -> Result<(), PipelineError> {
        let source = self.object_path(key)?;
        if !source.is_file() {
            return Err(PipelineError::ImageTransfer(format!("no object {}", key)));
        }
        fs::copy(&source, destination).map_err(|e| transfer_error("Failed to copy", &source, e))?;
        debug!("Downloaded {} to {}", key, destination.display());
        Ok(())
    }

    fn upload(&self, source: &Path, key: &str) -> Result<(), PipelineError> {
        let target = self.object_path(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| transfer_error("Failed to create", parent, e))?;
        }
        fs::copy(source, &target).map_err(|e| transfer_error("Failed to copy", source, e))?;
        debug!("Uploaded {} as {}", source.display(), key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_relative_key() {
        assert!(relative_key("photos/cat.jpg").is_ok());
        assert!(relative_key("../etc/passwd").is_err());
        assert!(relative_key("/etc/passwd").is_err());
        assert!(relative_key("").is_err());
    }

    #[test]
    fn test_download_and_upload() {
        let dir = TempDir::new().unwrap();
        let store = LocalImageStore::new(dir.path().join("bucket")).unwrap();
        let incoming = store.object_path("in/cat.jpg").unwrap();
        fs::create_dir_all(incoming.parent().unwrap()).unwrap();
        fs::write(&incoming, b"pixels").unwrap();

        let local = dir.path().join("local.jpg");
        store.download("in/cat.jpg", &local).unwrap();
        assert_eq!(fs::read(&local).unwrap(), b"pixels");

        store.upload(&local, "out/deep/cat.jpg").unwrap();
        assert!(store.object_path("out/deep/cat.jpg").unwrap().is_file());
    }

    #[test]
    fn test_download_missing_object() {
        let dir = TempDir::new().unwrap();
        let store = LocalImageStore::new(dir.path()).unwrap();
        assert!(matches!(
            store.download("nope.jpg", &dir.path().join("x.jpg")),
            Err(PipelineError::ImageTransfer(_))
        ));
    }
}
