//! File system utils.

use std::path::Path;

use anyhow::Context;

pub struct FsHandler;

impl FsHandler {
    /// Create `path` and all of its parents if they don't exist.
    pub fn create_directory(path: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Created directory");
        Ok(())
    }

    /// Write `content` to `path` through a temporary sibling file, so readers never observe a
    /// half-written file. Parent directories are created as needed.
    pub fn write_file(path: &Path, content: impl AsRef<[u8]>) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Self::create_directory(parent)?;
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");

        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", Path::new(&tmp).display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move file into place at {}", path.display()))?;

        Ok(())
    }
}
