//! Filesystem access for the module loader.
//!
//! The loader only ever needs three operations: whole-file reads,
//! existence probes for resolution, and `realpath` for symlink
//! normalization. Everything is suspending; no handle is held across a
//! suspension point.

use std::io;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read the whole file at `path`.
    async fn read(&self, path: &str) -> io::Result<Vec<u8>>;

    /// Whether a file exists at `path` (following symlinks).
    async fn exists(&self, path: &str) -> bool;

    /// Resolve symlinks in `path` to the canonical id.
    async fn canonicalize(&self, path: &str) -> io::Result<String>;
}

/// The real filesystem. Ids are absolute host paths.
#[derive(Debug, Default)]
pub struct DiskFileSystem;

impl DiskFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for DiskFileSystem {
    async fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn exists(&self, path: &str) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn canonicalize(&self, path: &str) -> io::Result<String> {
        let canonical = tokio::fs::canonicalize(path).await?;
        canonical.into_os_string().into_string().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, "path is not valid unicode")
        })
    }
}

/// An in-memory filesystem for hermetic tests and virtual hosts.
///
/// Symlinks are modeled as an explicit `link → target` table so
/// `preserve_symlinks` behavior can be exercised without touching disk.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<FxHashMap<String, Vec<u8>>>,
    links: RwLock<FxHashMap<String, String>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_file(self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.write().insert(path.into(), content.into());
        self
    }

    pub fn add_link(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.links.write().insert(from.into(), to.into());
        self
    }

    pub fn insert_file(&self, path: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.write().insert(path.into(), content.into());
    }

    fn resolve_links(&self, path: &str) -> String {
        let links = self.links.read();
        let mut current = path.to_owned();
        // Link chains are expected to be short; the hop limit only guards
        // against accidental cycles in test fixtures.
        for _ in 0..32 {
            match links.get(&current) {
                Some(target) => current = target.clone(),
                None => break,
            }
        }
        current
    }
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let target = self.resolve_links(path);
        self.files
            .read()
            .get(&target)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{path} not found")))
    }

    async fn exists(&self, path: &str) -> bool {
        let target = self.resolve_links(path);
        self.files.read().contains_key(&target)
    }

    async fn canonicalize(&self, path: &str) -> io::Result<String> {
        let target = self.resolve_links(path);
        if self.files.read().contains_key(&target) {
            Ok(target)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{path} not found"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_fs_reads_and_probes() {
        let fs = MemoryFileSystem::new().add_file("/src/index.js", "export default 1;");
        assert!(fs.exists("/src/index.js").await);
        assert!(!fs.exists("/src/other.js").await);
        assert_eq!(
            fs.read("/src/index.js").await.unwrap(),
            b"export default 1;"
        );
        assert!(fs.read("/src/other.js").await.is_err());
    }

    #[tokio::test]
    async fn memory_fs_follows_link_chains() {
        let fs = MemoryFileSystem::new()
            .add_file("/real/target.js", "x")
            .add_link("/links/a.js", "/links/b.js")
            .add_link("/links/b.js", "/real/target.js");

        assert!(fs.exists("/links/a.js").await);
        assert_eq!(fs.canonicalize("/links/a.js").await.unwrap(), "/real/target.js");
        assert_eq!(fs.read("/links/a.js").await.unwrap(), b"x");
        assert!(fs.canonicalize("/links/missing.js").await.is_err());
    }

    #[tokio::test]
    async fn disk_fs_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("module.js");
        std::fs::write(&file, "export const a = 1;").unwrap();

        let fs = DiskFileSystem::new();
        let path = file.to_str().unwrap();
        assert!(fs.exists(path).await);
        assert_eq!(fs.read(path).await.unwrap(), b"export const a = 1;");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn disk_fs_canonicalizes_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target.js");
        let link = dir.path().join("link.js");
        std::fs::write(&target, "x").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let fs = DiskFileSystem::new();
        let canonical = fs.canonicalize(link.to_str().unwrap()).await.unwrap();
        assert!(canonical.ends_with("target.js"));
    }
}
