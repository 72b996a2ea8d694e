//! Client surface of the distributed filesystem holding job input and output.
//!
//! Paths are `hdfs://host:port/...` or provider-native URIs; the concrete
//! adapter lives outside this crate.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Metadata for one entry of a DFS listing.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub is_dir: bool,
}

#[async_trait]
pub trait Dfs: Send + Sync {
    async fn exist(&self, path: &str) -> Result<bool>;

    /// Removes a file or directory tree.
    async fn remove(&self, path: &str) -> Result<()>;

    /// Lists a directory, or returns the single entry for a plain file.
    async fn list(&self, path: &str) -> Result<Vec<FileInfo>>;

    /// Expands a pattern containing `*` components.
    async fn glob(&self, pattern: &str) -> Result<Vec<FileInfo>>;

    /// Reads a whole file; used to cut line-oriented inputs into tasks.
    async fn read(&self, path: &str) -> Result<Bytes>;

    async fn open_write(&self, path: &str) -> Result<Box<dyn DfsWriter>>;
}

#[async_trait]
pub trait DfsWriter: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    async fn close(self: Box<Self>) -> Result<()>;
}
