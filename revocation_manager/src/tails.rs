use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::error::RevocationResult;

/// Hosting for the large binary tails artifact of a registry. Upload happens
/// once per registry before the definition is published; download restores a
/// locally missing artifact from its public URI.
#[async_trait]
pub trait TailsFileManager: Send + Sync {
    /// Uploads the artifact and returns the public URI it is served from.
    async fn upload(&self, registry_id: &str, local_path: &Path) -> RevocationResult<String>;

    /// Fetches the artifact from `public_uri` into `dest_dir`, returning the
    /// local path it was stored at.
    async fn download(
        &self,
        registry_id: &str,
        public_uri: &str,
        dest_dir: &Path,
    ) -> RevocationResult<PathBuf>;
}
