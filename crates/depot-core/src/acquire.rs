//! Acquirer - downloads a resolved entry's files into a staging area.
//!
//! Every file is checked against the catalog size and SHA-256 (or the digest
//! the server published when the catalog has none). A package is returned
//! only when every file verified; on any failure the staging directory is
//! dropped, which removes everything written so far.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use depot_schema::{GameId, RemoteFile, RepoKey, RepositoryDescriptor, Sha256Digest, VersionMarker};
use futures::stream::{self, StreamExt};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::io::transport::{Fetch, TransportError};
use crate::registry::{SourceRegistry, locations_for};
use crate::resolver::ResolvedCandidate;

/// Default number of files downloaded at once.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

/// One downloaded file inside the staging area.
#[derive(Debug, Clone)]
pub struct StagedFile {
    /// Path as listed in the catalog.
    pub remote: String,
    pub local: PathBuf,
    pub size: u64,
    /// Digest of the bytes actually received.
    pub sha256: Sha256Digest,
}

/// Downloaded, verified files for one catalog entry.
///
/// Only built once every file passed its size and digest check, so a
/// package never holds a corrupt file. Dropping the package deletes the staging directory.
#[derive(Debug)]
pub struct StagedPackage {
    dir: TempDir,
    pub game_id: Option<GameId>,
    pub repository: RepoKey,
    pub version: VersionMarker,
    pub files: Vec<StagedFile>,
}

impl StagedPackage {
    /// Root of the staging area.
    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}

#[cfg(test)]
impl StagedPackage {
    /// An empty, verified package rooted in a fresh temp dir.
    pub(crate) fn empty(game_id: GameId) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            game_id: Some(game_id),
            repository: RepoKey::new("test").unwrap(),
            version: VersionMarker::new("1"),
            files: Vec::new(),
        }
    }
}

/// Check received bytes against what the catalog (or server) promised.
fn verify(
    file: &RemoteFile,
    body: &[u8],
    published: Option<&Sha256Digest>,
) -> Result<Sha256Digest, String> {
    let actual_size = body.len() as u64;
    if actual_size != file.size {
        return Err(format!(
            "expected {} bytes, got {actual_size}",
            file.size
        ));
    }
    let actual = Sha256Digest::compute(body);
    if let Some(expected) = file.sha256.as_ref().or(published)
        && *expected != actual
    {
        return Err(format!("expected sha256 {expected}, got {actual}"));
    }
    Ok(actual)
}

/// Downloads catalog entries into staging areas under one root.
pub struct Acquirer {
    registry: Arc<SourceRegistry>,
    fetcher: Arc<dyn Fetch>,
    staging_root: PathBuf,
    concurrency: usize,
    prefer_mirror: bool,
}

impl std::fmt::Debug for Acquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquirer")
            .field("staging_root", &self.staging_root)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Acquirer {
    pub fn new(
        registry: Arc<SourceRegistry>,
        fetcher: Arc<dyn Fetch>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            staging_root: staging_root.into(),
            concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            prefer_mirror: false,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_mirror_preference(mut self, prefer_mirror: bool) -> Self {
        self.prefer_mirror = prefer_mirror;
        self
    }

    /// Fetch and verify every file of the candidate's entry.
    pub async fn acquire(
        &self,
        candidate: &ResolvedCandidate,
        cancel: &CancellationToken,
    ) -> Result<StagedPackage, EngineError> {
        let entry = &candidate.entry;
        let repo = self.registry.get(&entry.repository)?;

        std::fs::create_dir_all(&self.staging_root)?;
        let dir = TempDir::new_in(&self.staging_root)?;
        let child = cancel.child_token();

        info!(
            repo = %repo.key,
            name = %entry.name,
            files = entry.files.len(),
            "acquiring"
        );

        let mut downloads = stream::iter(entry.files.iter().enumerate())
            .map(|(index, file)| {
                let root = dir.path();
                let child = &child;
                async move {
                    self.download(repo, file, root, child)
                        .await
                        .map(|staged| (index, staged))
                }
            })
            .buffer_unordered(self.concurrency);

        let mut files = Vec::with_capacity(entry.files.len());
        while let Some(result) = downloads.next().await {
            match result {
                Ok(staged) => files.push(staged),
                Err(e) => {
                    // Remaining downloads observe the child token; dropping
                    // the stream and `dir` discards partial work.
                    child.cancel();
                    return Err(e);
                }
            }
        }
        drop(downloads);
        files.sort_by_key(|(index, _)| *index);

        Ok(StagedPackage {
            dir,
            game_id: entry.game_id,
            repository: entry.repository.clone(),
            version: entry.version.clone(),
            files: files.into_iter().map(|(_, f)| f).collect(),
        })
    }

    async fn download(
        &self,
        repo: &RepositoryDescriptor,
        file: &RemoteFile,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<StagedFile, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let locations = locations_for(repo, &file.path, self.prefer_mirror);
        let fetched = match self.fetcher.fetch(&locations, cancel).await {
            Ok(fetched) => fetched,
            Err(TransportError::Cancelled) => return Err(EngineError::Cancelled),
            Err(source) => {
                return Err(EngineError::AcquisitionFailed {
                    repository: repo.key.clone(),
                    file: file.path.clone(),
                    source,
                });
            }
        };

        let sha256 = verify(file, &fetched.body, fetched.digest.as_ref()).map_err(|detail| {
            EngineError::IntegrityMismatch {
                repository: repo.key.clone(),
                file: file.path.clone(),
                detail,
            }
        })?;

        let local = root.join(&file.path);
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&local, &fetched.body).await?;
        debug!(repo = %repo.key, file = %file.path, url = %fetched.url, "verified");

        Ok(StagedFile {
            remote: file.path.clone(),
            local,
            size: file.size,
            sha256,
        })
    }
}
