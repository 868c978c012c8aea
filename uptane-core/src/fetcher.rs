use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::client::MetadataFetcher;
use crate::datatype::tuf::SignedMetadata;
use crate::datatype::{EcuManifest, Error, RepositoryType, RoleName, Target};

/// A `MetadataFetcher` reading both repositories straight off the local
/// filesystem, in the same `repo/<director|image>/...` layout `RepoBuilder`
/// writes (§6). TLS/HTTP transport implementation is out of scope; this is
/// the one concrete backend this crate ships, suited to offline-media
/// delivery and to a locally-mirrored `repo_server`/`director_server`
/// (kept in sync by whatever external tooling owns that transport).
///
/// Manifests are appended, newline-delimited, to `<director>/manifest` —
/// the same fixture file `RepoBuilder::generate` creates — rather than
/// sent anywhere; a networked backend would instead `PUT` it to
/// `director_server`.
pub struct LocalRepoFetcher {
    base: PathBuf,
}

impl LocalRepoFetcher {
    pub fn new(base: impl Into<PathBuf>) -> LocalRepoFetcher {
        LocalRepoFetcher { base: base.into() }
    }

    fn repo_dir(&self, repo: RepositoryType) -> PathBuf {
        self.base.join("repo").join(repo.to_string())
    }

    fn role_path(&self, repo: RepositoryType, role: RoleName) -> PathBuf {
        self.repo_dir(repo).join(format!("{}.json", role))
    }

    fn read_envelope(path: &Path) -> Result<SignedMetadata, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| Error::Internal(format!("{}: {}", path.display(), err)))?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl MetadataFetcher for LocalRepoFetcher {
    fn fetch_root(&self, repo: RepositoryType, version: u64, cancel: &CancellationToken) -> Result<SignedMetadata, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Internal("fetch cancelled".into()));
        }
        Self::read_envelope(&self.repo_dir(repo).join(format!("{}.root.json", version)))
    }

    fn fetch_role(&self, repo: RepositoryType, role: RoleName, cancel: &CancellationToken) -> Result<SignedMetadata, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Internal("fetch cancelled".into()));
        }
        Self::read_envelope(&self.role_path(repo, role))
    }

    fn download_target(&self, target: &Target, dest: &Path, cancel: &CancellationToken) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Internal("download cancelled".into()));
        }
        let source = self.repo_dir(RepositoryType::Image).join(&target.filepath);
        std::fs::copy(&source, dest).map_err(|err| Error::Internal(format!("{}: {}", source.display(), err)))?;
        Ok(())
    }

    fn send_manifest(&self, manifest: &EcuManifest, cancel: &CancellationToken) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Internal("send cancelled".into()));
        }
        let mut line = serde_json::to_string(manifest)?;
        line.push('\n');
        let path = self.repo_dir(RepositoryType::Director).join("manifest");
        let mut existing = std::fs::read(&path).unwrap_or_default();
        existing.extend_from_slice(line.as_bytes());
        crate::datatype::Util::write_file(&path, &existing)
    }
}
