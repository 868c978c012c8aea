use std::path::{Path, PathBuf};

use crate::crypto::PrivateKey;
use crate::datatype::{Error, KeyKind, RepositoryType, RoleName, Util};

/// Manages on-disk key material for both repositories, laid out as
/// `{base}/{repo}/{role}/{private.key,key_type}`. One keypair per
/// (repository, role); regenerating overwrites whatever was there.
pub struct KeyStore {
    base: PathBuf,
}

impl KeyStore {
    pub fn new(base: impl Into<PathBuf>) -> KeyStore {
        KeyStore { base: base.into() }
    }

    fn role_dir(&self, repo: RepositoryType, role: RoleName) -> PathBuf {
        self.base.join(repo.to_string()).join(role.to_string())
    }

    /// Generates a new key of `kind` for `(repo, role)`, persisting it to
    /// disk and returning the loaded key.
    pub fn generate(
        &self,
        repo: RepositoryType,
        role: RoleName,
        kind: KeyKind,
    ) -> Result<PrivateKey, Error> {
        let key = PrivateKey::generate(kind)?;
        let dir = self.role_dir(repo, role);
        Util::write_file(&dir.join("private.key"), key.to_bytes())?;
        Util::write_file(&dir.join("key_type"), kind.to_string().as_bytes())?;
        let public = key.public_key()?;
        Util::write_file(&dir.join("public.key"), public.to_base64().as_bytes())?;
        Ok(key)
    }

    /// Loads the key previously generated for `(repo, role)`.
    pub fn load(&self, repo: RepositoryType, role: RoleName) -> Result<PrivateKey, Error> {
        let dir = self.role_dir(repo, role);
        let kind: KeyKind = Util::read_text(&dir.join("key_type"))?.trim().parse()?;
        let bytes = Util::read_file(&dir.join("private.key"))?;
        PrivateKey::from_bytes(kind, &bytes)
    }

    /// Convenience wrapper returning only the public half, for callers
    /// assembling root metadata that never needs the private key itself.
    pub fn public_key(&self, repo: RepositoryType, role: RoleName) -> Result<crate::crypto::PublicKey, Error> {
        self.load(repo, role)?.public_key()
    }

    /// True if key material already exists for `(repo, role)`.
    pub fn exists(&self, repo: RepositoryType, role: RoleName) -> bool {
        self.role_dir(repo, role).join("private.key").exists()
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }
}
