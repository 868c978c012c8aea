use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::canonical::CanonicalJson;
use crate::datatype::tuf::{FileMeta, RoleData, SignedMetadata};
use crate::datatype::{Error, KeyKind, RepositoryType, RoleName, Target, Util};
use crate::keystore::KeyStore;

const ALL_ROLES: [RoleName; 4] =
    [RoleName::Root, RoleName::Targets, RoleName::Snapshot, RoleName::Timestamp];

/// Generates and maintains the two-repository (Director + Image) tree of
/// signed Uptane metadata, re-signing whichever roles a mutation touches.
pub struct RepoBuilder {
    base: PathBuf,
    keystore: KeyStore,
}

impl RepoBuilder {
    pub fn new(base: impl Into<PathBuf>) -> RepoBuilder {
        let base = base.into();
        RepoBuilder { keystore: KeyStore::new(base.join("keys")), base }
    }

    fn repo_dir(&self, repo: RepositoryType) -> PathBuf {
        self.base.join("repo").join(repo.to_string())
    }

    fn role_path(&self, repo: RepositoryType, role: RoleName) -> PathBuf {
        self.repo_dir(repo).join(format!("{}.json", role))
    }

    fn read_role(&self, repo: RepositoryType, role: RoleName) -> Result<SignedMetadata, Error> {
        let text = Util::read_text(&self.role_path(repo, role))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn write_role(&self, repo: RepositoryType, envelope: &SignedMetadata) -> Result<(), Error> {
        let role: RoleName = envelope.signed.role_type;
        let body = serde_json::to_vec_pretty(envelope)?;
        Util::write_file(&self.role_path(repo, role), &body)?;
        Ok(())
    }

    fn sign_and_write(
        &self,
        repo: RepositoryType,
        role: RoleName,
        signed: RoleData,
    ) -> Result<SignedMetadata, Error> {
        let key = self.keystore.load(repo, role)?;
        let envelope = SignedMetadata::sign(signed, &[&key])?;
        self.write_role(repo, &envelope)?;
        Ok(envelope)
    }

    /// Builds a fresh empty repository tree: one key pair per role per
    /// repository, empty Targets, and a Root that lists every role's
    /// public key with a threshold of one.
    pub fn generate(&self, kind: KeyKind, expires: Option<String>) -> Result<(), Error> {
        let expires = expires.unwrap_or_else(default_expiry);

        for repo in [RepositoryType::Director, RepositoryType::Image] {
            std::fs::create_dir_all(self.repo_dir(repo))?;

            for role in ALL_ROLES {
                self.keystore.generate(repo, role, kind)?;
            }

            let mut keys = HashMap::new();
            let mut roles = HashMap::new();
            for role in ALL_ROLES {
                let public = self.keystore.public_key(repo, role)?;
                keys.insert(
                    public.key_id(),
                    crate::datatype::tuf::Key {
                        keytype: public.key_type(),
                        keyval: crate::datatype::tuf::KeyValue { public: public.to_base64() },
                    },
                );
                roles.insert(
                    role.to_string(),
                    crate::datatype::tuf::RoleMeta { keyids: vec![public.key_id()], threshold: 1 },
                );
            }

            let root = RoleData {
                role_type: RoleName::Root,
                expires: expires.clone(),
                version: 1,
                keys: Some(keys),
                roles: Some(roles),
                targets: None,
                meta: None,
                consistent_snapshot: Some(false),
                custom: None,
            };
            let root_envelope = self.sign_and_write(repo, RoleName::Root, root)?;
            // Root additionally keeps a versioned copy for root-rotation fetching.
            let versioned_body = serde_json::to_vec_pretty(&root_envelope)?;
            Util::write_file(&self.repo_dir(repo).join("1.root.json"), &versioned_body)?;

            let targets = RoleData {
                role_type: RoleName::Targets,
                expires: expires.clone(),
                version: 1,
                keys: None,
                roles: None,
                targets: Some(HashMap::new()),
                meta: None,
                consistent_snapshot: None,
                custom: if repo == RepositoryType::Director {
                    Some(json!({ "correlationId": "" }))
                } else {
                    None
                },
            };
            self.sign_and_write(repo, RoleName::Targets, targets)?;

            self.refresh_snapshot_and_timestamp(repo, &expires)?;

            if repo == RepositoryType::Director {
                Util::write_file(&self.repo_dir(repo).join("manifest"), b"")?;
            }
        }

        Ok(())
    }

    /// Recomputes Snapshot (enumerating Root/Targets versions) and
    /// Timestamp (naming the Snapshot hash), bumping both versions.
    fn refresh_snapshot_and_timestamp(&self, repo: RepositoryType, expires: &str) -> Result<(), Error> {
        let targets = self.read_role(repo, RoleName::Targets)?;

        let next_snapshot_version = self
            .read_role(repo, RoleName::Snapshot)
            .map(|s| s.signed.version + 1)
            .unwrap_or(1);

        // Snapshot enumerates every non-Timestamp, non-Root role: just Targets here.
        let mut meta = HashMap::new();
        meta.insert("targets.json".to_string(), FileMeta { length: 0, hashes: HashMap::new(), custom: None }
            .with_version(targets.signed.version));

        let snapshot = RoleData {
            role_type: RoleName::Snapshot,
            expires: expires.to_string(),
            version: next_snapshot_version,
            keys: None,
            roles: None,
            targets: None,
            meta: Some(meta),
            consistent_snapshot: None,
            custom: None,
        };
        let snapshot_envelope = self.sign_and_write(repo, RoleName::Snapshot, snapshot)?;
        let snapshot_hash = hash_of(&snapshot_envelope)?;

        let next_timestamp_version = self
            .read_role(repo, RoleName::Timestamp)
            .map(|t| t.signed.version + 1)
            .unwrap_or(1);

        let mut ts_meta = HashMap::new();
        let mut hashes = HashMap::new();
        hashes.insert("sha256".to_string(), snapshot_hash);
        ts_meta.insert(
            "snapshot.json".to_string(),
            FileMeta { length: 0, hashes, custom: None }.with_version(snapshot_envelope.signed.version),
        );

        let timestamp = RoleData {
            role_type: RoleName::Timestamp,
            expires: expires.to_string(),
            version: next_timestamp_version,
            keys: None,
            roles: None,
            targets: None,
            meta: Some(ts_meta),
            consistent_snapshot: None,
            custom: None,
        };
        self.sign_and_write(repo, RoleName::Timestamp, timestamp)?;

        Ok(())
    }

    /// Hashes and measures a file, then adds or replaces it as a Target
    /// in the Image repository, bumping Targets/Snapshot/Timestamp, and
    /// copies the artifact's bytes into `repo/image/<target_name>` so the
    /// repository can serve its own targets (aktualizr's
    /// `ImageRepo::addImage` does the same copy into its image repo).
    pub fn add_image(&self, path: &Path, target_name: &str, uri: &str) -> Result<(), Error> {
        let target = Target::from_file(target_name, path, "", uri)?;
        let mut envelope = self.read_role(RepositoryType::Image, RoleName::Targets)?;
        let targets = envelope.signed.targets.get_or_insert_with(HashMap::new);
        targets.insert(target.filepath.clone(), target.to_file_meta()?);
        envelope.signed.version += 1;

        self.sign_and_write(RepositoryType::Image, RoleName::Targets, envelope.signed)?;

        let dest = self.repo_dir(RepositoryType::Image).join(target_name);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(path, &dest)?;

        let expires = self.read_role(RepositoryType::Image, RoleName::Root)?.signed.expires;
        self.refresh_snapshot_and_timestamp(RepositoryType::Image, &expires)
    }

    /// Copies a named Target already present in the Image repository into
    /// the Director's Targets, assigning it to one ECU/hardware id.
    pub fn add_target(
        &self,
        name: &str,
        hardware_id: &str,
        ecu_serial: &str,
        correlation_id: Option<&str>,
    ) -> Result<(), Error> {
        let image_targets = self.read_role(RepositoryType::Image, RoleName::Targets)?;
        let source = image_targets
            .signed
            .targets
            .as_ref()
            .and_then(|t| t.get(name))
            .cloned()
            .ok_or_else(|| Error::RepoBuilder(format!("no such image target: {}", name)))?;

        let mut director_envelope = self.read_role(RepositoryType::Director, RoleName::Targets)?;
        let mut custom = source.custom.clone().unwrap_or_else(|| json!({}));
        let mut ecu_identifiers = Map::new();
        ecu_identifiers.insert(ecu_serial.to_string(), json!({ "hardwareId": hardware_id }));
        if let Value::Object(ref mut map) = custom {
            map.insert("ecuIdentifiers".to_string(), Value::Object(ecu_identifiers));
            if let Some(correlation_id) = correlation_id {
                map.insert("correlationId".to_string(), json!(correlation_id));
            }
        }

        let entry = FileMeta { length: source.length, hashes: source.hashes, custom: Some(custom) };
        director_envelope
            .signed
            .targets
            .get_or_insert_with(HashMap::new)
            .insert(name.to_string(), entry);
        director_envelope.signed.version += 1;

        self.sign_and_write(RepositoryType::Director, RoleName::Targets, director_envelope.signed)?;
        let expires = self.read_role(RepositoryType::Director, RoleName::Root)?.signed.expires;
        self.refresh_snapshot_and_timestamp(RepositoryType::Director, &expires)
    }

    /// Re-signs the Director Targets (without content changes), bumping
    /// its version, then cascades to Snapshot and Timestamp.
    pub fn sign_targets(&self) -> Result<(), Error> {
        let mut envelope = self.read_role(RepositoryType::Director, RoleName::Targets)?;
        envelope.signed.version += 1;
        self.sign_and_write(RepositoryType::Director, RoleName::Targets, envelope.signed)?;
        let expires = self.read_role(RepositoryType::Director, RoleName::Root)?.signed.expires;
        self.refresh_snapshot_and_timestamp(RepositoryType::Director, &expires)
    }

    /// Signs an arbitrary, loosely-shaped role body supplied by external
    /// tooling (the `sign` CLI subcommand, reading a partial JSON object
    /// from stdin rather than a fully-formed `RoleData`), returning the
    /// `{signed, signatures}` envelope as raw JSON.
    pub fn sign_raw(&self, repo: RepositoryType, role: RoleName, body: Value) -> Result<Value, Error> {
        let key = self.keystore.load(repo, role)?;
        let canonical = CanonicalJson::convert(&body)?;
        let sig = key.sign(canonical.as_bytes())?;
        let signature = crate::datatype::tuf::Signature {
            keyid: key.key_id(),
            method: key.signature_method(),
            sig: base64::encode(sig),
        };
        Ok(json!({ "signed": body, "signatures": [serde_json::to_value(&signature)?] }))
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }
}

fn hash_of(envelope: &SignedMetadata) -> Result<String, Error> {
    use sha2::{Digest, Sha256};
    let canonical = envelope.canonical_bytes()?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(hex::encode(hasher.finalize()))
}

fn default_expiry() -> String {
    (Utc::now() + Duration::days(365)).to_rfc3339()
}

trait WithVersion {
    fn with_version(self, version: u64) -> Self;
}

impl WithVersion for FileMeta {
    fn with_version(mut self, version: u64) -> Self {
        let custom = self.custom.get_or_insert_with(|| json!({}));
        if let Value::Object(ref mut map) = custom {
            map.insert("version".to_string(), json!(version));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_generate_produces_empty_targets_with_blank_correlation_id() {
        let dir = tempdir().expect("tempdir");
        let builder = RepoBuilder::new(dir.path());
        builder.generate(KeyKind::Ed25519, None).expect("generate");

        let director_targets = builder.read_role(RepositoryType::Director, RoleName::Targets).expect("read");
        assert!(director_targets.signed.targets.as_ref().unwrap().is_empty());
        assert_eq!(director_targets.signed.custom.as_ref().unwrap()["correlationId"], "");

        let image_targets = builder.read_role(RepositoryType::Image, RoleName::Targets).expect("read");
        assert!(image_targets.signed.custom.is_none());

        let root = Util::read_text(&dir.path().join("repo/director/root.json")).expect("read root");
        let versioned = Util::read_text(&dir.path().join("repo/director/1.root.json")).expect("read 1.root");
        assert_eq!(root, versioned);
    }

    #[test]
    fn add_image_then_add_target_assigns_hardware_and_serial() {
        let dir = tempdir().expect("tempdir");
        let builder = RepoBuilder::new(dir.path());
        builder.generate(KeyKind::Ed25519, None).expect("generate");

        let file = dir.path().join("manifest-file");
        std::fs::write(&file, b"firmware-bytes").expect("write fixture");
        builder.add_image(&file, "manifest", "http://example/manifest").expect("add_image");

        let image_targets = builder.read_role(RepositoryType::Image, RoleName::Targets).expect("read");
        assert_eq!(image_targets.signed.targets.as_ref().unwrap().len(), 1);

        builder
            .add_target("manifest", "test-hw", "test-serial", None)
            .expect("add_target");
        builder.sign_targets().expect("sign_targets");

        let director_targets = builder.read_role(RepositoryType::Director, RoleName::Targets).expect("read");
        let entry = &director_targets.signed.targets.as_ref().unwrap()["manifest"];
        let ecu_ids = entry.custom.as_ref().unwrap().get("ecuIdentifiers").unwrap();
        assert_eq!(ecu_ids["test-serial"]["hardwareId"], "test-hw");
    }

    #[test]
    fn add_image_copies_artifact_bytes_into_the_image_repo() {
        let dir = tempdir().expect("tempdir");
        let builder = RepoBuilder::new(dir.path());
        builder.generate(KeyKind::Ed25519, None).expect("generate");

        let source = dir.path().join("firmware-source");
        std::fs::write(&source, b"firmware-bytes").expect("write fixture");
        builder.add_image(&source, "firmware.bin", "http://example/firmware.bin").expect("add_image");

        let served = dir.path().join("repo").join("image").join("firmware.bin");
        assert_eq!(std::fs::read(&served).expect("served artifact exists"), b"firmware-bytes");
    }

    #[test]
    fn successive_rewrites_increment_version_by_one() {
        let dir = tempdir().expect("tempdir");
        let builder = RepoBuilder::new(dir.path());
        builder.generate(KeyKind::Ed25519, None).expect("generate");

        let before = builder.read_role(RepositoryType::Director, RoleName::Targets).unwrap().signed.version;
        builder.sign_targets().expect("sign_targets");
        let after = builder.read_role(RepositoryType::Director, RoleName::Targets).unwrap().signed.version;
        assert_eq!(after, before + 1);
    }
}
