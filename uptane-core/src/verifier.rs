use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

use crate::crypto::PublicKey;
use crate::datatype::tuf::{RoleData, SignedMetadata};
use crate::datatype::{Error, RoleName};

/// The §4.3 verification failure taxonomy, nested inside `Error::Verify`
/// via its `Display` rendering so callers can still match on the crate's
/// single error type while tests assert on the specific kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    MissingRole,
    BadSignature,
    InsufficientSignatures,
    Expired,
    Rollback,
    InconsistentSnapshot,
    UnknownKeyid,
}

impl std::fmt::Display for VerifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let label = match self {
            VerifyError::MissingRole => "missing role",
            VerifyError::BadSignature => "bad signature",
            VerifyError::InsufficientSignatures => "insufficient signatures",
            VerifyError::Expired => "expired",
            VerifyError::Rollback => "rollback",
            VerifyError::InconsistentSnapshot => "inconsistent snapshot",
            VerifyError::UnknownKeyid => "unknown keyid",
        };
        write!(f, "{}", label)
    }
}

impl From<VerifyError> for Error {
    fn from(err: VerifyError) -> Error {
        Error::Verify(err.to_string())
    }
}

/// A pinned trust root: the set of known public keys and, for each role,
/// which keyids may sign it and how many distinct signatures it needs.
#[derive(Debug, Clone)]
pub struct TrustRoot {
    keys: HashMap<String, PublicKey>,
    roles: HashMap<RoleName, (Vec<String>, u64)>,
    version: u64,
}

impl TrustRoot {
    /// Builds a `TrustRoot` from an already-verified Root `RoleData`
    /// (self-consistency of Root's own signatures must be checked by the
    /// caller via `verify_self_signed` before trusting its contents).
    pub fn from_root(root: &RoleData) -> Result<TrustRoot, Error> {
        let keys_field = root.keys.as_ref().ok_or(VerifyError::MissingRole)?;
        let roles_field = root.roles.as_ref().ok_or(VerifyError::MissingRole)?;

        let mut keys = HashMap::new();
        for (keyid, key) in keys_field {
            let public = PublicKey::from_base64(key.keytype, keyid, &key.keyval.public)?;
            keys.insert(keyid.clone(), public);
        }

        let mut roles = HashMap::new();
        for (role_str, meta) in roles_field {
            let role: RoleName = role_str.parse()?;
            roles.insert(role, (meta.keyids.clone(), meta.threshold));
        }

        Ok(TrustRoot { keys, roles, version: root.version })
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Verifies incoming signed metadata against a `TrustRoot`, tracking the
/// last-seen version of each role to reject rollback.
pub struct MetadataVerifier {
    root: TrustRoot,
    last_seen: HashMap<RoleName, u64>,
}

impl MetadataVerifier {
    pub fn new(root: TrustRoot) -> MetadataVerifier {
        MetadataVerifier { root, last_seen: HashMap::new() }
    }

    pub fn trust_root(&self) -> &TrustRoot {
        &self.root
    }

    /// Verifies a role's signatures, threshold, freshness and monotonic
    /// version, returning the validated body.
    pub fn verify(&mut self, envelope: &SignedMetadata, expected_role: RoleName) -> Result<RoleData, Error> {
        if envelope.signed.role_type != expected_role {
            return Err(VerifyError::MissingRole.into());
        }

        let (keyids, threshold) = self
            .root
            .roles
            .get(&expected_role)
            .ok_or(VerifyError::MissingRole)?
            .clone();

        let canonical = envelope.canonical_bytes()?;
        let mut valid_keyids = HashSet::new();

        for signature in &envelope.signatures {
            if !keyids.contains(&signature.keyid) {
                continue;
            }
            let key = self.root.keys.get(&signature.keyid).ok_or(VerifyError::UnknownKeyid)?;
            let sig_bytes = base64::decode(&signature.sig)?;
            if key.verify(&canonical, &sig_bytes).is_ok() {
                valid_keyids.insert(signature.keyid.clone());
            }
        }

        if (valid_keyids.len() as u64) < threshold {
            return Err(VerifyError::InsufficientSignatures.into());
        }

        let expires: DateTime<Utc> = envelope
            .signed
            .expires
            .parse()
            .map_err(|_| Error::Verify("unparseable expires timestamp".into()))?;
        if expires < Utc::now() {
            return Err(VerifyError::Expired.into());
        }

        if let Some(&last) = self.last_seen.get(&expected_role) {
            if envelope.signed.version < last {
                return Err(VerifyError::Rollback.into());
            }
        }

        self.last_seen.insert(expected_role, envelope.signed.version);
        Ok(envelope.signed.clone())
    }

    /// Verifies Snapshot, additionally checking its enumerated Targets
    /// version matches the Targets envelope actually delivered alongside
    /// it.
    pub fn verify_snapshot(
        &mut self,
        snapshot: &SignedMetadata,
        targets: &SignedMetadata,
    ) -> Result<RoleData, Error> {
        let verified = self.verify(snapshot, RoleName::Snapshot)?;
        let meta = verified.meta.as_ref().ok_or(VerifyError::InconsistentSnapshot)?;
        let targets_meta = meta.get("targets.json").ok_or(VerifyError::InconsistentSnapshot)?;
        let claimed_version = targets_meta
            .custom
            .as_ref()
            .and_then(|c| c.get("version"))
            .and_then(|v| v.as_u64())
            .ok_or(VerifyError::InconsistentSnapshot)?;
        if claimed_version != targets.signed.version {
            return Err(VerifyError::InconsistentSnapshot.into());
        }
        Ok(verified)
    }

    /// Verifies Timestamp, additionally checking its claimed Snapshot
    /// hash matches the Snapshot envelope actually delivered.
    pub fn verify_timestamp(
        &mut self,
        timestamp: &SignedMetadata,
        snapshot: &SignedMetadata,
    ) -> Result<RoleData, Error> {
        let verified = self.verify(timestamp, RoleName::Timestamp)?;
        let meta = verified.meta.as_ref().ok_or(VerifyError::InconsistentSnapshot)?;
        let snapshot_meta = meta.get("snapshot.json").ok_or(VerifyError::InconsistentSnapshot)?;
        let expected_hash = snapshot_meta
            .hashes
            .get("sha256")
            .ok_or(VerifyError::InconsistentSnapshot)?;

        use sha2::{Digest, Sha256};
        let canonical = snapshot.canonical_bytes()?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        let actual_hash = hex::encode(hasher.finalize());

        if &actual_hash != expected_hash {
            return Err(VerifyError::InconsistentSnapshot.into());
        }
        Ok(verified)
    }

    /// Root rotation: a new Root is trusted only if signed by the
    /// threshold of both the outgoing and incoming Root key sets.
    pub fn rotate_root(&mut self, new_root: &SignedMetadata) -> Result<(), Error> {
        let new_trust = TrustRoot::from_root(&new_root.signed)?;
        let canonical = new_root.canonical_bytes()?;

        verify_threshold(&self.root, &new_root.signatures, &canonical, RoleName::Root)?;
        verify_threshold(&new_trust, &new_root.signatures, &canonical, RoleName::Root)?;

        if new_root.signed.version < self.root.version {
            return Err(VerifyError::Rollback.into());
        }

        self.root = new_trust;
        Ok(())
    }
}

fn verify_threshold(
    trust: &TrustRoot,
    signatures: &[crate::datatype::tuf::Signature],
    canonical: &[u8],
    role: RoleName,
) -> Result<(), Error> {
    let (keyids, threshold) = trust.roles.get(&role).ok_or(VerifyError::MissingRole)?;
    let mut valid = HashSet::new();
    for signature in signatures {
        if !keyids.contains(&signature.keyid) {
            continue;
        }
        if let Some(key) = trust.keys.get(&signature.keyid) {
            if let Ok(sig_bytes) = base64::decode(&signature.sig) {
                if key.verify(canonical, &sig_bytes).is_ok() {
                    valid.insert(signature.keyid.clone());
                }
            }
        }
    }
    if (valid.len() as u64) < *threshold {
        return Err(VerifyError::InsufficientSignatures.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_builder::RepoBuilder;
    use crate::datatype::{KeyKind, RepositoryType};
    use tempfile::tempdir;

    fn fresh_repo() -> (tempfile::TempDir, RepoBuilder) {
        let dir = tempdir().expect("tempdir");
        let builder = RepoBuilder::new(dir.path());
        builder.generate(KeyKind::Ed25519, None).expect("generate");
        (dir, builder)
    }

    fn read_envelope(dir: &std::path::Path, repo: &str, role: &str) -> SignedMetadata {
        let text = std::fs::read_to_string(dir.join("repo").join(repo).join(format!("{}.json", role)))
            .expect("read");
        serde_json::from_str(&text).expect("parse")
    }

    #[test]
    fn verify_accepts_freshly_generated_targets() {
        let (dir, _builder) = fresh_repo();
        let root_envelope = read_envelope(dir.path(), "image", "root");
        let trust = TrustRoot::from_root(&root_envelope.signed).expect("trust root");
        let mut verifier = MetadataVerifier::new(trust);

        let targets_envelope = read_envelope(dir.path(), "image", "targets");
        verifier.verify(&targets_envelope, RoleName::Targets).expect("should verify");
    }

    #[test]
    fn verify_rejects_rollback_to_lower_version() {
        let (dir, builder) = fresh_repo();
        let root_envelope = read_envelope(dir.path(), "director", "root");
        let trust = TrustRoot::from_root(&root_envelope.signed).expect("trust root");
        let mut verifier = MetadataVerifier::new(trust);

        let v1 = read_envelope(dir.path(), "director", "targets");
        verifier.verify(&v1, RoleName::Targets).expect("first accept");

        builder.sign_targets().expect("bump version");
        let v2 = read_envelope(dir.path(), "director", "targets");
        verifier.verify(&v2, RoleName::Targets).expect("second accept");

        // Replaying the old, lower-versioned envelope must be rejected.
        let err = verifier.verify(&v1, RoleName::Targets).expect_err("must reject rollback");
        assert_eq!(err.to_string(), VerifyError::Rollback.to_string());
    }

    #[test]
    fn verify_snapshot_and_timestamp_consistency_chain() {
        let (dir, _builder) = fresh_repo();
        let root_envelope = read_envelope(dir.path(), "image", "root");
        let trust = TrustRoot::from_root(&root_envelope.signed).expect("trust root");
        let mut verifier = MetadataVerifier::new(trust);

        let targets = read_envelope(dir.path(), "image", "targets");
        let snapshot = read_envelope(dir.path(), "image", "snapshot");
        let timestamp = read_envelope(dir.path(), "image", "timestamp");

        verifier.verify(&targets, RoleName::Targets).expect("targets");
        verifier.verify_snapshot(&snapshot, &targets).expect("snapshot");
        verifier.verify_timestamp(&timestamp, &snapshot).expect("timestamp");
    }
}
