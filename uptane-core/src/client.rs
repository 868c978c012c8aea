use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::canonical::CanonicalJson;
use crate::crypto::PrivateKey;
use crate::datatype::tuf::SignedMetadata;
use crate::datatype::{
    EcuCustom, EcuManifest, EcuVersion, Error, InstallCode, InstalledVersion, OperationResult,
    RepositoryType, RoleName, Signature, Target, TargetCustom,
};
use crate::pacman::{InstallOutcome, InstallStatus, PackageManager};
use crate::secondary::{SecondaryTransport, TrustChain, UpdateType};
use crate::verifier::MetadataVerifier;

/// The network/storage backend `UptaneClient` delegates every remote
/// operation to. TLS/HTTP transport implementation is an external
/// collaborator (§1 Non-goals); this trait is the seam a real client binds
/// a concrete `reqwest`-backed (or offline-media-backed) implementation
/// to, the same way `PackageManager`/`SecondaryTransport` are seams for
/// their own external collaborators.
pub trait MetadataFetcher: Send {
    /// Fetches `<version>.root.json`, used to walk the root-rotation chain
    /// one version at a time. Returns an error once no such version exists
    /// (signalling the chain has caught up).
    fn fetch_root(&self, repo: RepositoryType, version: u64, cancel: &CancellationToken) -> Result<SignedMetadata, Error>;

    fn fetch_role(&self, repo: RepositoryType, role: RoleName, cancel: &CancellationToken) -> Result<SignedMetadata, Error>;

    fn download_target(&self, target: &Target, dest: &Path, cancel: &CancellationToken) -> Result<(), Error>;

    fn send_manifest(&self, manifest: &EcuManifest, cancel: &CancellationToken) -> Result<(), Error>;
}

/// A Director Targets entry resolved against the matching Image Targets
/// entry and filtered down to one this client is responsible for (either
/// the primary itself or one of its attached secondaries).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedTarget {
    pub name: String,
    pub ecu_serial: String,
    pub hardware_id: String,
    pub correlation_id: Option<String>,
    pub length: u64,
    pub hashes: HashMap<String, String>,
    pub uri: String,
}

impl AssignedTarget {
    pub fn to_target(&self) -> Target {
        Target {
            filepath: self.name.clone(),
            length: self.length,
            hashes: self.hashes.clone(),
            custom: TargetCustom { ecu_identifier: self.ecu_serial.clone(), uri: self.uri.clone(), release_counter: None },
        }
    }
}

/// Result of a Director poll: the targets that need fetching/installing
/// (already filtered to this primary and its secondaries, and already
/// diffed against what is currently installed) plus the trust material a
/// secondary needs before it will accept firmware.
pub struct UpdateCheck {
    pub targets: Vec<AssignedTarget>,
    pub trustchain: TrustChain,
}

/// Coordinates one logical update attempt — fetch, verify, download,
/// install, report — consulting `MetadataVerifier`, driving the primary's
/// `PackageManager`, and fanning out to each `SecondaryTransport`. Backends
/// are dynamically dispatched (§9 "capability set" design note) since the
/// set of attached secondaries is only known at runtime.
pub struct UptaneClient<F: MetadataFetcher> {
    fetcher: F,
    pacman: Box<dyn PackageManager>,
    secondaries: Vec<Box<dyn SecondaryTransport>>,
    director_verifier: MetadataVerifier,
    image_verifier: MetadataVerifier,
    primary_ecu_serial: String,
    primary_hardware_id: String,
    device_key: PrivateKey,
}

impl<F: MetadataFetcher> UptaneClient<F> {
    pub fn new(
        fetcher: F,
        pacman: Box<dyn PackageManager>,
        secondaries: Vec<Box<dyn SecondaryTransport>>,
        director_verifier: MetadataVerifier,
        image_verifier: MetadataVerifier,
        primary_ecu_serial: impl Into<String>,
        primary_hardware_id: impl Into<String>,
        device_key: PrivateKey,
    ) -> UptaneClient<F> {
        UptaneClient {
            fetcher,
            pacman,
            secondaries,
            director_verifier,
            image_verifier,
            primary_ecu_serial: primary_ecu_serial.into(),
            primary_hardware_id: primary_hardware_id.into(),
            device_key,
        }
    }

    fn known_ecu_serials(&self) -> Vec<String> {
        let mut serials = vec![self.primary_ecu_serial.clone()];
        serials.extend(self.secondaries.iter().map(|s| s.ecu_serial().to_string()));
        serials
    }

    fn currently_installed(&self, ecu_serial: &str) -> Option<Target> {
        if ecu_serial == self.primary_ecu_serial {
            return self.pacman.get_current();
        }
        self.secondaries
            .iter()
            .find(|s| s.ecu_serial() == ecu_serial)
            .and_then(|s| s.get_manifest().ok())
            .and_then(|m| m.installed)
    }

    /// Walks `<version+1>.root.json` forward until the fetcher reports no
    /// further version exists, rotating trust one step at a time so a
    /// compromised-then-recovered key set can never be skipped over.
    fn roll_root_forward(verifier: &mut MetadataVerifier, fetcher: &F, repo: RepositoryType, cancel: &CancellationToken) -> Result<(), Error> {
        loop {
            let next = verifier.trust_root().version() + 1;
            match fetcher.fetch_root(repo, next, cancel) {
                Ok(envelope) => verifier.rotate_root(&envelope)?,
                Err(_) => return Ok(()),
            }
        }
    }

    /// Fetches and verifies Timestamp → Snapshot → Targets for `repo`,
    /// rolling Root forward first. Verification strictly precedes download
    /// (§5 ordering guarantees).
    fn fetch_verified_targets(&mut self, repo: RepositoryType, cancel: &CancellationToken) -> Result<SignedMetadata, Error> {
        let verifier = match repo {
            RepositoryType::Director => &mut self.director_verifier,
            RepositoryType::Image => &mut self.image_verifier,
        };
        Self::roll_root_forward(verifier, &self.fetcher, repo, cancel)?;

        let targets = self.fetcher.fetch_role(repo, RoleName::Targets, cancel)?;
        let snapshot = self.fetcher.fetch_role(repo, RoleName::Snapshot, cancel)?;
        let timestamp = self.fetcher.fetch_role(repo, RoleName::Timestamp, cancel)?;

        verifier.verify(&targets, RoleName::Targets)?;
        verifier.verify_snapshot(&snapshot, &targets)?;
        verifier.verify_timestamp(&timestamp, &snapshot)?;

        Ok(targets)
    }

    /// Polls the Director repository for new assignments, cross-checks
    /// each one against the Image repository's matching entry (§3
    /// invariant: every Director target has an identical-hash counterpart
    /// in Image), and returns only the subset whose assignee doesn't
    /// already have it installed.
    pub fn check_for_updates(&mut self, cancel: &CancellationToken) -> Result<UpdateCheck, Error> {
        let director_targets = self.fetch_verified_targets(RepositoryType::Director, cancel)?;
        let image_targets = self.fetch_verified_targets(RepositoryType::Image, cancel)?;

        let known = self.known_ecu_serials();
        let mut assigned = Vec::new();

        let director_entries = director_targets.signed.targets.as_ref().cloned().unwrap_or_default();
        let image_entries = image_targets.signed.targets.as_ref().cloned().unwrap_or_default();

        for (name, meta) in &director_entries {
            let image_entry = image_entries
                .get(name)
                .ok_or_else(|| Error::Verify(format!("director target {} absent from image repo", name)))?;
            if image_entry.length != meta.length || image_entry.hashes != meta.hashes {
                return Err(Error::Verify(format!("director/image hash mismatch for {}", name)));
            }

            let uri = image_entry
                .custom
                .as_ref()
                .and_then(|c| c.get("uri"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();

            let ecu_ids = meta
                .custom
                .as_ref()
                .and_then(|c| c.get("ecuIdentifiers"))
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default();

            let correlation_id = meta
                .custom
                .as_ref()
                .and_then(|c| c.get("correlationId"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());

            for (ecu_serial, entry) in &ecu_ids {
                if !known.contains(ecu_serial) {
                    continue;
                }
                let hardware_id = entry.get("hardwareId").and_then(|v| v.as_str()).unwrap_or_default().to_string();

                let already_installed = self
                    .currently_installed(ecu_serial)
                    .map(|current| current.filepath == *name && current.hashes == meta.hashes)
                    .unwrap_or(false);
                if already_installed {
                    continue;
                }

                assigned.push(AssignedTarget {
                    name: name.clone(),
                    ecu_serial: ecu_serial.clone(),
                    hardware_id,
                    correlation_id: correlation_id.clone(),
                    length: meta.length,
                    hashes: meta.hashes.clone(),
                    uri: uri.clone(),
                });
            }
        }

        let trustchain = TrustChain {
            director_root: format!("root@v{}", self.director_verifier.trust_root().version()),
            director_targets: serde_json::to_string(&director_targets)?,
        };

        Ok(UpdateCheck { targets: assigned, trustchain })
    }

    /// Downloads every assigned target into `dest_dir`, verifying length
    /// and hash on arrival. A cancelled token aborts before the next
    /// request — downloads already on disk are left in place for a future
    /// retry.
    pub fn download(&self, targets: &[AssignedTarget], dest_dir: &Path, cancel: &CancellationToken) -> Result<(), Error> {
        std::fs::create_dir_all(dest_dir)?;
        for assigned in targets {
            if cancel.is_cancelled() {
                return Err(Error::Internal("download cancelled".into()));
            }
            let target = assigned.to_target();
            let dest = dest_dir.join(&assigned.name);
            self.fetcher.download_target(&target, &dest, cancel)?;
            target.verify_file(&dest)?;
        }
        Ok(())
    }

    /// Installs each assigned target on its owning ECU: directly via the
    /// primary's `PackageManager`, or via `putMetadata` →
    /// `sendFirmware` → `install` for a secondary, per §4.5's fixed
    /// sequencing. Returns one outcome per (ecu_serial, target).
    pub fn install(
        &self,
        targets: &[AssignedTarget],
        dest_dir: &Path,
        trustchain: &TrustChain,
        cancel: &CancellationToken,
    ) -> Result<Vec<(String, InstallOutcome)>, Error> {
        let mut outcomes = Vec::new();
        for assigned in targets {
            let target = assigned.to_target();
            if assigned.ecu_serial == self.primary_ecu_serial {
                outcomes.push((assigned.ecu_serial.clone(), self.pacman.install(&target)));
                continue;
            }

            let secondary = self
                .secondaries
                .iter()
                .find(|s| s.ecu_serial() == assigned.ecu_serial)
                .ok_or_else(|| Error::Secondary(format!("no transport registered for {}", assigned.ecu_serial)))?;

            secondary.put_metadata(trustchain)?;
            let _ = dest_dir; // firmware bytes already live on disk; local transports read by filepath.
            secondary.send_firmware(&target, UpdateType::Full, cancel)?;
            outcomes.push((assigned.ecu_serial.clone(), secondary.install(&target)));
        }
        Ok(outcomes)
    }

    /// Signs and sends this primary's manifest, folding in the result of
    /// the last install attempt (if any) as an `OperationResult`.
    pub fn send_manifest(&self, last_outcome: Option<&InstallOutcome>, cancel: &CancellationToken) -> Result<(), Error> {
        let current = self.pacman.get_current();
        let signed = build_ecu_version(&self.primary_ecu_serial, current.as_ref(), last_outcome);
        let manifest = sign_ecu_version(&self.device_key, signed)?;
        self.fetcher.send_manifest(&manifest, cancel)
    }
}

/// Aggregates per-ECU install outcomes into the single status the cycle
/// state machine reacts to: any hard failure dominates, then
/// `NeedsCompletion`, else `Ok`.
pub fn aggregate_install_status(outcomes: &[(String, InstallOutcome)]) -> InstallStatus {
    let mut needs_completion = false;
    for (_, outcome) in outcomes {
        match outcome.status {
            InstallStatus::Ok => {}
            InstallStatus::NeedsCompletion => needs_completion = true,
            other => return other,
        }
    }
    if needs_completion {
        InstallStatus::NeedsCompletion
    } else {
        InstallStatus::Ok
    }
}

fn install_status_to_code(status: InstallStatus) -> InstallCode {
    match status {
        InstallStatus::Ok | InstallStatus::NeedsCompletion => InstallCode::Ok,
        InstallStatus::DownloadFailed => InstallCode::GeneralError,
        InstallStatus::InstallFailed => InstallCode::ValidationFailed,
        InstallStatus::InternalError => InstallCode::InternalError,
        InstallStatus::OperationCancelled => InstallCode::GeneralError,
    }
}

fn build_ecu_version(ecu_serial: &str, installed: Option<&Target>, last_outcome: Option<&InstallOutcome>) -> EcuVersion {
    let now = Utc::now().to_rfc3339();
    let installed_image = match installed {
        Some(target) => InstalledVersion { filepath: target.filepath.clone(), length: target.length, hashes: target.hashes.clone() },
        None => InstalledVersion { filepath: String::new(), length: 0, hashes: HashMap::new() },
    };

    let custom = last_outcome.map(|outcome| EcuCustom {
        operation_result: Some(OperationResult {
            id: installed_image.filepath.clone(),
            result_code: install_status_to_code(outcome.status),
            result_text: outcome.message.clone(),
        }),
    });

    EcuVersion {
        attacks_detected: String::new(),
        ecu_serial: ecu_serial.to_string(),
        previous_timeserver_time: now.clone(),
        timeserver_time: now,
        installed_image,
        custom,
    }
}

fn sign_ecu_version(key: &PrivateKey, signed: EcuVersion) -> Result<EcuManifest, Error> {
    let json = serde_json::to_value(&signed)?;
    let canonical = CanonicalJson::convert(&json)?;
    let sig = key.sign(canonical.as_bytes())?;
    let signature = Signature { keyid: key.key_id(), method: key.signature_method(), sig: base64::encode(sig) };
    Ok(EcuManifest { signed, signatures: vec![signature] })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::KeyKind;
    use crate::pacman::FakePackageManager;
    use crate::repo_builder::RepoBuilder;
    use crate::secondary::LocalSecondary;
    use crate::verifier::TrustRoot;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Reads metadata straight off the `RepoBuilder`-generated tree and
    /// copies target bytes out of the Image repository's directory,
    /// standing in for a real HTTP/offline-media backend in tests.
    struct FixtureFetcher {
        base: std::path::PathBuf,
        sent_manifests: Mutex<Vec<EcuManifest>>,
    }

    impl FixtureFetcher {
        fn new(base: impl Into<std::path::PathBuf>) -> FixtureFetcher {
            FixtureFetcher { base: base.into(), sent_manifests: Mutex::new(Vec::new()) }
        }

        fn role_path(&self, repo: RepositoryType, role: RoleName) -> std::path::PathBuf {
            self.base.join("repo").join(repo.to_string()).join(format!("{}.json", role))
        }
    }

    impl MetadataFetcher for FixtureFetcher {
        fn fetch_root(&self, repo: RepositoryType, version: u64, _cancel: &CancellationToken) -> Result<SignedMetadata, Error> {
            let path = self.base.join("repo").join(repo.to_string()).join(format!("{}.root.json", version));
            let text = std::fs::read_to_string(path).map_err(|_| Error::Internal("no such root version".into()))?;
            Ok(serde_json::from_str(&text)?)
        }

        fn fetch_role(&self, repo: RepositoryType, role: RoleName, _cancel: &CancellationToken) -> Result<SignedMetadata, Error> {
            let text = std::fs::read_to_string(self.role_path(repo, role))?;
            Ok(serde_json::from_str(&text)?)
        }

        fn download_target(&self, target: &Target, dest: &Path, _cancel: &CancellationToken) -> Result<(), Error> {
            let source = self.base.join("repo").join(RepositoryType::Image.to_string()).join(&target.filepath);
            std::fs::copy(&source, dest)?;
            Ok(())
        }

        fn send_manifest(&self, manifest: &EcuManifest, _cancel: &CancellationToken) -> Result<(), Error> {
            self.sent_manifests.lock().expect("lock").push(manifest.clone());
            Ok(())
        }
    }

    fn trust_root_for(dir: &Path, repo: RepositoryType) -> TrustRoot {
        let text = std::fs::read_to_string(dir.join("repo").join(repo.to_string()).join("root.json")).expect("read root");
        let envelope: SignedMetadata = serde_json::from_str(&text).expect("parse root");
        TrustRoot::from_root(&envelope.signed).expect("trust root")
    }

    fn build_client(dir: &Path) -> UptaneClient<FixtureFetcher> {
        let director_verifier = MetadataVerifier::new(trust_root_for(dir, RepositoryType::Director));
        let image_verifier = MetadataVerifier::new(trust_root_for(dir, RepositoryType::Image));
        let secondary = LocalSecondary::new("secondary-1", FakePackageManager::new());

        UptaneClient::new(
            FixtureFetcher::new(dir),
            Box::new(FakePackageManager::new()),
            vec![Box::new(secondary)],
            director_verifier,
            image_verifier,
            "primary-1",
            "test-hw",
            PrivateKey::generate(KeyKind::Ed25519).expect("device key"),
        )
    }

    fn seed_repo(dir: &Path, ecu_serial: &str) {
        let builder = RepoBuilder::new(dir);
        builder.generate(KeyKind::Ed25519, None).expect("generate");

        let file = dir.join("firmware-source");
        std::fs::write(&file, b"firmware-bytes").expect("write fixture");
        builder.add_image(&file, "firmware.bin", "http://example/firmware.bin").expect("add_image");
        builder.add_target("firmware.bin", "test-hw", ecu_serial, Some("campaign-1")).expect("add_target");
        builder.sign_targets().expect("sign_targets");
    }

    #[test]
    fn check_for_updates_surfaces_targets_assigned_to_known_ecus() {
        let dir = tempdir().expect("tempdir");
        seed_repo(dir.path(), "secondary-1");
        let mut client = build_client(dir.path());
        let cancel = CancellationToken::new();

        let check = client.check_for_updates(&cancel).expect("check_for_updates");
        assert_eq!(check.targets.len(), 1);
        assert_eq!(check.targets[0].ecu_serial, "secondary-1");
        assert_eq!(check.targets[0].hardware_id, "test-hw");
        assert_eq!(check.targets[0].correlation_id.as_deref(), Some("campaign-1"));
    }

    #[test]
    fn check_for_updates_ignores_targets_for_unknown_ecus() {
        let dir = tempdir().expect("tempdir");
        seed_repo(dir.path(), "some-other-ecu");
        let mut client = build_client(dir.path());
        let cancel = CancellationToken::new();

        let check = client.check_for_updates(&cancel).expect("check_for_updates");
        assert!(check.targets.is_empty());
    }

    #[test]
    fn download_then_install_delivers_firmware_to_secondary() {
        let dir = tempdir().expect("tempdir");
        seed_repo(dir.path(), "secondary-1");
        let mut client = build_client(dir.path());
        let cancel = CancellationToken::new();

        let check = client.check_for_updates(&cancel).expect("check_for_updates");
        let dest = dir.path().join("downloads");
        client.download(&check.targets, &dest, &cancel).expect("download");
        assert!(dest.join("firmware.bin").exists());

        let outcomes = client.install(&check.targets, &dest, &check.trustchain, &cancel).expect("install");
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, "secondary-1");
        assert_eq!(outcomes[0].1.status, InstallStatus::Ok);
        assert_eq!(aggregate_install_status(&outcomes), InstallStatus::Ok);
    }

    #[test]
    fn send_manifest_reaches_fetcher_with_a_valid_signature() {
        let dir = tempdir().expect("tempdir");
        seed_repo(dir.path(), "secondary-1");
        let client = build_client(dir.path());
        let cancel = CancellationToken::new();

        client.send_manifest(None, &cancel).expect("send_manifest");
        assert_eq!(client.fetcher.sent_manifests.lock().unwrap().len(), 1);
    }
}
