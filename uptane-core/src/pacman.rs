use std::collections::HashMap;
use std::sync::Mutex;

use crate::datatype::{Error, Target};

/// The result code a `PackageManager` returns from `install`/`finalize_install`,
/// per §4.4. `NeedsCompletion` is the signal `UpdateCycle` watches for to
/// move to `AwaitReboot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    Ok,
    NeedsCompletion,
    DownloadFailed,
    InstallFailed,
    InternalError,
    OperationCancelled,
}

/// A backend's response to an install/finalize call: a result code plus a
/// human-readable message, folded into a manifest `OperationResult` by
/// the caller.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub status: InstallStatus,
    pub message: String,
}

impl InstallOutcome {
    pub fn new(status: InstallStatus, message: impl Into<String>) -> InstallOutcome {
        InstallOutcome { status, message: message.into() }
    }

    pub fn ok(message: impl Into<String>) -> InstallOutcome {
        InstallOutcome::new(InstallStatus::Ok, message)
    }

    pub fn needs_completion(message: impl Into<String>) -> InstallOutcome {
        InstallOutcome::new(InstallStatus::NeedsCompletion, message)
    }

    pub fn failed(message: impl Into<String>) -> InstallOutcome {
        InstallOutcome::new(InstallStatus::InstallFailed, message)
    }
}

/// A previously-reported package, as returned by `get_installed_packages`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

/// The installation dispatcher contract every backend implements, per
/// §4.4. Modeled as a small capability trait (§9's "dynamic dispatch"
/// design note) rather than the teacher's closed `PackageManager` enum,
/// so a backend is a plain value behind `Box<dyn PackageManager>` instead
/// of a new match arm threaded through every call site.
///
/// `get_current` returns `None` in place of the spec's `Unknown` sentinel
/// target — there being no currently-installed version is exactly the
/// `Option::None` case, and a sentinel `Target` would have to carry
/// meaningless hashes and length just to exist.
pub trait PackageManager: Send {
    fn name(&self) -> &str;

    fn get_installed_packages(&self) -> Result<Vec<InstalledPackage>, Error>;

    fn get_current(&self) -> Option<Target>;

    /// Installs `target`, either completing synchronously (`Ok`) or
    /// requiring a reboot/host completion (`NeedsCompletion`). Must
    /// leave the previously running version serviceable on any failure
    /// path (§4.4 atomicity expectations).
    fn install(&self, target: &Target) -> InstallOutcome;

    /// Called after reboot to complete a `NeedsCompletion` install.
    /// Rejects if no `Pending` version matches `target`.
    fn finalize_install(&self, target: &Target) -> InstallOutcome;

    /// Queried by secondaries that need to know whether the primary has
    /// an update staged for synchronized installation.
    fn pending_primary_update(&self) -> Option<Target> {
        None
    }

    /// Queried after reboot to detect a bootloader-triggered rollback of
    /// a pending install.
    fn check_rollback(&self) -> Option<Target> {
        None
    }

    /// Cleans up after a detected rollback: the pending version reverts
    /// to `None` and whatever the backend needs to restart resumes.
    fn rollback_pending_install(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetStatus {
    Current,
    Pending,
    None,
}

struct FakeState {
    installed: HashMap<String, TargetStatus>,
    current: Option<Target>,
    pending: Option<Target>,
    fail_install: bool,
    fail_finalize: bool,
    needs_reboot: bool,
    bootloader_rollback: bool,
}

/// An in-memory reference backend for tests and demos, grounded on the
/// teacher's `PackageManagerFake`: it tracks a "currently running" target
/// and, while a reboot is pending, a staged one, and can be configured to
/// fail at install or finalize to exercise the rollback paths without
/// touching the filesystem.
pub struct FakePackageManager {
    state: Mutex<FakeState>,
}

impl FakePackageManager {
    pub fn new() -> FakePackageManager {
        FakePackageManager {
            state: Mutex::new(FakeState {
                installed: HashMap::new(),
                current: None,
                pending: None,
                fail_install: false,
                fail_finalize: false,
                needs_reboot: false,
                bootloader_rollback: false,
            }),
        }
    }

    /// Configures subsequent `install` calls to return `NeedsCompletion`
    /// instead of completing synchronously, simulating a backend that
    /// requires a reboot (e.g. an OSTree deployment switch).
    pub fn with_reboot_required(self) -> FakePackageManager {
        self.state.lock().expect("lock").needs_reboot = true;
        self
    }

    pub fn fail_next_install(&self) {
        self.state.lock().expect("lock").fail_install = true;
    }

    pub fn fail_next_finalize(&self) {
        self.state.lock().expect("lock").fail_finalize = true;
    }

    /// Simulates the bootloader having rolled back a pending OS update on
    /// reboot, the scenario `DockerComposeSecondary::checkRollback` guards
    /// against on the secondary side: the next `finalize_install` fails
    /// instead of completing, and `check_rollback` reports the stranded
    /// pending target so the caller can run `rollback_pending_install`.
    pub fn trigger_bootloader_rollback(&self) {
        self.state.lock().expect("lock").bootloader_rollback = true;
    }
}

impl Default for FakePackageManager {
    fn default() -> FakePackageManager {
        FakePackageManager::new()
    }
}

impl PackageManager for FakePackageManager {
    fn name(&self) -> &str {
        "fake"
    }

    fn get_installed_packages(&self) -> Result<Vec<InstalledPackage>, Error> {
        let state = self.state.lock().expect("lock");
        Ok(state
            .installed
            .keys()
            .map(|name| InstalledPackage { name: name.clone(), version: "1.0".into() })
            .collect())
    }

    fn get_current(&self) -> Option<Target> {
        self.state.lock().expect("lock").current.clone()
    }

    fn install(&self, target: &Target) -> InstallOutcome {
        let mut state = self.state.lock().expect("lock");
        if state.fail_install {
            state.fail_install = false;
            return InstallOutcome::failed("fake backend configured to fail install");
        }

        if state.needs_reboot {
            state.pending = Some(target.clone());
            state.installed.insert(target.filepath.clone(), TargetStatus::Pending);
            return InstallOutcome::needs_completion("staged, awaiting reboot");
        }

        state.current = Some(target.clone());
        state.installed.insert(target.filepath.clone(), TargetStatus::Current);
        InstallOutcome::ok("installed")
    }

    fn finalize_install(&self, target: &Target) -> InstallOutcome {
        let mut state = self.state.lock().expect("lock");
        if state.fail_finalize {
            state.fail_finalize = false;
            return InstallOutcome::new(InstallStatus::InternalError, "fake backend configured to fail finalize");
        }

        if state.bootloader_rollback {
            return InstallOutcome::failed("bootloader rolled back OS update");
        }

        match state.pending.clone() {
            Some(pending) if pending.filepath == target.filepath => {
                state.current = Some(pending);
                state.pending = None;
                state.installed.insert(target.filepath.clone(), TargetStatus::Current);
                InstallOutcome::ok("finalized")
            }
            Some(_) | None => InstallOutcome::new(InstallStatus::InternalError, "no pending update matches target"),
        }
    }

    fn pending_primary_update(&self) -> Option<Target> {
        self.state.lock().expect("lock").pending.clone()
    }

    fn check_rollback(&self) -> Option<Target> {
        let state = self.state.lock().expect("lock");
        if state.bootloader_rollback {
            state.pending.clone()
        } else {
            None
        }
    }

    /// Tidies up after a detected rollback: drops the stranded pending
    /// version and clears the rollback indicator, leaving `current` as the
    /// version the bootloader actually booted back into (mirroring
    /// `DockerComposeSecondary::rollbackPendingInstall`, which restarts the
    /// prior workload rather than the one that failed to take).
    fn rollback_pending_install(&self) -> Result<(), Error> {
        let mut state = self.state.lock().expect("lock");
        if let Some(pending) = state.pending.take() {
            state.installed.insert(pending.filepath, TargetStatus::None);
        }
        state.bootloader_rollback = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn target(name: &str) -> Target {
        Target {
            filepath: name.to_string(),
            length: 4,
            hashes: Map::new(),
            custom: crate::datatype::TargetCustom {
                ecu_identifier: "primary".into(),
                uri: format!("http://example/{}", name),
                release_counter: None,
            },
        }
    }

    #[test]
    fn fresh_backend_has_no_current_version() {
        let pacman = FakePackageManager::new();
        assert!(pacman.get_current().is_none());
    }

    #[test]
    fn install_without_reboot_flag_completes_synchronously() {
        let pacman = FakePackageManager::new();
        let outcome = pacman.install(&target("firmware.bin"));
        assert_eq!(outcome.status, InstallStatus::Ok);
        assert_eq!(pacman.get_current().unwrap().filepath, "firmware.bin");
    }

    #[test]
    fn install_with_reboot_flag_needs_completion_then_finalizes() {
        let pacman = FakePackageManager::new().with_reboot_required();
        let t = target("firmware.bin");

        let outcome = pacman.install(&t);
        assert_eq!(outcome.status, InstallStatus::NeedsCompletion);
        assert!(pacman.get_current().is_none());
        assert_eq!(pacman.pending_primary_update().unwrap().filepath, "firmware.bin");

        let finalized = pacman.finalize_install(&t);
        assert_eq!(finalized.status, InstallStatus::Ok);
        assert_eq!(pacman.get_current().unwrap().filepath, "firmware.bin");
        assert!(pacman.pending_primary_update().is_none());
    }

    #[test]
    fn finalize_rejects_mismatched_target() {
        let pacman = FakePackageManager::new().with_reboot_required();
        pacman.install(&target("firmware.bin"));
        let outcome = pacman.finalize_install(&target("other.bin"));
        assert_eq!(outcome.status, InstallStatus::InternalError);
    }

    #[test]
    fn rollback_clears_pending_without_promoting_it() {
        let pacman = FakePackageManager::new().with_reboot_required();
        pacman.install(&target("firmware.bin"));
        pacman.rollback_pending_install().expect("rollback");
        assert!(pacman.pending_primary_update().is_none());
        assert!(pacman.get_current().is_none());
    }

    #[test]
    fn configured_failure_surfaces_install_failed_and_leaves_current_untouched() {
        let pacman = FakePackageManager::new();
        pacman.install(&target("v1.bin"));
        pacman.fail_next_install();
        let outcome = pacman.install(&target("v2.bin"));
        assert_eq!(outcome.status, InstallStatus::InstallFailed);
        assert_eq!(pacman.get_current().unwrap().filepath, "v1.bin");
    }

    #[test]
    fn bootloader_rollback_fails_finalize_and_rollback_clears_the_stranded_pending() {
        let pacman = FakePackageManager::new().with_reboot_required();
        let t = target("v2.bin");
        pacman.install(&t);
        assert_eq!(pacman.pending_primary_update().unwrap().filepath, "v2.bin");

        pacman.trigger_bootloader_rollback();
        assert_eq!(pacman.check_rollback().unwrap().filepath, "v2.bin");

        let outcome = pacman.finalize_install(&t);
        assert_eq!(outcome.status, InstallStatus::InstallFailed);
        assert_eq!(outcome.message, "bootloader rolled back OS update");

        pacman.rollback_pending_install().expect("rollback_pending_install");
        assert!(pacman.pending_primary_update().is_none());
        assert!(pacman.check_rollback().is_none());
    }
}
