use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::datatype::{Error, Target};
use crate::pacman::{InstallOutcome, PackageManager};

/// A chain of Director trust material (Root + Targets, typically) shipped
/// to a secondary ahead of firmware so it can verify independently before
/// accepting an install.
#[derive(Debug, Clone)]
pub struct TrustChain {
    pub director_root: String,
    pub director_targets: String,
}

/// What kind of payload is being sent with `send_firmware`, mirroring the
/// Director Targets `custom.updateType` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateType {
    Full,
    Delta,
}

/// The ECU-facing manifest a secondary reports back: its currently
/// installed target plus the outcome of its last operation, if any.
#[derive(Debug, Clone)]
pub struct SecondaryManifest {
    pub ecu_serial: String,
    pub installed: Option<Target>,
    pub last_outcome: Option<InstallOutcome>,
}

/// The per-ECU contract a subordinate transport implements, per §4.5.
/// `send_firmware` is the one long-running, cancellable step; the rest
/// complete quickly enough not to need a token. Sequencing
/// (`put_metadata` → `send_firmware` → `install` → `get_manifest`) is
/// enforced by the caller (`UptaneClient`), not by this trait — no new
/// wire protocol or three-phase commit bus is in scope (§1 Non-goals),
/// so the teacher's UDP multicast `Primary`/`Secondary` state machine
/// survives here only as this call ordering.
pub trait SecondaryTransport: Send {
    fn ecu_serial(&self) -> &str;

    fn put_metadata(&self, trustchain: &TrustChain) -> Result<(), Error>;

    fn send_firmware(&self, target: &Target, update_type: UpdateType, cancel: &CancellationToken) -> Result<(), Error>;

    fn install(&self, target: &Target) -> InstallOutcome;

    fn get_manifest(&self) -> Result<SecondaryManifest, Error>;

    fn complete_pending_install(&self, target: &Target) -> InstallOutcome;
}

/// An in-process secondary for tests, grounded on the teacher's
/// `atomic::Secondary` role but reinterpreted against this spec's
/// synchronous trait shape: it delegates installation to an in-memory
/// `PackageManager` rather than speaking the teacher's TCP `Step`
/// protocol.
pub struct LocalSecondary<P: PackageManager> {
    ecu_serial: String,
    pacman: P,
    received_trustchain: Mutex<Option<TrustChain>>,
    received_firmware: Mutex<Option<String>>,
}

impl<P: PackageManager> LocalSecondary<P> {
    pub fn new(ecu_serial: impl Into<String>, pacman: P) -> LocalSecondary<P> {
        LocalSecondary {
            ecu_serial: ecu_serial.into(),
            pacman,
            received_trustchain: Mutex::new(None),
            received_firmware: Mutex::new(None),
        }
    }
}

impl<P: PackageManager> SecondaryTransport for LocalSecondary<P> {
    fn ecu_serial(&self) -> &str {
        &self.ecu_serial
    }

    fn put_metadata(&self, trustchain: &TrustChain) -> Result<(), Error> {
        *self.received_trustchain.lock().expect("lock") = Some(trustchain.clone());
        Ok(())
    }

    fn send_firmware(&self, target: &Target, _update_type: UpdateType, cancel: &CancellationToken) -> Result<(), Error> {
        if cancel.is_cancelled() {
            return Err(Error::Secondary("send_firmware cancelled".into()));
        }
        *self.received_firmware.lock().expect("lock") = Some(target.filepath.clone());
        Ok(())
    }

    fn install(&self, target: &Target) -> InstallOutcome {
        self.pacman.install(target)
    }

    fn get_manifest(&self) -> Result<SecondaryManifest, Error> {
        Ok(SecondaryManifest { ecu_serial: self.ecu_serial.clone(), installed: self.pacman.get_current(), last_outcome: None })
    }

    fn complete_pending_install(&self, target: &Target) -> InstallOutcome {
        self.pacman.finalize_install(target)
    }
}
