use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Which stage of an update attempt an `Event` was emitted from. Mirrors
/// the `UpdateCycle` states of one logical attempt, plus a few phases
/// (provisioning, manifest) that precede or follow the cycle's own state
/// names.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Provisioning,
    CheckingForUpdates,
    Downloading,
    InstallStarted,
    Installing,
    SendingManifest,
    OfflineCheck,
    OfflineFetch,
    OfflineInstall,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The outcome recorded alongside a `Phase`. Roughly the §7 error
/// taxonomy plus the terminal `Ok`/`Skipped` results a phase can reach
/// without anything having gone wrong.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResult {
    Ok,
    Skipped,
    NetworkError,
    MetadataInvalid,
    IntegrityError,
    BackendInstallFailed,
    OperationCancelled,
    NeedsCompletion,
    InternalError,
}

impl Display for EventResult {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A structured record of a phase boundary, emitted by `UptaneClient` and
/// `UpdateCycle` at every transition so that logging (and, eventually, a
/// forwarding gateway) has one uniform shape to consume. Today only
/// `log::info!`/`log::warn!` read these; the struct is kept serializable
/// because the teacher's own `datatype::Event` is always both `Display`
/// and `Serialize` even when only logged.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub phase: Phase,
    pub result: EventResult,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(phase: Phase, result: EventResult, message: impl Into<String>, now: DateTime<Utc>) -> Event {
        Event { phase, result, message: message.into(), timestamp: now }
    }

    /// Logs this event at a level derived from its result, then returns
    /// it. Call sites emit at the phase/cycle boundary, never deeper in
    /// the call stack.
    pub fn emit(self) -> Event {
        match self.result {
            EventResult::Ok | EventResult::Skipped => info!("{}", self),
            EventResult::OperationCancelled | EventResult::NeedsCompletion => warn!("{}", self),
            _ => error!("{}", self),
        }
        self
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "[{}] {} - {}: {}", self.timestamp.to_rfc3339(), self.phase, self.result, self.message)
    }
}

/// The aggregated outcome of one full `UpdateCycle` run, per §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    NoUpdates,
    UpdatesInstalled,
    UpdateFailed,
    RebootRequired,
    Cancelled,
}

impl Display for CycleResult {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_display_includes_phase_and_message() {
        let event = Event::new(Phase::Downloading, EventResult::Ok, "fetched 3 targets", Utc::now());
        let text = event.to_string();
        assert!(text.contains("Downloading"));
        assert!(text.contains("fetched 3 targets"));
    }
}
