use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::client::{aggregate_install_status, MetadataFetcher, UptaneClient};
use crate::datatype::Error;
use crate::events::{CycleResult, Event, EventResult, Phase};
use crate::lock::UpdateLock;
use crate::offline::OfflineTrigger;
use crate::pacman::{InstallOutcome, InstallStatus};
use crate::queue::{AlreadyPaused, Cancellable, CommandQueue};
use crate::secondary::TrustChain;

/// The §4.6 state set. `CheckingForUpdates`/`Downloading`/`Installing` and
/// their offline counterparts are entered and resolved within a single
/// `tick()` call — the cycle thread blocks on the queued operation's
/// future rather than yielding control back to its caller mid-state
/// (§5.1) — so an external observer sampling `state()` between ticks
/// never actually catches these names, only their resting states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Unprovisioned,
    SendingDeviceData,
    Idle,
    SendingManifest,
    CheckingForUpdates,
    Downloading,
    Installing,
    CheckingForUpdatesOffline,
    FetchingImagesOffline,
    InstallingOffline,
    AwaitReboot,
}

const OFFLINE_INTERRUPTIBLE: [CycleState; 7] = [
    CycleState::Unprovisioned,
    CycleState::SendingDeviceData,
    CycleState::Idle,
    CycleState::SendingManifest,
    CycleState::CheckingForUpdates,
    CycleState::Downloading,
    CycleState::Installing,
];

const SPIN_GUARD_LIMIT: u32 = 100;
const SPIN_GUARD_WINDOW: Duration = Duration::from_secs(10);

/// The per-task payload carried through `CommandQueue`. Each variant is
/// the terminal result of exactly one `UptaneClient` operation.
#[derive(Debug, Clone)]
enum CycleTask {
    Checked(Vec<crate::client::AssignedTarget>, TrustChain),
    Downloaded,
    Installed(Vec<(String, InstallOutcome)>),
    ManifestSent,
    Failed(String),
    Cancelled,
}

impl Cancellable for CycleTask {
    fn cancelled() -> CycleTask {
        CycleTask::Cancelled
    }
}

/// Tunables that would otherwise come from the `[uptane]` section of
/// `Config` (§6.1): polling cadence, the offline media mount point, and
/// the advisory lock file path.
pub struct CycleConfig {
    pub polling_interval: Duration,
    pub offline_poll_interval: Duration,
    pub offline_source: Option<PathBuf>,
    pub update_lock_path: PathBuf,
    pub downloads_dir: PathBuf,
    pub once: bool,
}

impl CycleConfig {
    pub fn new(downloads_dir: impl Into<PathBuf>, update_lock_path: impl Into<PathBuf>) -> CycleConfig {
        CycleConfig {
            polling_interval: Duration::from_secs(300),
            offline_poll_interval: Duration::from_secs(1),
            offline_source: None,
            update_lock_path: update_lock_path.into(),
            downloads_dir: downloads_dir.into(),
            once: false,
        }
    }
}

/// The long-running driver described in §4.6: it pumps the state machine,
/// enqueueing each state's work onto a `CommandQueue` and blocking the
/// cycle thread on the result, exactly as §5.1 describes ("long running
/// work delivered back as futures the cycle awaits").
pub struct UpdateCycle<F: MetadataFetcher + Send + 'static> {
    client: Arc<Mutex<UptaneClient<F>>>,
    queue: CommandQueue<CycleTask>,
    state: CycleState,
    offline: OfflineTrigger,
    config: CycleConfig,

    had_round_trip: bool,
    had_install: bool,
    had_failure: bool,

    next_online_poll: Instant,
    next_offline_poll: Instant,
    transition_count: u32,
    window_start: Instant,

    last_outcome: Option<InstallOutcome>,
    pending_targets: Vec<crate::client::AssignedTarget>,
    pending_trustchain: Option<TrustChain>,

    exit: Arc<(Mutex<bool>, Condvar)>,
}

impl<F: MetadataFetcher + Send + 'static> UpdateCycle<F> {
    pub fn new(client: UptaneClient<F>, config: CycleConfig) -> UpdateCycle<F> {
        let offline = OfflineTrigger::new(config.offline_source.clone());
        let now = Instant::now();
        UpdateCycle {
            client: Arc::new(Mutex::new(client)),
            queue: CommandQueue::start(),
            state: CycleState::Unprovisioned,
            offline,
            had_round_trip: false,
            had_install: false,
            had_failure: false,
            next_online_poll: now,
            next_offline_poll: now,
            transition_count: 0,
            window_start: now,
            last_outcome: None,
            pending_targets: Vec::new(),
            pending_trustchain: None,
            exit: Arc::new((Mutex::new(false), Condvar::new())),
            config,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Idempotent: a second call returns `AlreadyPaused`, matching
    /// `CommandQueue::pause`.
    pub fn pause(&self) -> Result<(), AlreadyPaused> {
        self.queue.pause()
    }

    pub fn resume(&self) {
        self.queue.resume()
    }

    /// Signals the shared cancellation token observed by the in-flight
    /// operation; does not itself change `state()` (§4.6 "Abort").
    pub fn abort(&self) {
        self.queue.abort()
    }

    /// Requests the drive loop in `run()` exit at its next wait point.
    pub fn stop(&self) {
        *self.exit.0.lock().expect("exit lock") = true;
        self.exit.1.notify_all();
    }

    fn should_stop(&self) -> bool {
        *self.exit.0.lock().expect("exit lock")
    }

    /// Drives the state machine until it reaches a terminal outcome:
    /// `AwaitReboot`, an externally requested `stop()`, or (in once-mode)
    /// `Idle` after at least one online round-trip.
    pub fn run(&mut self) -> CycleResult {
        loop {
            if self.should_stop() {
                return CycleResult::Cancelled;
            }
            if let Some(result) = self.tick() {
                return result;
            }
            if self.state == CycleState::Idle && Instant::now() < self.next_online_poll {
                let deadline = self.next_online_poll.min(self.next_offline_poll);
                self.wait_until(deadline);
            }
        }
    }

    fn wait_until(&self, deadline: Instant) {
        let (lock, cvar) = &*self.exit;
        let mut stopped = lock.lock().expect("exit lock");
        loop {
            if *stopped {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let step = (deadline - now).min(Duration::from_secs(1));
            let (guard, _timeout) = cvar.wait_timeout(stopped, step).expect("wait_timeout");
            stopped = guard;
        }
    }

    /// One drive-loop iteration: the spin-guard, the offline edge check,
    /// then the current state's own transition. Returns `Some` only on a
    /// terminal result.
    pub fn tick(&mut self) -> Option<CycleResult> {
        self.apply_spin_guard();

        let now = Instant::now();
        if self.next_offline_poll <= now && OFFLINE_INTERRUPTIBLE.contains(&self.state) {
            self.next_offline_poll = match self.offline.source() {
                Some(_) => now + self.config.offline_poll_interval,
                None => now + Duration::from_secs(365 * 24 * 3600),
            };
            if self.offline.poll() {
                self.queue.abort();
                self.state = CycleState::CheckingForUpdatesOffline;
                Event::new(Phase::OfflineCheck, EventResult::Ok, "offline media detected, preempting online work", Utc::now()).emit();
            }
        }

        match self.state {
            CycleState::Unprovisioned => {
                self.state = CycleState::SendingDeviceData;
                None
            }
            CycleState::SendingDeviceData => {
                Event::new(Phase::Provisioning, EventResult::Ok, "device data sent", Utc::now()).emit();
                self.state = CycleState::Idle;
                None
            }
            CycleState::Idle => self.tick_idle(now),
            CycleState::CheckingForUpdates => None,
            CycleState::Downloading => {
                self.tick_downloading();
                None
            }
            CycleState::Installing => {
                self.tick_installing();
                None
            }
            CycleState::SendingManifest => {
                self.tick_sending_manifest();
                None
            }
            CycleState::CheckingForUpdatesOffline => {
                self.tick_checking_offline();
                None
            }
            CycleState::FetchingImagesOffline => {
                self.tick_fetching_offline();
                None
            }
            CycleState::InstallingOffline => {
                self.tick_installing_offline();
                None
            }
            CycleState::AwaitReboot => Some(CycleResult::RebootRequired),
        }
    }

    fn apply_spin_guard(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= SPIN_GUARD_WINDOW {
            self.window_start = now;
            self.transition_count = 0;
        }
        self.transition_count += 1;
        if self.transition_count >= SPIN_GUARD_LIMIT {
            warn!("update cycle spinning: {} transitions in under {:?}, sleeping", self.transition_count, SPIN_GUARD_WINDOW);
            std::thread::sleep(SPIN_GUARD_WINDOW);
            self.window_start = Instant::now();
            self.transition_count = 0;
        }
    }

    fn tick_idle(&mut self, now: Instant) -> Option<CycleResult> {
        if self.config.once && self.had_round_trip {
            return Some(if self.had_failure {
                CycleResult::UpdateFailed
            } else if self.had_install {
                CycleResult::UpdatesInstalled
            } else {
                CycleResult::NoUpdates
            });
        }
        if now < self.next_online_poll {
            return None;
        }

        self.state = CycleState::CheckingForUpdates;
        let result = self.run_check_for_updates();
        self.next_online_poll = Instant::now() + self.config.polling_interval;
        self.had_round_trip = true;

        match result {
            Err(err) => {
                Event::new(Phase::CheckingForUpdates, EventResult::NetworkError, err.to_string(), Utc::now()).emit();
                self.had_failure = true;
                self.state = CycleState::SendingManifest;
            }
            Ok((targets, _)) if targets.is_empty() => {
                Event::new(Phase::CheckingForUpdates, EventResult::Ok, "no updates", Utc::now()).emit();
                self.state = CycleState::Idle;
            }
            Ok((targets, trustchain)) => {
                Event::new(Phase::CheckingForUpdates, EventResult::Ok, format!("{} target(s) assigned", targets.len()), Utc::now()).emit();
                self.pending_targets = targets;
                self.pending_trustchain = Some(trustchain);
                self.state = CycleState::Downloading;
            }
        }
        None
    }

    fn tick_downloading(&mut self) {
        match self.run_download() {
            Ok(()) => {
                Event::new(Phase::Downloading, EventResult::Ok, "download complete", Utc::now()).emit();
                self.state = CycleState::Installing;
            }
            Err(err) => {
                Event::new(Phase::Downloading, EventResult::NetworkError, err.to_string(), Utc::now()).emit();
                self.had_failure = true;
                self.last_outcome = Some(InstallOutcome::new(InstallStatus::DownloadFailed, err.to_string()));
                self.state = CycleState::SendingManifest;
            }
        }
    }

    fn tick_installing(&mut self) {
        match UpdateLock::try_acquire(&self.config.update_lock_path) {
            Ok(None) => {
                Event::new(Phase::Installing, EventResult::Skipped, "update lock held by another process", Utc::now()).emit();
                self.state = CycleState::Idle;
            }
            Err(err) => {
                Event::new(Phase::Installing, EventResult::InternalError, err.to_string(), Utc::now()).emit();
                self.had_failure = true;
                self.state = CycleState::SendingManifest;
            }
            Ok(Some(_lock)) => {
                Event::new(Phase::InstallStarted, EventResult::Ok, "install starting", Utc::now()).emit();
                match self.run_install() {
                    Err(err) => {
                        Event::new(Phase::Installing, EventResult::BackendInstallFailed, err.to_string(), Utc::now()).emit();
                        self.had_failure = true;
                        self.last_outcome = Some(InstallOutcome::failed(err.to_string()));
                        self.state = CycleState::SendingManifest;
                    }
                    Ok(outcomes) => {
                        let status = aggregate_install_status(&outcomes);
                        self.last_outcome = outcomes.into_iter().map(|(_, outcome)| outcome).last();
                        self.state = match status {
                            InstallStatus::NeedsCompletion => {
                                Event::new(Phase::Installing, EventResult::NeedsCompletion, "awaiting reboot", Utc::now()).emit();
                                CycleState::AwaitReboot
                            }
                            InstallStatus::Ok => {
                                Event::new(Phase::Installing, EventResult::Ok, "install complete", Utc::now()).emit();
                                self.had_install = true;
                                CycleState::SendingManifest
                            }
                            _ => {
                                Event::new(Phase::Installing, EventResult::BackendInstallFailed, "backend reported install failure", Utc::now()).emit();
                                self.had_failure = true;
                                CycleState::SendingManifest
                            }
                        };
                    }
                }
                // `_lock` drops here, releasing the advisory lock.
            }
        }
    }

    fn tick_sending_manifest(&mut self) {
        match self.run_send_manifest() {
            Ok(()) => Event::new(Phase::SendingManifest, EventResult::Ok, "manifest sent", Utc::now()).emit(),
            Err(err) => Event::new(Phase::SendingManifest, EventResult::NetworkError, err.to_string(), Utc::now()).emit(),
        };
        self.state = CycleState::Idle;
    }

    fn tick_checking_offline(&mut self) {
        match self.run_check_for_updates() {
            Ok((targets, _)) if targets.is_empty() => {
                Event::new(Phase::OfflineCheck, EventResult::Ok, "no offline updates", Utc::now()).emit();
                self.state = CycleState::Unprovisioned;
            }
            Ok((targets, trustchain)) => {
                Event::new(Phase::OfflineCheck, EventResult::Ok, format!("{} offline target(s)", targets.len()), Utc::now()).emit();
                self.pending_targets = targets;
                self.pending_trustchain = Some(trustchain);
                self.state = CycleState::FetchingImagesOffline;
            }
            Err(err) => {
                Event::new(Phase::OfflineCheck, EventResult::MetadataInvalid, err.to_string(), Utc::now()).emit();
                self.state = CycleState::Unprovisioned;
            }
        }
    }

    fn tick_fetching_offline(&mut self) {
        match self.run_download() {
            Ok(()) => {
                Event::new(Phase::OfflineFetch, EventResult::Ok, "offline download complete", Utc::now()).emit();
                self.state = CycleState::InstallingOffline;
            }
            Err(err) => {
                Event::new(Phase::OfflineFetch, EventResult::NetworkError, err.to_string(), Utc::now()).emit();
                self.state = CycleState::Unprovisioned;
            }
        }
    }

    fn tick_installing_offline(&mut self) {
        match UpdateLock::try_acquire(&self.config.update_lock_path) {
            Ok(None) => {
                Event::new(Phase::OfflineInstall, EventResult::Skipped, "update lock held by another process", Utc::now()).emit();
                self.state = CycleState::Unprovisioned;
            }
            Err(err) => {
                Event::new(Phase::OfflineInstall, EventResult::InternalError, err.to_string(), Utc::now()).emit();
                self.state = CycleState::Unprovisioned;
            }
            Ok(Some(_lock)) => match self.run_install() {
                Ok(outcomes) => {
                    let status = aggregate_install_status(&outcomes);
                    self.last_outcome = outcomes.into_iter().map(|(_, o)| o).last();
                    self.state = if status == InstallStatus::NeedsCompletion {
                        Event::new(Phase::OfflineInstall, EventResult::NeedsCompletion, "awaiting reboot", Utc::now()).emit();
                        CycleState::AwaitReboot
                    } else {
                        Event::new(Phase::OfflineInstall, EventResult::Ok, "offline install complete", Utc::now()).emit();
                        CycleState::Unprovisioned
                    };
                }
                Err(err) => {
                    Event::new(Phase::OfflineInstall, EventResult::BackendInstallFailed, err.to_string(), Utc::now()).emit();
                    self.state = CycleState::Unprovisioned;
                }
            },
        }
    }

    fn run_check_for_updates(&self) -> Result<(Vec<crate::client::AssignedTarget>, TrustChain), Error> {
        let client = self.client.clone();
        let handle = self
            .queue
            .enqueue(move |cancel| async move {
                let mut guard = client.lock().expect("client lock");
                match guard.check_for_updates(&cancel) {
                    Ok(check) => CycleTask::Checked(check.targets, check.trustchain),
                    Err(err) => CycleTask::Failed(err.to_string()),
                }
            })
            .map_err(|_| Error::Queue("command queue closed".into()))?;

        match handle.join_blocking() {
            Some(CycleTask::Checked(targets, chain)) => Ok((targets, chain)),
            Some(CycleTask::Failed(msg)) => Err(Error::Internal(msg)),
            _ => Err(Error::Internal("check_for_updates cancelled".into())),
        }
    }

    fn run_download(&self) -> Result<(), Error> {
        let client = self.client.clone();
        let targets = self.pending_targets.clone();
        let dest = self.config.downloads_dir.clone();
        let handle = self
            .queue
            .enqueue(move |cancel| async move {
                let guard = client.lock().expect("client lock");
                match guard.download(&targets, &dest, &cancel) {
                    Ok(()) => CycleTask::Downloaded,
                    Err(err) => CycleTask::Failed(err.to_string()),
                }
            })
            .map_err(|_| Error::Queue("command queue closed".into()))?;

        match handle.join_blocking() {
            Some(CycleTask::Downloaded) => Ok(()),
            Some(CycleTask::Failed(msg)) => Err(Error::Internal(msg)),
            _ => Err(Error::Internal("download cancelled".into())),
        }
    }

    fn run_install(&self) -> Result<Vec<(String, InstallOutcome)>, Error> {
        let client = self.client.clone();
        let targets = self.pending_targets.clone();
        let dest = self.config.downloads_dir.clone();
        let trustchain = self.pending_trustchain.clone().unwrap_or(TrustChain { director_root: String::new(), director_targets: String::new() });
        let handle = self
            .queue
            .enqueue(move |cancel| async move {
                let guard = client.lock().expect("client lock");
                match guard.install(&targets, &dest, &trustchain, &cancel) {
                    Ok(outcomes) => CycleTask::Installed(outcomes),
                    Err(err) => CycleTask::Failed(err.to_string()),
                }
            })
            .map_err(|_| Error::Queue("command queue closed".into()))?;

        match handle.join_blocking() {
            Some(CycleTask::Installed(outcomes)) => Ok(outcomes),
            Some(CycleTask::Failed(msg)) => Err(Error::Internal(msg)),
            _ => Err(Error::Internal("install cancelled".into())),
        }
    }

    fn run_send_manifest(&self) -> Result<(), Error> {
        let client = self.client.clone();
        let last_outcome = self.last_outcome.clone();
        let handle = self
            .queue
            .enqueue(move |cancel| async move {
                let guard = client.lock().expect("client lock");
                match guard.send_manifest(last_outcome.as_ref(), &cancel) {
                    Ok(()) => CycleTask::ManifestSent,
                    Err(err) => CycleTask::Failed(err.to_string()),
                }
            })
            .map_err(|_| Error::Queue("command queue closed".into()))?;

        match handle.join_blocking() {
            Some(CycleTask::ManifestSent) => Ok(()),
            Some(CycleTask::Failed(msg)) => Err(Error::Internal(msg)),
            _ => Err(Error::Internal("send_manifest cancelled".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MetadataFetcher;
    use crate::crypto::PrivateKey;
    use crate::datatype::tuf::SignedMetadata;
    use crate::datatype::{EcuManifest, KeyKind, RepositoryType, RoleName, Target};
    use crate::pacman::FakePackageManager;
    use crate::repo_builder::RepoBuilder;
    use crate::secondary::LocalSecondary;
    use crate::verifier::{MetadataVerifier, TrustRoot};
    use std::path::Path;
    use tempfile::tempdir;
    use tokio_util::sync::CancellationToken;

    struct FixtureFetcher {
        base: PathBuf,
    }

    impl MetadataFetcher for FixtureFetcher {
        fn fetch_root(&self, repo: RepositoryType, version: u64, _cancel: &CancellationToken) -> Result<SignedMetadata, Error> {
            let path = self.base.join("repo").join(repo.to_string()).join(format!("{}.root.json", version));
            let text = std::fs::read_to_string(path).map_err(|_| Error::Internal("no such root version".into()))?;
            Ok(serde_json::from_str(&text)?)
        }

        fn fetch_role(&self, repo: RepositoryType, role: RoleName, _cancel: &CancellationToken) -> Result<SignedMetadata, Error> {
            let path = self.base.join("repo").join(repo.to_string()).join(format!("{}.json", role));
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }

        fn download_target(&self, target: &Target, dest: &Path, _cancel: &CancellationToken) -> Result<(), Error> {
            let source = self.base.join("repo").join(RepositoryType::Image.to_string()).join(&target.filepath);
            std::fs::copy(&source, dest)?;
            Ok(())
        }

        fn send_manifest(&self, _manifest: &EcuManifest, _cancel: &CancellationToken) -> Result<(), Error> {
            Ok(())
        }
    }

    fn trust_root_for(dir: &Path, repo: RepositoryType) -> TrustRoot {
        let text = std::fs::read_to_string(dir.join("repo").join(repo.to_string()).join("root.json")).expect("read root");
        let envelope: SignedMetadata = serde_json::from_str(&text).expect("parse root");
        TrustRoot::from_root(&envelope.signed).expect("trust root")
    }

    fn seed_repo_for_primary(dir: &Path) {
        let builder = RepoBuilder::new(dir);
        builder.generate(KeyKind::Ed25519, None).expect("generate");

        let file = dir.join("firmware-source");
        std::fs::write(&file, b"firmware-bytes").expect("write fixture");
        builder.add_image(&file, "firmware.bin", "http://example/firmware.bin").expect("add_image");
        builder.add_target("firmware.bin", "test-hw", "primary-1", None).expect("add_target");
        builder.sign_targets().expect("sign_targets");
    }

    fn build_cycle(dir: &Path, pacman: FakePackageManager, once: bool) -> UpdateCycle<FixtureFetcher> {
        let director_verifier = MetadataVerifier::new(trust_root_for(dir, RepositoryType::Director));
        let image_verifier = MetadataVerifier::new(trust_root_for(dir, RepositoryType::Image));
        let secondary = LocalSecondary::new("secondary-1", FakePackageManager::new());

        let client = UptaneClient::new(
            FixtureFetcher { base: dir.to_path_buf() },
            Box::new(pacman),
            vec![Box::new(secondary)],
            director_verifier,
            image_verifier,
            "primary-1",
            "test-hw",
            PrivateKey::generate(KeyKind::Ed25519).expect("device key"),
        );

        let mut config = CycleConfig::new(dir.join("downloads"), dir.join("update.lock"));
        config.once = once;
        config.offline_poll_interval = Duration::from_millis(1);
        UpdateCycle::new(client, config)
    }

    #[test]
    fn once_mode_with_no_updates_reaches_no_updates() {
        let dir = tempdir().expect("tempdir");
        RepoBuilder::new(dir.path()).generate(KeyKind::Ed25519, None).expect("generate");
        let mut cycle = build_cycle(dir.path(), FakePackageManager::new(), true);
        assert_eq!(cycle.run(), CycleResult::NoUpdates);
    }

    #[test]
    fn full_cycle_installs_assigned_primary_target() {
        let dir = tempdir().expect("tempdir");
        seed_repo_for_primary(dir.path());
        let mut cycle = build_cycle(dir.path(), FakePackageManager::new(), true);
        assert_eq!(cycle.run(), CycleResult::UpdatesInstalled);
    }

    #[test]
    fn reboot_required_backend_ends_in_await_reboot() {
        let dir = tempdir().expect("tempdir");
        seed_repo_for_primary(dir.path());
        let mut cycle = build_cycle(dir.path(), FakePackageManager::new().with_reboot_required(), true);
        assert_eq!(cycle.run(), CycleResult::RebootRequired);
        assert_eq!(cycle.state(), CycleState::AwaitReboot);
    }

    #[test]
    fn held_update_lock_skips_install_and_leaves_current_untouched() {
        let dir = tempdir().expect("tempdir");
        seed_repo_for_primary(dir.path());
        let lock_path = dir.path().join("update.lock");
        let _held = UpdateLock::try_acquire(&lock_path).expect("acquire").expect("should succeed");

        let mut cycle = {
            let director_verifier = MetadataVerifier::new(trust_root_for(dir.path(), RepositoryType::Director));
            let image_verifier = MetadataVerifier::new(trust_root_for(dir.path(), RepositoryType::Image));
            let secondary = LocalSecondary::new("secondary-1", FakePackageManager::new());
            let client = UptaneClient::new(
                FixtureFetcher { base: dir.path().to_path_buf() },
                Box::new(FakePackageManager::new()),
                vec![Box::new(secondary)],
                director_verifier,
                image_verifier,
                "primary-1",
                "test-hw",
                PrivateKey::generate(KeyKind::Ed25519).expect("device key"),
            );
            let mut cfg = CycleConfig::new(dir.path().join("downloads"), &lock_path);
            cfg.once = true;
            UpdateCycle::new(client, cfg)
        };

        assert_eq!(cycle.run(), CycleResult::NoUpdates);
        assert!(!cycle.had_install);
    }

    #[test]
    fn offline_edge_trigger_drives_an_offline_install_to_completion() {
        let dir = tempdir().expect("tempdir");
        seed_repo_for_primary(dir.path());
        let mut cycle = build_cycle(dir.path(), FakePackageManager::new(), false);
        cycle.config.offline_source = Some(dir.path().join("media"));
        cycle.offline = OfflineTrigger::new(cycle.config.offline_source.clone());

        assert_eq!(cycle.tick(), None); // Unprovisioned -> SendingDeviceData
        assert_eq!(cycle.tick(), None); // SendingDeviceData -> Idle
        assert_eq!(cycle.state(), CycleState::Idle);

        std::fs::create_dir_all(dir.path().join("media").join("metadata")).expect("mount offline media");

        assert_eq!(cycle.tick(), None); // Idle -> CheckingForUpdatesOffline (edge fires)
        assert_eq!(cycle.state(), CycleState::CheckingForUpdatesOffline);

        assert_eq!(cycle.tick(), None); // -> FetchingImagesOffline
        assert_eq!(cycle.state(), CycleState::FetchingImagesOffline);

        assert_eq!(cycle.tick(), None); // -> InstallingOffline
        assert_eq!(cycle.state(), CycleState::InstallingOffline);

        assert_eq!(cycle.tick(), None); // -> Unprovisioned (no reboot required)
        assert_eq!(cycle.state(), CycleState::Unprovisioned);
    }
}
