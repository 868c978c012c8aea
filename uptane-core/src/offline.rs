use std::path::{Path, PathBuf};

/// Watches `<source>/metadata/` for the absence→presence edge that
/// triggers an offline (removable-media) update attempt. Holding the
/// last-observed presence lets `poll` fire only on the transition, never
/// on every tick while the directory stays mounted.
pub struct OfflineTrigger {
    source: Option<PathBuf>,
    was_present: bool,
}

impl OfflineTrigger {
    /// `source` is `None` when offline updates are disabled entirely (the
    /// cycle pushes its next-poll deadline to effectively infinity in
    /// that case rather than consulting this type at all).
    pub fn new(source: Option<PathBuf>) -> OfflineTrigger {
        OfflineTrigger { source, was_present: false }
    }

    fn metadata_dir(&self) -> Option<PathBuf> {
        self.source.as_ref().map(|s| s.join("metadata"))
    }

    /// Returns `true` exactly once per absence→presence transition. A
    /// directory that stays present across repeated calls only fires on
    /// the call where it first appeared.
    pub fn poll(&mut self) -> bool {
        let present = self.metadata_dir().map(|p| p.is_dir()).unwrap_or(false);
        let triggered = present && !self.was_present;
        self.was_present = present;
        triggered
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fires_once_on_absence_to_presence_transition() {
        let dir = tempdir().expect("tempdir");
        let mut trigger = OfflineTrigger::new(Some(dir.path().to_path_buf()));

        assert!(!trigger.poll(), "must not fire while absent");

        std::fs::create_dir(dir.path().join("metadata")).expect("create");
        assert!(trigger.poll(), "must fire on the transition");
        assert!(!trigger.poll(), "must not re-fire while still present");
    }

    #[test]
    fn disabled_trigger_never_fires() {
        let mut trigger = OfflineTrigger::new(None);
        assert!(!trigger.poll());
        assert!(!trigger.poll());
    }

    #[test]
    fn refires_after_disappearing_and_reappearing() {
        let dir = tempdir().expect("tempdir");
        let meta = dir.path().join("metadata");
        let mut trigger = OfflineTrigger::new(Some(dir.path().to_path_buf()));

        std::fs::create_dir(&meta).expect("create");
        assert!(trigger.poll());

        std::fs::remove_dir(&meta).expect("remove");
        assert!(!trigger.poll());

        std::fs::create_dir(&meta).expect("recreate");
        assert!(trigger.poll());
    }
}
