use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::datatype::Error;

/// Identity and filesystem layout for this device.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    pub keys_path: PathBuf,
    /// Names the `PackageManager` backend to bind at startup. This crate
    /// ships only `"fake"` (`pacman::FakePackageManager`); a real build
    /// would extend this match with its OSTree/Docker/etc bindings, which
    /// are external collaborators (§1 Non-goals).
    pub package_manager: String,
}

impl Default for DeviceConfig {
    fn default() -> DeviceConfig {
        DeviceConfig {
            id: "unprovisioned".into(),
            keys_path: PathBuf::from("/var/sota/keys"),
            package_manager: "fake".into(),
        }
    }
}

/// Uptane-specific polling, repository and secondary-update settings
/// (§6.1).
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UptaneConfig {
    pub director_server: Url,
    pub repo_server: Url,
    pub metadata_path: PathBuf,
    pub primary_ecu_serial: String,
    pub primary_hardware_id: String,
    pub polling_interval_sec: u64,
    /// Once-mode: stop after the first successful online round-trip
    /// rather than looping (§4.6 "Once mode").
    pub send_device_data_once: bool,
    /// Removable-media mount point watched for the offline edge trigger
    /// (§6 "Offline media trigger"). `None` disables offline updates.
    pub offline_source: Option<PathBuf>,
    /// Advisory lock path gating entry to `Installing` (§5 "Shared
    /// resources").
    pub update_lock_file: PathBuf,
}

impl UptaneConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_sec)
    }
}

impl Default for UptaneConfig {
    fn default() -> UptaneConfig {
        UptaneConfig {
            director_server: Url::parse("https://director.example.com").expect("static url"),
            repo_server: Url::parse("https://repo.example.com").expect("static url"),
            metadata_path: PathBuf::from("/var/sota/metadata"),
            primary_ecu_serial: "primary".into(),
            primary_hardware_id: "primary-hw".into(),
            polling_interval_sec: 300,
            send_device_data_once: false,
            offline_source: None,
            update_lock_file: PathBuf::from("/var/lock/sota-update.lock"),
        }
    }
}

/// Scratch-space settings for the update cycle's own bookkeeping, kept
/// separate from `UptaneConfig` the way the teacher keeps `[pacman]`
/// distinct from `[uptane]`.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct RepoConfig {
    pub downloads_path: PathBuf,
}

/// Top-level configuration, loaded from a TOML file and layered with
/// defaults for any section or field left unspecified, exactly as the
/// teacher's `ParsedXConfig::defaultify()` guarantees.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub uptane: UptaneConfig,
    pub device: DeviceConfig,
    pub repo: RepoConfig,
}

impl Config {
    /// Reads and parses a TOML config file, defaulting any missing
    /// section or field rather than failing.
    pub fn load(path: &Path) -> Result<Config, Error> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str("").expect("empty config parses");
        assert_eq!(config.device.id, "unprovisioned");
        assert_eq!(config.uptane.polling_interval_sec, 300);
    }

    #[test]
    fn partial_section_keeps_other_fields_default() {
        let toml = r#"
            [uptane]
            primary_ecu_serial = "ecu-7"
        "#;
        let config: Config = toml::from_str(toml).expect("parses");
        assert_eq!(config.uptane.primary_ecu_serial, "ecu-7");
        assert_eq!(config.uptane.polling_interval_sec, 300);
    }

    #[test]
    fn server_urls_parse_from_strings() {
        let toml = r#"
            [uptane]
            director_server = "https://director.internal:8083"
        "#;
        let config: Config = toml::from_str(toml).expect("parses");
        assert_eq!(config.uptane.director_server.host_str(), Some("director.internal"));
    }
}
