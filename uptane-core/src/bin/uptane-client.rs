//! The primary daemon entry point: loads `Config`, wires a `MetadataFetcher`
//! and `PackageManager` backend into an `UptaneClient`, and drives the
//! resulting `UpdateCycle` until it reaches a terminal outcome. Networked
//! transport, OS signal handling and OSTree/Docker-style package backends
//! are external collaborators (§1 Non-goals); this binary only ever binds
//! the concrete backends this crate ships (`LocalRepoFetcher`,
//! `FakePackageManager`) for offline-media and reference-install use.

#[macro_use]
extern crate log;

use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;

use uptane::client::UptaneClient;
use uptane::crypto::PrivateKey;
use uptane::cycle::{CycleConfig, UpdateCycle};
use uptane::datatype::{Config, Error, KeyKind, RepositoryType, Util};
use uptane::events::CycleResult;
use uptane::fetcher::LocalRepoFetcher;
use uptane::pacman::FakePackageManager;
use uptane::verifier::{MetadataVerifier, TrustRoot};

fn main() {
    start_logging();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("UPTANE_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/sota/uptane.toml"));

    if let Err(err) = run(&config_path) {
        eprintln!("ERROR: {}", err);
        process::exit(1);
    }
}

fn run(config_path: &std::path::Path) -> Result<(), Error> {
    let config = Config::load(config_path)?;
    info!("loaded configuration from {}", config_path.display());

    let device_key = load_or_generate_device_key(&config)?;

    let fetcher = LocalRepoFetcher::new(&config.uptane.metadata_path);
    let cancel = CancellationToken::new();
    let director_verifier = build_verifier(&fetcher, RepositoryType::Director, &cancel)?;
    let image_verifier = build_verifier(&fetcher, RepositoryType::Image, &cancel)?;

    let pacman: Box<dyn uptane::pacman::PackageManager> = match config.device.package_manager.as_str() {
        "fake" => Box::new(FakePackageManager::new()),
        other => {
            warn!("unknown package_manager '{}', falling back to 'fake'", other);
            Box::new(FakePackageManager::new())
        }
    };

    let client = UptaneClient::new(
        fetcher,
        pacman,
        Vec::new(),
        director_verifier,
        image_verifier,
        config.uptane.primary_ecu_serial.clone(),
        config.uptane.primary_hardware_id.clone(),
        device_key,
    );

    let mut cycle_config = CycleConfig::new(&config.repo.downloads_path, &config.uptane.update_lock_file);
    cycle_config.polling_interval = config.uptane.polling_interval();
    cycle_config.offline_source = config.uptane.offline_source.clone();
    cycle_config.once = config.uptane.send_device_data_once;

    let mut cycle = UpdateCycle::new(client, cycle_config);
    let result = cycle.run();
    info!("update cycle finished: {}", result);

    match result {
        CycleResult::UpdateFailed => Err(Error::Internal("update cycle ended in failure".into())),
        _ => Ok(()),
    }
}

/// Bootstraps trust from the locally-mirrored `1.root.json`; a device's
/// very first boot ships this file pre-provisioned alongside its keys.
fn build_verifier(fetcher: &LocalRepoFetcher, repo: RepositoryType, cancel: &CancellationToken) -> Result<MetadataVerifier, Error> {
    use uptane::client::MetadataFetcher;
    let root = fetcher.fetch_root(repo, 1, cancel)?;
    let trust_root = TrustRoot::from_root(&root.signed)?;
    Ok(MetadataVerifier::new(trust_root))
}

/// Loads the device's manifest-signing key from `device.keys_path`,
/// generating an Ed25519 keypair on first boot.
fn load_or_generate_device_key(config: &Config) -> Result<PrivateKey, Error> {
    let private_path = config.device.keys_path.join("device.private.key");
    let type_path = config.device.keys_path.join("device.key_type");

    if private_path.exists() {
        let kind: KeyKind = Util::read_text(&type_path)?.trim().parse()?;
        let bytes = Util::read_file(&private_path)?;
        return PrivateKey::from_bytes(kind, &bytes);
    }

    info!("no device key found at {}, provisioning one", private_path.display());
    let key = PrivateKey::generate(KeyKind::Ed25519)?;
    Util::write_file(&type_path, KeyKind::Ed25519.to_string().as_bytes())?;
    Util::write_file(&private_path, key.to_bytes())?;
    Ok(key)
}

fn start_logging() {
    let mut builder = Builder::new();
    builder.format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()));
    if let Ok(filter) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filter);
    } else {
        builder.filter_level(LevelFilter::Info);
    }
    let _ = builder.try_init();
}
