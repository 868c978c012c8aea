//! Update orchestration core of an Uptane-following OTA client: metadata
//! generation/signing, TUF/Uptane verification, the package-manager and
//! secondary-transport contracts, and the update-cycle state machine that
//! ties them together.

#[macro_use]
extern crate log;

pub mod canonical;
pub mod client;
pub mod crypto;
pub mod cycle;
pub mod datatype;
pub mod events;
pub mod fetcher;
pub mod keystore;
pub mod lock;
pub mod offline;
pub mod pacman;
pub mod queue;
pub mod repo_builder;
pub mod secondary;
pub mod verifier;

pub use datatype::Error;
