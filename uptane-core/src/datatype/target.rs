use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use crate::datatype::tuf::FileMeta;
use crate::datatype::Error;

/// Custom fields an Uptane targets entry carries beyond plain TUF: the ECU
/// this image is destined for and the retrieval URI.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TargetCustom {
    #[serde(rename = "ecuIdentifier")]
    pub ecu_identifier: String,
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_counter: Option<u64>,
}

/// A single image as tracked by the repo builder before it is folded into
/// a signed targets body.
#[derive(Debug, Clone)]
pub struct Target {
    pub filepath: String,
    pub length: u64,
    pub hashes: HashMap<String, String>,
    pub custom: TargetCustom,
}

impl Target {
    /// Hashes a file on disk (sha256 and sha512) and records its length,
    /// producing a `Target` ready to add to a targets body.
    pub fn from_file(
        filepath: &str,
        path: &Path,
        ecu_identifier: &str,
        uri: &str,
    ) -> Result<Target, Error> {
        let mut file = std::fs::File::open(path)?;
        let mut sha256 = Sha256::new();
        let mut sha512 = Sha512::new();
        let mut length = 0u64;
        let mut buf = [0u8; 8192];

        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            sha256.update(&buf[..n]);
            sha512.update(&buf[..n]);
            length += n as u64;
        }

        let mut hashes = HashMap::new();
        hashes.insert("sha256".into(), hex::encode(sha256.finalize()));
        hashes.insert("sha512".into(), hex::encode(sha512.finalize()));

        Ok(Target {
            filepath: filepath.to_string(),
            length,
            hashes,
            custom: TargetCustom {
                ecu_identifier: ecu_identifier.to_string(),
                uri: uri.to_string(),
                release_counter: None,
            },
        })
    }

    pub fn to_file_meta(&self) -> Result<FileMeta, Error> {
        Ok(FileMeta {
            length: self.length,
            hashes: self.hashes.clone(),
            custom: Some(serde_json::to_value(&self.custom)?),
        })
    }

    /// Verifies that a downloaded file matches this target's recorded
    /// length and hashes.
    pub fn verify_file(&self, path: &Path) -> Result<(), Error> {
        let mut file = std::fs::File::open(path)?;
        let mut sha256 = Sha256::new();
        let mut length = 0u64;
        let mut buf = [0u8; 8192];

        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            sha256.update(&buf[..n]);
            length += n as u64;
        }

        if length != self.length {
            return Err(Error::Verify(format!(
                "length mismatch for {}: expected {}, got {}",
                self.filepath, self.length, length
            )));
        }

        if let Some(expected) = self.hashes.get("sha256") {
            let actual = hex::encode(sha256.finalize());
            if &actual != expected {
                return Err(Error::Verify(format!(
                    "sha256 mismatch for {}: expected {}, got {}",
                    self.filepath, expected, actual
                )));
            }
        }

        Ok(())
    }
}
