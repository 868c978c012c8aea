use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::canonical::CanonicalJson;
use crate::crypto::PrivateKey;
use crate::datatype::{Error, KeyType, RoleName};

/// The signature algorithm identifier carried in a `Signature` entry.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureMethod {
    #[serde(rename = "rsassa-pss-sha256")]
    RsaSsaPss,
    #[serde(rename = "ed25519")]
    Ed25519,
}

/// A single signature over a role's canonicalized `signed` body.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Signature {
    pub keyid: String,
    pub method: SignatureMethod,
    pub sig: String,
}

/// The public half of a TUF key entry, as embedded in root metadata.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KeyValue {
    pub public: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Key {
    pub keytype: KeyType,
    pub keyval: KeyValue,
}

/// A role entry inside root metadata: which keys may sign it, and how many
/// signatures are required.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoleMeta {
    pub keyids: Vec<String>,
    pub threshold: u64,
}

/// File metadata as it appears in a `targets` or `snapshot` body.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FileMeta {
    pub length: u64,
    pub hashes: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

/// The `signed` body of a role, generic over role-specific payload shape
/// via the `custom_fields` bag stitched on top at serialization time.
///
/// Root and Targets both reuse this shape; Root additionally populates
/// `keys`/`roles`, Targets populates `targets`, Snapshot/Timestamp populate
/// `meta`. Unused fields are omitted from the wire form.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RoleData {
    #[serde(rename = "_type")]
    pub role_type: RoleName,
    pub expires: String,
    pub version: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<HashMap<String, Key>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<HashMap<String, RoleMeta>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<HashMap<String, FileMeta>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<HashMap<String, FileMeta>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistent_snapshot: Option<bool>,
    /// Role-level custom data, e.g. the Director Targets' blank
    /// `correlationId` a fresh repository carries until a campaign
    /// assigns one (§3 "Targets custom fields").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

/// A fully signed metadata envelope, ready to be written to disk or sent
/// over the wire as `{signed, signatures}`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SignedMetadata {
    pub signed: RoleData,
    pub signatures: Vec<Signature>,
}

impl SignedMetadata {
    /// Produces signatures over the canonicalized `signed` body, one per
    /// supplied key, replacing any signatures already present.
    pub fn sign(signed: RoleData, keys: &[&PrivateKey]) -> Result<SignedMetadata, Error> {
        let json = serde_json::to_value(&signed)?;
        let canonical = CanonicalJson::convert(&json)?;

        let mut signatures = Vec::with_capacity(keys.len());
        for key in keys {
            let sig = key.sign(canonical.as_bytes())?;
            signatures.push(Signature {
                keyid: key.key_id(),
                method: key.signature_method(),
                sig: base64::encode(sig),
            });
        }

        Ok(SignedMetadata { signed, signatures })
    }

    /// Returns the canonical bytes that signatures are computed/verified
    /// over.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, Error> {
        let json = serde_json::to_value(&self.signed)?;
        Ok(CanonicalJson::convert(&json)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::datatype::KeyKind;

    #[test]
    fn sign_produces_one_signature_per_key() {
        let key = PrivateKey::generate(KeyKind::Ed25519).expect("generate");
        let signed = RoleData {
            role_type: RoleName::Targets,
            expires: "2030-01-01T00:00:00Z".into(),
            version: 1,
            keys: None,
            roles: None,
            targets: Some(HashMap::new()),
            meta: None,
            consistent_snapshot: None,
            custom: None,
        };
        let envelope = SignedMetadata::sign(signed, &[&key]).expect("sign");
        assert_eq!(envelope.signatures.len(), 1);
        assert_eq!(envelope.signatures[0].keyid, key.key_id());
    }
}
