use serde::de::{Deserialize, Deserializer, Error as SerdeError};
use serde::Serialize;
use serde_json as json;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::datatype::Error;

/// A TUF/Uptane signing role.
#[derive(Serialize, Hash, Eq, PartialEq, Debug, Clone, Copy)]
pub enum RoleName {
    Root,
    Targets,
    Snapshot,
    Timestamp,
}

impl FromStr for RoleName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "root" => Ok(RoleName::Root),
            "targets" => Ok(RoleName::Targets),
            "snapshot" => Ok(RoleName::Snapshot),
            "timestamp" => Ok(RoleName::Timestamp),
            _ => Err(Error::Internal(format!("unknown role: {}", s))),
        }
    }
}

impl Display for RoleName {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            RoleName::Root => write!(f, "root"),
            RoleName::Targets => write!(f, "targets"),
            RoleName::Snapshot => write!(f, "snapshot"),
            RoleName::Timestamp => write!(f, "timestamp"),
        }
    }
}

impl<'de> Deserialize<'de> for RoleName {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<RoleName, D::Error> {
        if let json::Value::String(ref s) = Deserialize::deserialize(de)? {
            s.parse().map_err(|err| SerdeError::custom(format!("unknown RoleName: {}", err)))
        } else {
            Err(SerdeError::custom("expected a string for RoleName"))
        }
    }
}

/// Which of the two Uptane repositories a role's metadata belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryType {
    Director,
    Image,
}

impl FromStr for RepositoryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "director" => Ok(RepositoryType::Director),
            "image" => Ok(RepositoryType::Image),
            _ => Err(Error::Internal(format!("unknown repository type: {}", s))),
        }
    }
}

impl Display for RepositoryType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            RepositoryType::Director => write!(f, "director"),
            RepositoryType::Image => write!(f, "image"),
        }
    }
}

/// The wire-level key type carried inside TUF `Key` metadata.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Copy)]
pub enum KeyType {
    #[serde(rename = "rsa")]
    Rsa,
    #[serde(rename = "ed25519")]
    Ed25519,
}

impl Display for KeyType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            KeyType::Rsa => write!(f, "rsa"),
            KeyType::Ed25519 => write!(f, "ed25519"),
        }
    }
}

/// The concrete key kind `KeyStore` can generate, distinguishing RSA bit
/// sizes even though they all carry `KeyType::Rsa` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Rsa2048,
    Rsa3072,
    Rsa4096,
    Ed25519,
}

impl KeyKind {
    pub fn wire_type(&self) -> KeyType {
        match *self {
            KeyKind::Rsa2048 | KeyKind::Rsa3072 | KeyKind::Rsa4096 => KeyType::Rsa,
            KeyKind::Ed25519 => KeyType::Ed25519,
        }
    }

    pub fn rsa_bits(&self) -> Option<u32> {
        match *self {
            KeyKind::Rsa2048 => Some(2048),
            KeyKind::Rsa3072 => Some(3072),
            KeyKind::Rsa4096 => Some(4096),
            KeyKind::Ed25519 => None,
        }
    }
}

impl FromStr for KeyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RSA2048" => Ok(KeyKind::Rsa2048),
            "RSA3072" => Ok(KeyKind::Rsa3072),
            "RSA4096" => Ok(KeyKind::Rsa4096),
            "ED25519" => Ok(KeyKind::Ed25519),
            _ => Err(Error::KeyStore(format!("unknown key kind: {}", s))),
        }
    }
}

impl Display for KeyKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            KeyKind::Rsa2048 => write!(f, "RSA2048"),
            KeyKind::Rsa3072 => write!(f, "RSA3072"),
            KeyKind::Rsa4096 => write!(f, "RSA4096"),
            KeyKind::Ed25519 => write!(f, "ED25519"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_name_roundtrips_through_display_and_parse() {
        for role in &[RoleName::Root, RoleName::Targets, RoleName::Snapshot, RoleName::Timestamp] {
            let parsed: RoleName = role.to_string().parse().expect("parse");
            assert_eq!(format!("{:?}", parsed), format!("{:?}", role));
        }
    }

    #[test]
    fn key_kind_roundtrips() {
        for kind in &[KeyKind::Rsa2048, KeyKind::Rsa3072, KeyKind::Rsa4096, KeyKind::Ed25519] {
            let parsed: KeyKind = kind.to_string().parse().expect("parse");
            assert_eq!(parsed, *kind);
        }
    }
}
