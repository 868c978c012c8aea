use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::{Padding, Rsa};
use openssl::sign::{Signer, Verifier as OpensslVerifier};
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use serde_json::json;

use crate::canonical::CanonicalJson;
use crate::datatype::{Error, KeyKind, KeyType};

/// §3: "The hash used for keyid is the SHA-256 of the canonical JSON of the
/// public key" — i.e. of the `{keytype, keyval: {public}}` object as it
/// appears under `root.json`'s `keys`, not of the raw key bytes.
fn keyid_of(key_type: KeyType, public_base64: &str) -> Result<String, Error> {
    use sha2::{Digest, Sha256};
    let body = json!({ "keytype": key_type.to_string(), "keyval": { "public": public_base64 } });
    let canonical = CanonicalJson::convert(&body)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// A private key loaded or generated for one role, able to sign arbitrary
/// bytes and report its own id and wire method. Stored in a form that can
/// be reconstructed on every call, since `ring`'s Ed25519 keys aren't
/// `Clone`.
#[derive(Debug, Clone)]
pub enum PrivateKey {
    Ed25519 { keyid: String, pkcs8: Vec<u8> },
    Rsa { keyid: String, der: Vec<u8> },
}

/// The public half, as stored in root metadata and used for verification.
#[derive(Debug, Clone)]
pub enum PublicKey {
    Ed25519 { keyid: String, raw: Vec<u8> },
    Rsa { keyid: String, der: Vec<u8> },
}

impl PrivateKey {
    /// Generates a fresh key pair of the requested kind.
    pub fn generate(kind: KeyKind) -> Result<PrivateKey, Error> {
        match kind {
            KeyKind::Ed25519 => {
                let rng = SystemRandom::new();
                let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)?;
                let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())?;
                let public_b64 = base64::encode(pair.public_key().as_ref());
                let keyid = keyid_of(KeyType::Ed25519, &public_b64)?;
                Ok(PrivateKey::Ed25519 { keyid, pkcs8: pkcs8.as_ref().to_vec() })
            }
            KeyKind::Rsa2048 | KeyKind::Rsa3072 | KeyKind::Rsa4096 => {
                let bits = kind.rsa_bits().expect("rsa kind has bit size");
                let rsa = Rsa::generate(bits)?;
                let der = rsa.private_key_to_der()?;
                let public_der = rsa.public_key_to_der()?;
                let keyid = keyid_of(KeyType::Rsa, &base64::encode(&public_der))?;
                Ok(PrivateKey::Rsa { keyid, der })
            }
        }
    }

    pub fn key_id(&self) -> String {
        match self {
            PrivateKey::Ed25519 { keyid, .. } => keyid.clone(),
            PrivateKey::Rsa { keyid, .. } => keyid.clone(),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            PrivateKey::Ed25519 { .. } => KeyType::Ed25519,
            PrivateKey::Rsa { .. } => KeyType::Rsa,
        }
    }

    pub fn signature_method(&self) -> crate::datatype::SignatureMethod {
        match self {
            PrivateKey::Ed25519 { .. } => crate::datatype::SignatureMethod::Ed25519,
            PrivateKey::Rsa { .. } => crate::datatype::SignatureMethod::RsaSsaPss,
        }
    }

    pub fn sign(&self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            PrivateKey::Ed25519 { pkcs8, .. } => {
                let pair = Ed25519KeyPair::from_pkcs8(pkcs8)?;
                Ok(pair.sign(msg).as_ref().to_vec())
            }
            PrivateKey::Rsa { der, .. } => {
                let rsa = Rsa::private_key_from_der(der)?;
                let pkey = PKey::from_rsa(rsa)?;
                let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
                signer.set_rsa_padding(Padding::PKCS1_PSS)?;
                signer.update(msg)?;
                Ok(signer.sign_to_vec()?)
            }
        }
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> Result<PublicKey, Error> {
        match self {
            PrivateKey::Ed25519 { keyid, pkcs8 } => {
                let pair = Ed25519KeyPair::from_pkcs8(pkcs8)?;
                Ok(PublicKey::Ed25519 { keyid: keyid.clone(), raw: pair.public_key().as_ref().to_vec() })
            }
            PrivateKey::Rsa { keyid, der } => {
                let rsa = Rsa::private_key_from_der(der)?;
                let public_der = rsa.public_key_to_der()?;
                Ok(PublicKey::Rsa { keyid: keyid.clone(), der: public_der })
            }
        }
    }

    /// Serializes the private key to a byte form suitable for disk
    /// storage (returned alongside the `KeyKind` so it can be reloaded).
    pub fn to_bytes(&self) -> &[u8] {
        match self {
            PrivateKey::Ed25519 { pkcs8, .. } => pkcs8,
            PrivateKey::Rsa { der, .. } => der,
        }
    }

    pub fn from_bytes(kind: KeyKind, bytes: &[u8]) -> Result<PrivateKey, Error> {
        match kind {
            KeyKind::Ed25519 => {
                let pair = Ed25519KeyPair::from_pkcs8(bytes)?;
                let public_b64 = base64::encode(pair.public_key().as_ref());
                let keyid = keyid_of(KeyType::Ed25519, &public_b64)?;
                Ok(PrivateKey::Ed25519 { keyid, pkcs8: bytes.to_vec() })
            }
            KeyKind::Rsa2048 | KeyKind::Rsa3072 | KeyKind::Rsa4096 => {
                let rsa = Rsa::private_key_from_der(bytes)?;
                let public_der = rsa.public_key_to_der()?;
                let keyid = keyid_of(KeyType::Rsa, &base64::encode(&public_der))?;
                Ok(PrivateKey::Rsa { keyid, der: bytes.to_vec() })
            }
        }
    }
}

impl PublicKey {
    pub fn key_id(&self) -> String {
        match self {
            PublicKey::Ed25519 { keyid, .. } => keyid.clone(),
            PublicKey::Rsa { keyid, .. } => keyid.clone(),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Ed25519 { .. } => KeyType::Ed25519,
            PublicKey::Rsa { .. } => KeyType::Rsa,
        }
    }

    /// Base64 form as stored in a TUF `keyval.public` field.
    pub fn to_base64(&self) -> String {
        match self {
            PublicKey::Ed25519 { raw, .. } => base64::encode(raw),
            PublicKey::Rsa { der, .. } => base64::encode(der),
        }
    }

    pub fn from_base64(key_type: KeyType, keyid: &str, encoded: &str) -> Result<PublicKey, Error> {
        let bytes = base64::decode(encoded)?;
        match key_type {
            KeyType::Ed25519 => Ok(PublicKey::Ed25519 { keyid: keyid.to_string(), raw: bytes }),
            KeyType::Rsa => Ok(PublicKey::Rsa { keyid: keyid.to_string(), der: bytes }),
        }
    }

    pub fn verify(&self, msg: &[u8], sig: &[u8]) -> Result<(), Error> {
        match self {
            PublicKey::Ed25519 { raw, .. } => {
                let public = UnparsedPublicKey::new(&ED25519, raw.as_slice());
                public.verify(msg, sig).map_err(|_| Error::Verify("ed25519 signature invalid".into()))
            }
            PublicKey::Rsa { der, .. } => {
                let rsa = Rsa::public_key_from_der(der)?;
                let pkey = PKey::from_rsa(rsa)?;
                let mut verifier = OpensslVerifier::new(MessageDigest::sha256(), &pkey)?;
                verifier.set_rsa_padding(Padding::PKCS1_PSS)?;
                verifier.update(msg)?;
                if verifier.verify(sig)? {
                    Ok(())
                } else {
                    Err(Error::Verify("rsa-pss signature invalid".into()))
                }
            }
        }
    }
}
