//! Private key decoding.
//!
//! Importers hand us the DER payload of a PEM block without telling us the
//! encoding. Three decoders are tried in a fixed order: PKCS#1 (legacy RSA),
//! PKCS#8 (any algorithm), SEC1 (legacy EC). The first that accepts the
//! bytes wins.

use crate::error::{Result, VaultError};
use openssl::ec::EcKey;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::Rsa;
use serde::{Deserialize, Serialize};

/// Key algorithm as persisted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrivateKeyType {
    Rsa,
    Ecdsa,
    Ed25519,
}

impl PrivateKeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivateKeyType::Rsa => "RSA",
            PrivateKeyType::Ecdsa => "ECDSA",
            PrivateKeyType::Ed25519 => "ED25519",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "RSA" => Some(PrivateKeyType::Rsa),
            "ECDSA" => Some(PrivateKeyType::Ecdsa),
            "ED25519" => Some(PrivateKeyType::Ed25519),
            _ => None,
        }
    }
}

/// Decode a private key from DER and classify its algorithm.
pub fn parse_private_key(der: &[u8]) -> Result<(PKey<Private>, PrivateKeyType)> {
    if let Ok(rsa) = Rsa::private_key_from_der(der) {
        return Ok((PKey::from_rsa(rsa)?, PrivateKeyType::Rsa));
    }

    if let Ok(pkey) = PKey::private_key_from_pkcs8(der) {
        let key_type = match pkey.id() {
            Id::RSA => PrivateKeyType::Rsa,
            Id::EC => PrivateKeyType::Ecdsa,
            Id::ED25519 => PrivateKeyType::Ed25519,
            other => {
                return Err(VaultError::InvalidKey(format!(
                    "unsupported pkcs#8 algorithm: {other:?}"
                )))
            }
        };
        return Ok((pkey, key_type));
    }

    if let Ok(ec) = EcKey::private_key_from_der(der) {
        return Ok((PKey::from_ec_key(ec)?, PrivateKeyType::Ecdsa));
    }

    Err(VaultError::InvalidKey(
        "no decoder accepted the key".to_string(),
    ))
}
