//! Cryptographic identity hashing.
//!
//! Certificates and keys are indexed by SHA-512 digests over three kinds of
//! identity: the canonical text form of a distinguished name, the raw DER
//! bytes, and algorithm-specific public key material. Parent/child linking
//! relies on a parent's subject hash equalling a child's issuer hash, so
//! subjects and issuers must go through the same canonicalization.

use crate::error::{Result, VaultError};
use openssl::bn::{BigNum, BigNumContext};
use openssl::hash::{hash, MessageDigest};
use openssl::nid::Nid;
use openssl::pkey::{HasPublic, Id, PKeyRef};
use openssl::x509::X509NameRef;

/// Serialize a distinguished name into its canonical text form:
/// attribute entries in certificate order, `SHORTNAME=value`, comma-joined,
/// e.g. `CN=Example Root CA,O=Example,C=US`.
pub fn canonical_name(name: &X509NameRef) -> Result<String> {
    let mut parts = Vec::new();
    for entry in name.entries() {
        let object = entry.object();
        let attr = match object.nid() {
            Nid::UNDEF => object.to_string(),
            nid => nid
                .short_name()
                .map(str::to_string)
                .unwrap_or_else(|_| object.to_string()),
        };
        let value = entry
            .data()
            .as_utf8()
            .map_err(|e| VaultError::InvalidCertificate(format!("non-utf8 name entry: {e}")))?;
        parts.push(format!("{}={}", attr, value));
    }
    Ok(parts.join(","))
}

/// SHA-512 over the canonical text form of a distinguished name.
pub fn hash_name(name: &X509NameRef) -> Result<Vec<u8>> {
    hash_bytes(canonical_name(name)?.as_bytes())
}

/// SHA-512 over raw bytes. Used for DER content addressing.
pub fn hash_bytes(data: &[u8]) -> Result<Vec<u8>> {
    Ok(hash(MessageDigest::sha512(), data)?.to_vec())
}

/// SHA-512 over algorithm-specific public key material, so that a key and
/// a certificate produce the same digest regardless of encoding variant.
///
/// RSA hashes `be_bytes(N) || E & 0xff`. The exponent is deliberately
/// truncated to its low byte: existing databases were populated with that
/// layout and changing it would orphan every stored key link.
pub fn hash_public_key<T: HasPublic>(pkey: &PKeyRef<T>) -> Result<Vec<u8>> {
    let material = match pkey.id() {
        Id::RSA => {
            let rsa = pkey.rsa()?;
            let mut bytes = rsa.n().to_vec();
            bytes.push(low_byte(rsa.e()));
            bytes
        }
        Id::EC => {
            let ec = pkey.ec_key()?;
            let mut ctx = BigNumContext::new()?;
            let mut x = BigNum::new()?;
            let mut y = BigNum::new()?;
            ec.public_key()
                .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)?;
            let mut bytes = x.to_vec();
            bytes.extend_from_slice(&y.to_vec());
            bytes
        }
        Id::ED25519 => pkey.raw_public_key()?,
        other => {
            return Err(VaultError::InvalidCertificate(format!(
                "unsupported public key algorithm: {other:?}"
            )))
        }
    };
    hash_bytes(&material)
}

fn low_byte(n: &openssl::bn::BigNumRef) -> u8 {
    *n.to_vec().last().unwrap_or(&0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::pkey::PKey;
    use openssl::rsa::Rsa;
    use openssl::x509::X509Name;

    fn name(entries: &[(Nid, &str)]) -> X509Name {
        let mut builder = X509Name::builder().unwrap();
        for (nid, value) in entries {
            builder.append_entry_by_nid(*nid, value).unwrap();
        }
        builder.build()
    }

    #[test]
    fn test_canonical_name_comma_joins_short_names() {
        let name = name(&[
            (Nid::COMMONNAME, "Example Root CA"),
            (Nid::ORGANIZATIONNAME, "Example"),
            (Nid::COUNTRYNAME, "US"),
        ]);
        assert_eq!(
            canonical_name(&name).unwrap(),
            "CN=Example Root CA,O=Example,C=US"
        );
    }

    #[test]
    fn test_hash_name_stable_and_order_sensitive() {
        let a = name(&[(Nid::COMMONNAME, "a"), (Nid::ORGANIZATIONNAME, "b")]);
        let b = name(&[(Nid::COMMONNAME, "a"), (Nid::ORGANIZATIONNAME, "b")]);
        let c = name(&[(Nid::ORGANIZATIONNAME, "b"), (Nid::COMMONNAME, "a")]);
        assert_eq!(hash_name(&a).unwrap(), hash_name(&b).unwrap());
        assert_ne!(hash_name(&a).unwrap(), hash_name(&c).unwrap());
    }

    #[test]
    fn test_hash_bytes_is_sha512() {
        let digest = hash_bytes(b"test data").unwrap();
        assert_eq!(digest.len(), 64);
        assert_ne!(digest, hash_bytes(b"other data").unwrap());
    }

    #[test]
    fn test_rsa_public_key_hash_matches_manual_layout() {
        let rsa = Rsa::generate(2048).unwrap();
        let mut material = rsa.n().to_vec();
        material.push(*rsa.e().to_vec().last().unwrap());
        let expected = hash_bytes(&material).unwrap();

        let pkey = PKey::from_rsa(rsa).unwrap();
        assert_eq!(hash_public_key(&pkey).unwrap(), expected);
    }

    #[test]
    fn test_private_and_public_halves_hash_identically() {
        let rsa = Rsa::generate(2048).unwrap();
        let private = PKey::from_rsa(rsa).unwrap();
        let public =
            PKey::public_key_from_der(&private.public_key_to_der().unwrap()).unwrap();
        assert_eq!(
            hash_public_key(&private).unwrap(),
            hash_public_key(&public).unwrap()
        );
    }

    #[test]
    fn test_ec_key_hash_covers_both_coordinates() {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        let ec = EcKey::generate(&group).unwrap();
        let pkey = PKey::from_ec_key(ec.clone()).unwrap();

        let mut ctx = BigNumContext::new().unwrap();
        let mut x = BigNum::new().unwrap();
        let mut y = BigNum::new().unwrap();
        ec.public_key()
            .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)
            .unwrap();
        let mut material = x.to_vec();
        material.extend_from_slice(&y.to_vec());

        assert_eq!(
            hash_public_key(&pkey).unwrap(),
            hash_bytes(&material).unwrap()
        );
    }

    #[test]
    fn test_ed25519_key_hash_uses_raw_public_key() {
        let pkey = PKey::generate_ed25519().unwrap();
        let raw = pkey.raw_public_key().unwrap();
        assert_eq!(raw.len(), 32);
        assert_eq!(
            hash_public_key(&pkey).unwrap(),
            hash_bytes(&raw).unwrap()
        );
    }
}
