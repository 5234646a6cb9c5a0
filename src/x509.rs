//! X.509 certificate decoding helpers.
//!
//! Wraps the openssl view of a certificate into the stored form: all four
//! identity hashes, the DNS SANs, and the validity window converted to UTC
//! timestamps. Signature checks against candidate parents live here too.

use crate::error::{Result, VaultError};
use crate::hashing::{hash_bytes, hash_name, hash_public_key};
use crate::store::records::{truncate_to_millis, X509CertificateRecord};
use chrono::{DateTime, Utc};
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::nid::Nid;
use openssl::x509::{X509Ref, X509};
use uuid::Uuid;

/// Parse certificate DER into a provisional store record with a fresh id.
pub fn parse_certificate(der: &[u8], now: DateTime<Utc>) -> Result<X509CertificateRecord> {
    let cert = X509::from_der(der)
        .map_err(|e| VaultError::InvalidCertificate(format!("der parse failed: {e}")))?;

    let public_key = cert
        .public_key()
        .map_err(|e| VaultError::InvalidCertificate(format!("unreadable public key: {e}")))?;

    Ok(X509CertificateRecord {
        id: Uuid::new_v4(),
        common_name: common_name(&cert),
        subject_alt_names: subject_alt_dns_names(&cert),
        issuer_hash: hash_name(cert.issuer_name())?,
        subject_hash: hash_name(cert.subject_name())?,
        bytes_hash: hash_bytes(der)?,
        bytes: der.to_vec(),
        public_key_hash: hash_public_key(&public_key)?,
        parent_certificate_id: None,
        private_key_id: None,
        not_before: asn1_time_to_datetime(cert.not_before())?,
        not_after: asn1_time_to_datetime(cert.not_after())?,
        created_at: truncate_to_millis(now),
    })
}

/// Re-parse stored DER. Stored rows always contain bytes we parsed once,
/// so a failure here is a consistency problem, not caller input.
pub fn parse_stored_der(der: &[u8]) -> Result<X509> {
    X509::from_der(der)
        .map_err(|e| VaultError::InvalidCertificate(format!("stored der unreadable: {e}")))
}

/// True when `child`'s signature verifies against `parent`'s public key.
/// Any failure along the way means "not the parent", never an error.
pub fn signed_by(child: &X509Ref, parent: &X509Ref) -> bool {
    match parent.public_key() {
        Ok(parent_key) => child.verify(&parent_key).unwrap_or(false),
        Err(_) => false,
    }
}

pub fn common_name(cert: &X509Ref) -> String {
    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|data| data.to_string())
        .unwrap_or_default()
}

pub fn subject_alt_dns_names(cert: &X509Ref) -> Vec<String> {
    cert.subject_alt_names()
        .map(|names| {
            names
                .iter()
                .filter_map(|name| name.dnsname().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// ASN.1 time carries no direct epoch accessor; diff against the epoch.
pub fn asn1_time_to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .ok_or_else(|| VaultError::InvalidCertificate("validity out of range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CertificateSpec, Fixture};
    use chrono::Duration;

    #[test]
    fn test_parse_certificate_derives_identity_hashes() {
        let fixture = Fixture::rsa_root("Example Root CA");
        let der = fixture.cert.to_der().unwrap();
        let now = Utc::now();

        let record = parse_certificate(&der, now).unwrap();
        assert_eq!(record.common_name, "Example Root CA");
        assert_eq!(record.bytes_hash, hash_bytes(&der).unwrap());
        // Self-signed: issuer and subject canonicalize identically.
        assert_eq!(record.issuer_hash, record.subject_hash);
        assert_eq!(
            record.public_key_hash,
            hash_public_key(&fixture.key).unwrap()
        );
        assert!(record.parent_certificate_id.is_none());
        assert!(record.private_key_id.is_none());
        assert_eq!(record.created_at, truncate_to_millis(now));
    }

    #[test]
    fn test_parse_certificate_extracts_sans() {
        let root = Fixture::rsa_root("Example Root CA");
        let leaf = root.issue(
            CertificateSpec::leaf("leaf.example.test")
                .sans(&["leaf.example.test", "*.alt.example.test"]),
        );
        let record = parse_certificate(&leaf.cert.to_der().unwrap(), Utc::now()).unwrap();
        assert_eq!(
            record.subject_alt_names,
            vec!["leaf.example.test", "*.alt.example.test"]
        );
    }

    #[test]
    fn test_validity_window_round_trips() {
        let not_before = truncate_to_millis(Utc::now() - Duration::days(1));
        let not_after = truncate_to_millis(Utc::now() + Duration::days(1));
        let root = Fixture::rsa_root_with_validity("Windowed CA", not_before, not_after);
        let record = parse_certificate(&root.cert.to_der().unwrap(), Utc::now()).unwrap();
        // ASN.1 times carry second precision.
        assert_eq!(record.not_before.timestamp(), not_before.timestamp());
        assert_eq!(record.not_after.timestamp(), not_after.timestamp());
    }

    #[test]
    fn test_signed_by_accepts_real_parent_only() {
        let root = Fixture::rsa_root("Example Root CA");
        let other_root = Fixture::rsa_root("Unrelated Root CA");
        let leaf = root.issue(CertificateSpec::leaf("leaf.example.test"));

        assert!(signed_by(&leaf.cert, &root.cert));
        assert!(!signed_by(&leaf.cert, &other_root.cert));
        assert!(!signed_by(&root.cert, &leaf.cert));
    }

    #[test]
    fn test_garbage_der_is_invalid_certificate() {
        let err = parse_certificate(b"garbage", Utc::now()).unwrap_err();
        assert!(matches!(err, VaultError::InvalidCertificate(_)));
    }
}
