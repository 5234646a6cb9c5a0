//! Test fixtures: throwaway CA hierarchies and an in-memory store.

use crate::pem_util::encode_pem;
use crate::store::Store;
use chrono::{DateTime, Duration, Utc};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509Name, X509};
use std::path::Path;

/// Connect an in-memory database and apply the real migrations.
pub(crate) async fn test_store() -> Store {
    let store = Store::connect("sqlite::memory:").await.unwrap();
    store
        .migrate_from(Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations")))
        .await
        .unwrap();
    store
}

/// What to put in a generated certificate.
pub(crate) struct CertificateSpec {
    common_name: String,
    sans: Vec<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    ca: bool,
    key: Option<PKey<Private>>,
}

impl CertificateSpec {
    pub fn ca(common_name: &str) -> Self {
        Self::new(common_name, true)
    }

    pub fn leaf(common_name: &str) -> Self {
        Self::new(common_name, false)
    }

    fn new(common_name: &str, ca: bool) -> Self {
        Self {
            common_name: common_name.to_string(),
            sans: Vec::new(),
            not_before: Utc::now() - Duration::days(1),
            not_after: Utc::now() + Duration::days(365),
            ca,
            key: None,
        }
    }

    pub fn sans(mut self, sans: &[&str]) -> Self {
        self.sans = sans.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn validity(mut self, not_before: DateTime<Utc>, not_after: DateTime<Utc>) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// Reuse an existing key pair instead of generating a fresh one.
    pub fn with_key(mut self, key: PKey<Private>) -> Self {
        self.key = Some(key);
        self
    }
}

/// A generated certificate and its private key.
pub(crate) struct Fixture {
    pub key: PKey<Private>,
    pub cert: X509,
}

impl Fixture {
    pub fn rsa_root(common_name: &str) -> Self {
        Self::self_signed(CertificateSpec::ca(common_name))
    }

    pub fn rsa_root_with_validity(
        common_name: &str,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Self {
        Self::self_signed(CertificateSpec::ca(common_name).validity(not_before, not_after))
    }

    pub fn self_signed(spec: CertificateSpec) -> Self {
        build(spec, None)
    }

    /// Issue a certificate signed by this fixture's key, with this
    /// fixture's subject as the issuer name.
    pub fn issue(&self, spec: CertificateSpec) -> Fixture {
        build(spec, Some((&self.key, &self.cert)))
    }

    pub fn cert_pem(&self) -> String {
        encode_pem("CERTIFICATE", &self.cert.to_der().unwrap())
    }

    pub fn key_pem_pkcs8(&self) -> String {
        encode_pem("PRIVATE KEY", &self.key.private_key_to_pkcs8().unwrap())
    }

    pub fn key_pem_pkcs1(&self) -> String {
        encode_pem(
            "RSA PRIVATE KEY",
            &self.key.rsa().unwrap().private_key_to_der().unwrap(),
        )
    }
}

fn build(spec: CertificateSpec, signer: Option<(&PKey<Private>, &X509)>) -> Fixture {
    let key = spec
        .key
        .unwrap_or_else(|| PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap());

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();

    let mut serial = BigNum::new().unwrap();
    serial.rand(128, MsbOption::MAYBE_ZERO, false).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();

    let mut name = X509Name::builder().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, &spec.common_name)
        .unwrap();
    name.append_entry_by_nid(Nid::ORGANIZATIONNAME, "PKI Vault Tests")
        .unwrap();
    let name = name.build();
    builder.set_subject_name(&name).unwrap();
    match signer {
        Some((_, issuer_cert)) => builder.set_issuer_name(issuer_cert.subject_name()),
        None => builder.set_issuer_name(&name),
    }
    .unwrap();

    let not_before = Asn1Time::from_unix(spec.not_before.timestamp()).unwrap();
    builder.set_not_before(&not_before).unwrap();
    let not_after = Asn1Time::from_unix(spec.not_after.timestamp()).unwrap();
    builder.set_not_after(&not_after).unwrap();

    builder.set_pubkey(&key).unwrap();

    if spec.ca {
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .digital_signature()
                    .build()
                    .unwrap(),
            )
            .unwrap();
    }

    if !spec.sans.is_empty() {
        let mut san = SubjectAlternativeName::new();
        for entry in &spec.sans {
            san.dns(entry);
        }
        let extension = {
            let ctx = builder.x509v3_context(signer.map(|(_, cert)| &**cert), None);
            san.build(&ctx).unwrap()
        };
        builder.append_extension(extension).unwrap();
    }

    let signing_key = signer.map(|(key, _)| key).unwrap_or(&key);
    let digest = if signing_key.id() == Id::ED25519 {
        MessageDigest::null()
    } else {
        MessageDigest::sha256()
    };
    builder.sign(signing_key, digest).unwrap();

    Fixture {
        key,
        cert: builder.build(),
    }
}
