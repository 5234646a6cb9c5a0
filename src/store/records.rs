//! Stored-form records and their SQLite row mappings.
//!
//! Timestamps are persisted as unix milliseconds so SQL range comparisons
//! are exact, UUIDs as hyphenated text, SAN lists as JSON arrays.

use crate::error::{Result, VaultError};
use crate::key_parser::PrivateKeyType;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A certificate in stored form.
#[derive(Debug, Clone, PartialEq)]
pub struct X509CertificateRecord {
    pub id: Uuid,
    pub common_name: String,
    pub subject_alt_names: Vec<String>,
    pub issuer_hash: Vec<u8>,
    pub subject_hash: Vec<u8>,
    pub bytes_hash: Vec<u8>,
    pub bytes: Vec<u8>,
    pub public_key_hash: Vec<u8>,
    pub parent_certificate_id: Option<Uuid>,
    pub private_key_id: Option<Uuid>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A private key in stored form. `pem_block_type` keeps the original armor
/// label so exports round-trip byte-identically.
#[derive(Debug, Clone, PartialEq)]
pub struct X509PrivateKeyRecord {
    pub id: Uuid,
    pub key_type: PrivateKeyType,
    pub pem_block_type: String,
    pub bytes_hash: Vec<u8>,
    pub bytes: Vec<u8>,
    pub public_key_hash: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// A SAN-set subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct X509SubscriptionRecord {
    pub id: Uuid,
    pub subject_alt_names: Vec<String>,
    pub include_private_key: bool,
    pub created_at: DateTime<Utc>,
}

/// Round a timestamp to millisecond precision in UTC, the resolution every
/// stored timestamp carries.
pub fn truncate_to_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(t.timestamp_millis()).unwrap_or(t)
}

pub(crate) fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| VaultError::Consistency(format!("timestamp out of range: {ms}")))
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| VaultError::Consistency(format!("invalid uuid in store: {e}")))
}

fn parse_sans(value: &str) -> Result<Vec<String>> {
    serde_json::from_str(value)
        .map_err(|e| VaultError::Consistency(format!("invalid san list in store: {e}")))
}

pub(crate) fn encode_sans(sans: &[String]) -> Result<String> {
    serde_json::to_string(sans)
        .map_err(|e| VaultError::Consistency(format!("unencodable san list: {e}")))
}

#[derive(sqlx::FromRow)]
pub(crate) struct CertificateRow {
    pub id: String,
    pub common_name: String,
    pub subject_alt_names: String,
    pub issuer_hash: Vec<u8>,
    pub subject_hash: Vec<u8>,
    pub bytes_hash: Vec<u8>,
    pub bytes: Vec<u8>,
    pub public_key_hash: Vec<u8>,
    pub parent_certificate_id: Option<String>,
    pub private_key_id: Option<String>,
    pub not_before: i64,
    pub not_after: i64,
    pub created_at: i64,
}

impl TryFrom<CertificateRow> for X509CertificateRecord {
    type Error = VaultError;

    fn try_from(row: CertificateRow) -> Result<Self> {
        Ok(X509CertificateRecord {
            id: parse_uuid(&row.id)?,
            common_name: row.common_name,
            subject_alt_names: parse_sans(&row.subject_alt_names)?,
            issuer_hash: row.issuer_hash,
            subject_hash: row.subject_hash,
            bytes_hash: row.bytes_hash,
            bytes: row.bytes,
            public_key_hash: row.public_key_hash,
            parent_certificate_id: row
                .parent_certificate_id
                .as_deref()
                .map(parse_uuid)
                .transpose()?,
            private_key_id: row.private_key_id.as_deref().map(parse_uuid).transpose()?,
            not_before: from_millis(row.not_before)?,
            not_after: from_millis(row.not_after)?,
            created_at: from_millis(row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct PrivateKeyRow {
    pub id: String,
    #[sqlx(rename = "type")]
    pub key_type: String,
    pub pem_block_type: String,
    pub bytes_hash: Vec<u8>,
    pub bytes: Vec<u8>,
    pub public_key_hash: Vec<u8>,
    pub created_at: i64,
}

impl TryFrom<PrivateKeyRow> for X509PrivateKeyRecord {
    type Error = VaultError;

    fn try_from(row: PrivateKeyRow) -> Result<Self> {
        let key_type = PrivateKeyType::from_str(&row.key_type).ok_or_else(|| {
            VaultError::Consistency(format!("unknown key type in store: {}", row.key_type))
        })?;
        Ok(X509PrivateKeyRecord {
            id: parse_uuid(&row.id)?,
            key_type,
            pem_block_type: row.pem_block_type,
            bytes_hash: row.bytes_hash,
            bytes: row.bytes,
            public_key_hash: row.public_key_hash,
            created_at: from_millis(row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct SubscriptionRow {
    pub id: String,
    pub subject_alt_names: String,
    pub include_private_key: bool,
    pub created_at: i64,
}

impl TryFrom<SubscriptionRow> for X509SubscriptionRecord {
    type Error = VaultError;

    fn try_from(row: SubscriptionRow) -> Result<Self> {
        Ok(X509SubscriptionRecord {
            id: parse_uuid(&row.id)?,
            subject_alt_names: parse_sans(&row.subject_alt_names)?,
            include_private_key: row.include_private_key,
            created_at: from_millis(row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_to_millis_drops_sub_millisecond_part() {
        let t = DateTime::from_timestamp(1_700_000_000, 123_456_789)
            .unwrap()
            .with_timezone(&Utc);
        let truncated = truncate_to_millis(t);
        assert_eq!(truncated.timestamp_subsec_millis(), 123);
        assert_eq!(truncated.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn test_millis_round_trip() {
        let t = truncate_to_millis(Utc::now());
        assert_eq!(from_millis(to_millis(t)).unwrap(), t);
    }

    #[test]
    fn test_certificate_row_rejects_bad_uuid() {
        let row = CertificateRow {
            id: "not-a-uuid".to_string(),
            common_name: String::new(),
            subject_alt_names: "[]".to_string(),
            issuer_hash: vec![],
            subject_hash: vec![],
            bytes_hash: vec![],
            bytes: vec![],
            public_key_hash: vec![],
            parent_certificate_id: None,
            private_key_id: None,
            not_before: 0,
            not_after: 0,
            created_at: 0,
        };
        let err = X509CertificateRecord::try_from(row).unwrap_err();
        assert!(matches!(err, VaultError::Consistency(_)));
    }
}
