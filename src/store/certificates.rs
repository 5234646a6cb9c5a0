//! Certificate repository.

use crate::error::{Result, VaultError};
use crate::store::records::{
    encode_sans, to_millis, CertificateRow, X509CertificateRecord,
};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

/// Certificates past this many parent hops are treated as corrupt.
const MAX_CHAIN_DEPTH: usize = 32;

pub struct X509CertificateRepository;

impl X509CertificateRepository {
    /// Insert a certificate, or return the row already stored under the
    /// same `bytes_hash`. Content addressing makes re-imports idempotent.
    pub async fn get_or_create(
        &self,
        conn: &mut SqliteConnection,
        cert: &X509CertificateRecord,
    ) -> Result<X509CertificateRecord> {
        let existing = sqlx::query_as::<_, CertificateRow>(
            "SELECT * FROM x509_certificates WHERE bytes_hash = ?",
        )
        .bind(&cert.bytes_hash)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(row) = existing {
            return row.try_into();
        }

        sqlx::query(
            "INSERT INTO x509_certificates (
                 id, common_name, subject_alt_names, issuer_hash, subject_hash,
                 bytes_hash, bytes, public_key_hash, parent_certificate_id,
                 private_key_id, not_before, not_after, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(cert.id.to_string())
        .bind(&cert.common_name)
        .bind(encode_sans(&cert.subject_alt_names)?)
        .bind(&cert.issuer_hash)
        .bind(&cert.subject_hash)
        .bind(&cert.bytes_hash)
        .bind(&cert.bytes)
        .bind(&cert.public_key_hash)
        .bind(cert.parent_certificate_id.map(|id| id.to_string()))
        .bind(cert.private_key_id.map(|id| id.to_string()))
        .bind(to_millis(cert.not_before))
        .bind(to_millis(cert.not_after))
        .bind(to_millis(cert.created_at))
        .execute(&mut *conn)
        .await?;

        Ok(cert.clone())
    }

    /// Mutate the two linkable columns in place. Returns false when no row
    /// carries the id.
    pub async fn update(
        &self,
        conn: &mut SqliteConnection,
        cert: &X509CertificateRecord,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE x509_certificates
                SET parent_certificate_id = ?, private_key_id = ?
              WHERE id = ?",
        )
        .bind(cert.parent_certificate_id.map(|id| id.to_string()))
        .bind(cert.private_key_id.map(|id| id.to_string()))
        .bind(cert.id.to_string())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() != 0)
    }

    pub async fn find_by_issuer_hash_no_parent(
        &self,
        conn: &mut SqliteConnection,
        issuer_hash: &[u8],
    ) -> Result<Vec<X509CertificateRecord>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            "SELECT * FROM x509_certificates
              WHERE issuer_hash = ? AND parent_certificate_id IS NULL",
        )
        .bind(issuer_hash)
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn find_by_public_key_hash_no_private_key(
        &self,
        conn: &mut SqliteConnection,
        public_key_hash: &[u8],
    ) -> Result<Vec<X509CertificateRecord>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            "SELECT * FROM x509_certificates
              WHERE public_key_hash = ? AND private_key_id IS NULL",
        )
        .bind(public_key_hash)
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn find_by_subject_hash(
        &self,
        conn: &mut SqliteConnection,
        subject_hash: &[u8],
    ) -> Result<Vec<X509CertificateRecord>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            "SELECT * FROM x509_certificates WHERE subject_hash = ?",
        )
        .bind(subject_hash)
        .fetch_all(&mut *conn)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn find_by_bytes_hashes(
        &self,
        conn: &mut SqliteConnection,
        bytes_hashes: &[Vec<u8>],
    ) -> Result<Vec<X509CertificateRecord>> {
        if bytes_hashes.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; bytes_hashes.len()].join(", ");
        let sql = format!(
            "SELECT * FROM x509_certificates WHERE bytes_hash IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, CertificateRow>(&sql);
        for hash in bytes_hashes {
            query = query.bind(hash);
        }

        let rows = query.fetch_all(&mut *conn).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// Walk `parent_certificate_id` from `start_id` to the root. The result
    /// starts with the certificate itself. A walk deeper than
    /// [`MAX_CHAIN_DEPTH`] fails rather than follow a corrupted graph.
    pub async fn find_chain(
        &self,
        conn: &mut SqliteConnection,
        start_id: Uuid,
    ) -> Result<Vec<X509CertificateRecord>> {
        let rows = sqlx::query_as::<_, CertificateRow>(
            "WITH RECURSIVE chain AS (
                 SELECT c.*, 0 AS depth
                   FROM x509_certificates c
                  WHERE c.id = ?
                 UNION ALL
                 SELECT p.*, chain.depth + 1
                   FROM x509_certificates p
                   JOIN chain ON p.id = chain.parent_certificate_id
                  WHERE chain.depth < ?
             )
             SELECT * FROM chain ORDER BY depth",
        )
        .bind(start_id.to_string())
        .bind(MAX_CHAIN_DEPTH as i64)
        .fetch_all(&mut *conn)
        .await?;

        if rows.len() > MAX_CHAIN_DEPTH {
            return Err(VaultError::Consistency(format!(
                "certificate chain from {start_id} exceeds depth {MAX_CHAIN_DEPTH}"
            )));
        }

        rows.into_iter().map(TryInto::try_into).collect()
    }

    /// For each requested DNS name, the currently-valid certificate with
    /// the farthest expiry among those created after `after` whose SAN set
    /// covers the name, either verbatim or through a `*.suffix` entry
    /// matching any strict subdomain depth.
    ///
    /// A requested name that is itself wildcard-shaped matches only a
    /// certificate SAN spelled identically; it never goes through suffix
    /// expansion, which would let unrelated wildcard SANs match each other
    /// on a shared suffix.
    pub async fn find_latest_by_sans_since(
        &self,
        conn: &mut SqliteConnection,
        sans: &[String],
        after: DateTime<Utc>,
    ) -> Result<Vec<X509CertificateRecord>> {
        const LATEST_ACTIVE_EXACT: &str = "SELECT * FROM x509_certificates
              WHERE created_at > ?
                AND not_before <= ? AND not_after >= ?
                AND EXISTS (
                    SELECT 1 FROM json_each(x509_certificates.subject_alt_names)
                     WHERE json_each.value = ?
                )
              ORDER BY not_after DESC
              LIMIT 1";
        const LATEST_ACTIVE_EXACT_OR_WILDCARD: &str = "SELECT * FROM x509_certificates
              WHERE created_at > ?
                AND not_before <= ? AND not_after >= ?
                AND EXISTS (
                    SELECT 1 FROM json_each(x509_certificates.subject_alt_names)
                     WHERE json_each.value = ?
                        OR (json_each.value LIKE '*.%'
                            AND ? LIKE '%.' || substr(json_each.value, 3))
                )
              ORDER BY not_after DESC
              LIMIT 1";

        let now = to_millis(Utc::now());
        let mut results = Vec::new();

        for san in sans {
            let query = if san.starts_with("*.") {
                sqlx::query_as::<_, CertificateRow>(LATEST_ACTIVE_EXACT)
                    .bind(to_millis(after))
                    .bind(now)
                    .bind(now)
                    .bind(san)
            } else {
                sqlx::query_as::<_, CertificateRow>(LATEST_ACTIVE_EXACT_OR_WILDCARD)
                    .bind(to_millis(after))
                    .bind(now)
                    .bind(now)
                    .bind(san)
                    .bind(san)
            };
            let row = query.fetch_optional(&mut *conn).await?;

            if let Some(row) = row {
                results.push(row.try_into()?);
            }
        }

        Ok(results)
    }
}
