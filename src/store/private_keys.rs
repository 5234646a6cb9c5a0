//! Private key repository.

use crate::error::Result;
use crate::store::records::{to_millis, PrivateKeyRow, X509PrivateKeyRecord};
use sqlx::SqliteConnection;
use uuid::Uuid;

pub struct X509PrivateKeyRepository;

impl X509PrivateKeyRepository {
    /// Insert a key, or return the row already stored under the same
    /// `public_key_hash`; re-importing a key keeps its original id.
    pub async fn get_or_create(
        &self,
        conn: &mut SqliteConnection,
        key: &X509PrivateKeyRecord,
    ) -> Result<X509PrivateKeyRecord> {
        if let Some(existing) = self
            .find_by_public_key_hash(conn, &key.public_key_hash)
            .await?
        {
            return Ok(existing);
        }

        sqlx::query(
            "INSERT INTO x509_private_keys (
                 id, type, pem_block_type, bytes_hash, bytes, public_key_hash, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key.id.to_string())
        .bind(key.key_type.as_str())
        .bind(&key.pem_block_type)
        .bind(&key.bytes_hash)
        .bind(&key.bytes)
        .bind(&key.public_key_hash)
        .bind(to_millis(key.created_at))
        .execute(&mut *conn)
        .await?;

        Ok(key.clone())
    }

    pub async fn find_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: Uuid,
    ) -> Result<Option<X509PrivateKeyRecord>> {
        let row = sqlx::query_as::<_, PrivateKeyRow>(
            "SELECT * FROM x509_private_keys WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn find_by_ids(
        &self,
        conn: &mut SqliteConnection,
        ids: &[Uuid],
    ) -> Result<Vec<X509PrivateKeyRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!("SELECT * FROM x509_private_keys WHERE id IN ({placeholders})");
        let mut query = sqlx::query_as::<_, PrivateKeyRow>(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }

        let rows = query.fetch_all(&mut *conn).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn find_by_public_key_hash(
        &self,
        conn: &mut SqliteConnection,
        public_key_hash: &[u8],
    ) -> Result<Option<X509PrivateKeyRecord>> {
        let row = sqlx::query_as::<_, PrivateKeyRow>(
            "SELECT * FROM x509_private_keys WHERE public_key_hash = ?",
        )
        .bind(public_key_hash)
        .fetch_optional(&mut *conn)
        .await?;
        row.map(TryInto::try_into).transpose()
    }
}
