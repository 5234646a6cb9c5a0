//! Subscription repository.

use crate::error::Result;
use crate::store::records::{encode_sans, to_millis, SubscriptionRow, X509SubscriptionRecord};
use sqlx::SqliteConnection;
use uuid::Uuid;

pub struct X509SubscriptionRepository;

impl X509SubscriptionRepository {
    pub async fn create(
        &self,
        conn: &mut SqliteConnection,
        sub: &X509SubscriptionRecord,
    ) -> Result<X509SubscriptionRecord> {
        sqlx::query(
            "INSERT INTO x509_certificate_subscriptions (
                 id, subject_alt_names, include_private_key, created_at
             ) VALUES (?, ?, ?, ?)",
        )
        .bind(sub.id.to_string())
        .bind(encode_sans(&sub.subject_alt_names)?)
        .bind(sub.include_private_key)
        .bind(to_millis(sub.created_at))
        .execute(&mut *conn)
        .await?;

        Ok(sub.clone())
    }

    /// Subset lookup; callers reconcile missing ids themselves.
    pub async fn find_by_ids(
        &self,
        conn: &mut SqliteConnection,
        ids: &[Uuid],
    ) -> Result<Vec<X509SubscriptionRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM x509_certificate_subscriptions WHERE id IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, SubscriptionRow>(&sql);
        for id in ids {
            query = query.bind(id.to_string());
        }

        let rows = query.fetch_all(&mut *conn).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn delete(&self, conn: &mut SqliteConnection, id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM x509_certificate_subscriptions WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;
        Ok(result.rows_affected())
    }
}
