//! Subscription registry.

use crate::error::{Result, VaultError};
use crate::store::records::{truncate_to_millis, X509SubscriptionRecord};
use crate::store::Store;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub struct X509SubscriptionService {
    store: Arc<Store>,
}

impl X509SubscriptionService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Register a subscription. The SAN list must not be empty: a
    /// subscription without names could never match a certificate.
    pub async fn create(
        &self,
        subject_alt_names: Vec<String>,
        include_private_key: bool,
    ) -> Result<X509SubscriptionRecord> {
        if subject_alt_names.is_empty() {
            return Err(VaultError::InvalidSubscription(
                "subject_alt_names must not be empty".to_string(),
            ));
        }

        let record = X509SubscriptionRecord {
            id: Uuid::new_v4(),
            subject_alt_names,
            include_private_key,
            created_at: truncate_to_millis(Utc::now()),
        };
        let mut conn = self.store.acquire().await?;
        self.store.subscriptions().create(&mut conn, &record).await
    }

    pub async fn find_by_ids(&self, ids: &[Uuid]) -> Result<Vec<X509SubscriptionRecord>> {
        let mut conn = self.store.acquire().await?;
        self.store.subscriptions().find_by_ids(&mut conn, ids).await
    }

    /// Which of `ids` are not in the store.
    pub async fn exists(&self, ids: &[Uuid]) -> Result<Vec<Uuid>> {
        let found = self.find_by_ids(ids).await?;
        Ok(ids
            .iter()
            .filter(|id| !found.iter().any(|sub| sub.id == **id))
            .copied()
            .collect())
    }

    pub async fn delete(&self, id: Uuid) -> Result<u64> {
        let mut conn = self.store.acquire().await?;
        self.store.subscriptions().delete(&mut conn, id).await
    }
}
