//! Subscription update queries.
//!
//! "What changed since T" for a set of subscriptions: the latest active
//! certificate per subscribed DNS name, each certificate's chain up to the
//! root, and the private keys linked to anything returned.

use crate::error::{Result, VaultError};
use crate::store::records::{X509CertificateRecord, X509PrivateKeyRecord, X509SubscriptionRecord};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinSet;
use uuid::Uuid;

pub struct X509CertificateService {
    store: Arc<Store>,
}

impl X509CertificateService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Latest active certificate per subscribed SAN created after `after`,
    /// plus chains and keys. Fails as a whole if any subscription id is
    /// unknown.
    ///
    /// Keys are returned for every certificate that has one, whether or
    /// not the subscription asked for private keys; downstream consumers
    /// rely on this today, so the flag stays cosmetic.
    pub async fn get_updates(
        &self,
        sub_ids: &[Uuid],
        after: DateTime<Utc>,
        include_chain: bool,
    ) -> Result<(Vec<X509CertificateRecord>, Vec<X509PrivateKeyRecord>)> {
        let subs = {
            let mut conn = self.store.acquire().await?;
            self.store
                .subscriptions()
                .find_by_ids(&mut conn, sub_ids)
                .await?
        };

        let missing: Vec<Uuid> = sub_ids
            .iter()
            .filter(|id| !subs.iter().any(|sub| sub.id == **id))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(VaultError::UnknownSubscriptions(missing));
        }

        // One read-only task per subscription; the pool bounds how many
        // run against the database at once.
        let mut tasks = JoinSet::new();
        for sub in subs {
            let store = Arc::clone(&self.store);
            tasks.spawn(async move {
                fetch_subscription_certificates(store, sub, after, include_chain).await
            });
        }

        let mut certs: Vec<X509CertificateRecord> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let fetched = joined
                .map_err(|e| VaultError::Consistency(format!("update task failed: {e}")))??;
            for cert in fetched {
                if !certs.iter().any(|c| c.id == cert.id) {
                    certs.push(cert);
                }
            }
        }

        let mut key_ids: Vec<Uuid> = Vec::new();
        for cert in &certs {
            if let Some(key_id) = cert.private_key_id {
                if !key_ids.contains(&key_id) {
                    key_ids.push(key_id);
                }
            }
        }

        let mut conn = self.store.acquire().await?;
        let keys = self
            .store
            .private_keys()
            .find_by_ids(&mut conn, &key_ids)
            .await?;

        Ok((certs, keys))
    }
}

async fn fetch_subscription_certificates(
    store: Arc<Store>,
    sub: X509SubscriptionRecord,
    after: DateTime<Utc>,
    include_chain: bool,
) -> Result<Vec<X509CertificateRecord>> {
    let mut conn = store.acquire().await?;

    let mut certs = store
        .certificates()
        .find_latest_by_sans_since(&mut conn, &sub.subject_alt_names, after)
        .await?;

    if include_chain {
        let leaf_ids: Vec<Uuid> = certs.iter().map(|c| c.id).collect();
        for leaf_id in leaf_ids {
            let chain = store.certificates().find_chain(&mut conn, leaf_id).await?;
            // The walk starts at the certificate we already have.
            certs.extend(chain.into_iter().skip(1));
        }
    }

    Ok(certs)
}
