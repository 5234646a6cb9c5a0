//! Persistent storage.
//!
//! A thin sqlx/SQLite layer. Repositories are stateless: every operation
//! takes a `&mut SqliteConnection`, so callers decide whether it runs in a
//! caller-held transaction (the ambient transaction of the import pipeline)
//! or on a pool connection in auto-commit mode. Only whoever called
//! [`Store::begin`] commits; dropping the transaction rolls it back.

pub mod certificates;
pub mod private_keys;
pub mod records;
pub mod subscriptions;

use crate::error::Result;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub use certificates::X509CertificateRepository;
pub use private_keys::X509PrivateKeyRepository;
pub use subscriptions::X509SubscriptionRepository;

pub struct Store {
    pool: SqlitePool,
    certificates: X509CertificateRepository,
    private_keys: X509PrivateKeyRepository,
    subscriptions: X509SubscriptionRepository,
}

impl Store {
    /// Open (and create if missing) the database behind `dsn`.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let mut options = SqliteConnectOptions::from_str(dsn)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        // WAL has no effect on in-memory databases.
        if !dsn.contains(":memory:") {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // SQLite permits a single writer; one pooled connection sidesteps
        // "database is locked" failures under concurrent handlers.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Store {
            pool,
            certificates: X509CertificateRepository,
            private_keys: X509PrivateKeyRepository,
            subscriptions: X509SubscriptionRepository,
        })
    }

    /// Apply the SQL migrations found under `base_path`.
    pub async fn migrate_from(&self, base_path: &Path) -> Result<()> {
        let migrator = sqlx::migrate::Migrator::new(base_path).await?;
        migrator.run(&self.pool).await?;
        Ok(())
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    pub fn certificates(&self) -> &X509CertificateRepository {
        &self.certificates
    }

    pub fn private_keys(&self) -> &X509PrivateKeyRepository {
        &self.private_keys
    }

    pub fn subscriptions(&self) -> &X509SubscriptionRepository {
        &self.subscriptions
    }
}
