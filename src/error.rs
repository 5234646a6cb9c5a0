//! Error types for the PKI vault.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in vault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    /// PEM input could not be decoded, or carried bytes beyond the armor.
    #[error("invalid pem: {0}")]
    InvalidPem(String),

    /// No private key decoder accepted the DER payload.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// Certificate DER failed to parse or carries an unsupported key.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// One or more referenced subscriptions do not exist.
    #[error("unknown subscriptions: {}", format_ids(.0))]
    UnknownSubscriptions(Vec<Uuid>),

    /// A subscription request failed validation.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// The store contradicted an invariant mid-transaction.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// Database I/O, constraint or connection failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Unexpected failure inside a crypto primitive.
    #[error("crypto error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),

    /// Configuration file missing or malformed.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VaultError>;

fn format_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
