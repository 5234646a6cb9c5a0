//! PKI Vault - X.509 certificate and private key store
//!
//! A server that ingests X.509 certificates and private keys over a REST
//! API, indexes them by cryptographic identity, and reconstructs issuance
//! chains across imports. Downstream TLS consumers register subscriptions
//! on DNS names and poll for "what changed since T".
//!
//! # Overview
//!
//! Everything revolves around four identity digests computed at import
//! time: the canonical subject and issuer names, the raw DER bytes, and
//! algorithm-specific public key material. They make imports idempotent
//! (content addressing on `bytes_hash`), let a private key find its
//! certificates without ever comparing secrets (`public_key_hash`), and
//! turn chain reconstruction into an index lookup plus a signature check
//! (`subject_hash` / `issuer_hash`).
//!
//! The import pipeline runs as a single database transaction: keys are
//! persisted first, certificates are linked to keys and to parents (both
//! inside the batch and against stored rows), new rows are inserted
//! parents-first, and finally deferred updates re-link pre-existing rows
//! whose parent or key only just arrived. A failure anywhere rolls all of
//! it back.
//!
//! # Layout
//!
//! - [`hashing`], [`key_parser`], [`x509`], [`pem_util`]: parsing and
//!   identity primitives
//! - [`store`]: sqlx/SQLite repositories
//! - [`import`], [`updates`], [`subscriptions`]: the services
//! - [`webserver`], [`protocol`], [`configs`]: the HTTP surface

pub mod configs;
pub mod error;
pub mod hashing;
pub mod import;
pub mod key_parser;
pub mod pem_util;
pub mod protocol;
pub mod store;
pub mod subscriptions;
pub mod updates;
pub mod webserver;
pub mod x509;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{Result, VaultError};
