//! Bulk import pipeline.
//!
//! One import call takes a pile of certificate and private key PEM blocks
//! and reconciles them against the store inside a single transaction:
//! dedup, parse, link keys to certificates by public key identity, discover
//! parent/child signing relations both inside the batch and against stored
//! rows, persist new rows parents-first, then run the deferred updates that
//! re-link pre-existing rows. Any failure rolls the whole batch back.

use crate::error::{Result, VaultError};
use crate::hashing::{hash_bytes, hash_public_key};
use crate::key_parser::parse_private_key;
use crate::store::records::{
    truncate_to_millis, X509CertificateRecord, X509PrivateKeyRecord,
};
use crate::store::Store;
use crate::x509::{parse_certificate, parse_stored_der, signed_by};
use chrono::Utc;
use openssl::x509::X509;
use pem::Pem;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

pub struct X509ImportService {
    store: Arc<Store>,
}

impl X509ImportService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Import certificate and private key PEM blocks atomically.
    ///
    /// Returns the stored forms: new and pre-existing certificates (new
    /// ones first, in persistence order), and the keys of the batch.
    pub async fn import(
        &self,
        cert_pems: &[Pem],
        key_pems: &[Pem],
    ) -> Result<(Vec<X509CertificateRecord>, Vec<X509PrivateKeyRecord>)> {
        let mut tx = self.store.begin().await?;
        let result = self.import_in_tx(&mut tx, cert_pems, key_pems).await?;
        tx.commit().await?;
        Ok(result)
    }

    async fn import_in_tx(
        &self,
        conn: &mut SqliteConnection,
        cert_pems: &[Pem],
        key_pems: &[Pem],
    ) -> Result<(Vec<X509CertificateRecord>, Vec<X509PrivateKeyRecord>)> {
        let now = truncate_to_millis(Utc::now());

        // Parse and persist keys first so certificates can reference them.
        let mut keys = Vec::new();
        for block in dedup_blocks(key_pems) {
            let (pkey, key_type) = parse_private_key(block.contents())?;
            let record = X509PrivateKeyRecord {
                id: Uuid::new_v4(),
                key_type,
                pem_block_type: block.tag().to_string(),
                bytes_hash: hash_bytes(block.contents())?,
                bytes: block.contents().to_vec(),
                public_key_hash: hash_public_key(&pkey)?,
                created_at: now,
            };
            let stored = self.store.private_keys().get_or_create(conn, &record).await?;
            keys.push(stored);
        }

        let mut parsed_certs = Vec::new();
        for block in dedup_blocks(cert_pems) {
            parsed_certs.push(parse_certificate(block.contents(), now)?);
        }

        let (mut to_create, existing) = self.partition_existing(conn, parsed_certs).await?;

        // The openssl view of each new certificate, for signature checks.
        let parsed: HashMap<Uuid, X509> = to_create
            .iter()
            .map(|cert| Ok((cert.id, parse_stored_der(&cert.bytes)?)))
            .collect::<Result<_>>()?;

        let mut deferred = self
            .link_private_keys(conn, &keys, &mut to_create)
            .await?;
        link_batch_parents(&mut to_create, &parsed);
        self.link_parents_from_store(conn, &mut to_create, &parsed)
            .await?;
        let parent_backlinks = self
            .link_store_orphans_to_batch(conn, &to_create, &parsed)
            .await?;
        deferred.extend(parent_backlinks);

        let created = self
            .sort_and_persist(conn, to_create, &parsed)
            .await?;

        self.execute_deferred_updates(conn, deferred).await?;

        let mut certs = created;
        certs.extend(existing);
        Ok((certs, keys))
    }

    /// Split parsed certificates into rows to insert and rows the store
    /// already holds (matched on `bytes_hash`; the stored form wins so its
    /// id stays usable).
    async fn partition_existing(
        &self,
        conn: &mut SqliteConnection,
        parsed: Vec<X509CertificateRecord>,
    ) -> Result<(Vec<X509CertificateRecord>, Vec<X509CertificateRecord>)> {
        let hashes: Vec<Vec<u8>> = parsed.iter().map(|c| c.bytes_hash.clone()).collect();
        let existing = self
            .store
            .certificates()
            .find_by_bytes_hashes(conn, &hashes)
            .await?;

        let to_create = parsed
            .into_iter()
            .filter(|cert| !existing.iter().any(|e| e.bytes_hash == cert.bytes_hash))
            .collect();

        Ok((to_create, existing))
    }

    /// Attach keys to the batch certificates (batch keys first, then the
    /// store), and queue updates for stored certificates whose key just
    /// arrived in this batch.
    async fn link_private_keys(
        &self,
        conn: &mut SqliteConnection,
        keys: &[X509PrivateKeyRecord],
        to_create: &mut [X509CertificateRecord],
    ) -> Result<Vec<X509CertificateRecord>> {
        for cert in to_create.iter_mut() {
            if let Some(key) = keys
                .iter()
                .find(|k| k.public_key_hash == cert.public_key_hash)
            {
                cert.private_key_id = Some(key.id);
                continue;
            }

            if let Some(key) = self
                .store
                .private_keys()
                .find_by_public_key_hash(conn, &cert.public_key_hash)
                .await?
            {
                cert.private_key_id = Some(key.id);
            }
        }

        let mut deferred = Vec::new();
        for key in keys {
            let unlinked = self
                .store
                .certificates()
                .find_by_public_key_hash_no_private_key(conn, &key.public_key_hash)
                .await?;
            for mut cert in unlinked {
                cert.private_key_id = Some(key.id);
                deferred.push(cert);
            }
        }

        Ok(deferred)
    }

    /// Find parents in the store for batch certificates. Every candidate
    /// with the right subject is re-verified; among verifying candidates
    /// the one with the latest `not_before` wins (a re-issued CA keeps its
    /// subject and key, and the freshest issuance is the meaningful parent).
    async fn link_parents_from_store(
        &self,
        conn: &mut SqliteConnection,
        to_create: &mut [X509CertificateRecord],
        parsed: &HashMap<Uuid, X509>,
    ) -> Result<()> {
        for cert in to_create.iter_mut() {
            let child = &parsed[&cert.id];
            let candidates = self
                .store
                .certificates()
                .find_by_subject_hash(conn, &cert.issuer_hash)
                .await?;

            let mut best: Option<&X509CertificateRecord> = None;
            for candidate in &candidates {
                let candidate_cert = parse_stored_der(&candidate.bytes)?;
                if !signed_by(child, &candidate_cert) {
                    continue;
                }
                if best.map_or(true, |b| candidate.not_before > b.not_before) {
                    best = Some(candidate);
                }
            }

            if let Some(parent) = best {
                cert.parent_certificate_id = Some(parent.id);
            }
        }
        Ok(())
    }

    /// Stored certificates missing a parent may have just received one in
    /// this batch; queue their re-link for after the batch is persisted.
    async fn link_store_orphans_to_batch(
        &self,
        conn: &mut SqliteConnection,
        to_create: &[X509CertificateRecord],
        parsed: &HashMap<Uuid, X509>,
    ) -> Result<Vec<X509CertificateRecord>> {
        let mut deferred = Vec::new();
        for cert in to_create {
            let parent_cert = &parsed[&cert.id];
            let orphans = self
                .store
                .certificates()
                .find_by_issuer_hash_no_parent(conn, &cert.subject_hash)
                .await?;
            for mut orphan in orphans {
                let orphan_cert = parse_stored_der(&orphan.bytes)?;
                if signed_by(&orphan_cert, parent_cert) {
                    orphan.parent_certificate_id = Some(cert.id);
                    deferred.push(orphan);
                }
            }
        }
        Ok(deferred)
    }

    /// Persist the batch parents-first so the self-referential foreign key
    /// holds at every intermediate statement.
    async fn sort_and_persist(
        &self,
        conn: &mut SqliteConnection,
        to_create: Vec<X509CertificateRecord>,
        parsed: &HashMap<Uuid, X509>,
    ) -> Result<Vec<X509CertificateRecord>> {
        let order = topological_order(&to_create, parsed)?;

        let mut created = Vec::with_capacity(to_create.len());
        for index in order {
            let stored = self
                .store
                .certificates()
                .get_or_create(conn, &to_create[index])
                .await?;
            created.push(stored);
        }
        Ok(created)
    }

    /// Run the queued updates for pre-existing rows. Each must hit exactly
    /// one row; a vanished row means the transaction's view broke.
    async fn execute_deferred_updates(
        &self,
        conn: &mut SqliteConnection,
        deferred: Vec<X509CertificateRecord>,
    ) -> Result<()> {
        for update in merge_deferred_updates(deferred) {
            debug!(certificate_id = %update.id, "applying deferred link update");
            let updated = self.store.certificates().update(conn, &update).await?;
            if !updated {
                return Err(VaultError::Consistency(format!(
                    "certificate {} was supposed to be updated but was not",
                    update.id
                )));
            }
        }
        Ok(())
    }
}

/// Drop exact duplicates (same label, same payload) keeping first
/// occurrences in order.
fn dedup_blocks(blocks: &[Pem]) -> Vec<Pem> {
    let mut result: Vec<Pem> = Vec::new();
    for block in blocks {
        let duplicate = result
            .iter()
            .any(|b| b.tag() == block.tag() && b.contents() == block.contents());
        if !duplicate {
            result.push(block.clone());
        }
    }
    result
}

/// Link parents within the batch: for each ordered pair, a candidate whose
/// subject matches the child's issuer and whose key verifies the child's
/// signature becomes the parent. The last verifying candidate in input
/// order wins.
fn link_batch_parents(to_create: &mut [X509CertificateRecord], parsed: &HashMap<Uuid, X509>) {
    for child_idx in 0..to_create.len() {
        for parent_idx in 0..to_create.len() {
            if child_idx == parent_idx {
                continue;
            }
            if to_create[parent_idx].subject_hash != to_create[child_idx].issuer_hash {
                continue;
            }
            let child = &parsed[&to_create[child_idx].id];
            let parent = &parsed[&to_create[parent_idx].id];
            if signed_by(child, parent) {
                let parent_id = to_create[parent_idx].id;
                to_create[child_idx].parent_certificate_id = Some(parent_id);
            }
        }
    }
}

/// Order batch indices parents-before-children by re-checking signatures
/// pairwise. Certificates without any edge go last. A back-edge in the
/// graph cannot come from honest signatures and is rejected.
fn topological_order(
    certs: &[X509CertificateRecord],
    parsed: &HashMap<Uuid, X509>,
) -> Result<Vec<usize>> {
    let n = certs.len();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut has_edge = vec![false; n];

    for parent_idx in 0..n {
        for child_idx in 0..n {
            if parent_idx == child_idx {
                continue;
            }
            if certs[parent_idx].subject_hash != certs[child_idx].issuer_hash {
                continue;
            }
            let child = &parsed[&certs[child_idx].id];
            let parent = &parsed[&certs[parent_idx].id];
            if signed_by(child, parent) {
                children[parent_idx].push(child_idx);
                has_edge[parent_idx] = true;
                has_edge[child_idx] = true;
            }
        }
    }

    const UNVISITED: u8 = 0;
    const IN_PROGRESS: u8 = 1;
    const DONE: u8 = 2;

    fn visit(
        node: usize,
        children: &[Vec<usize>],
        state: &mut [u8],
        post_order: &mut Vec<usize>,
    ) -> Result<()> {
        match state[node] {
            DONE => return Ok(()),
            IN_PROGRESS => {
                return Err(VaultError::Consistency(
                    "certificate parent graph contains a cycle".to_string(),
                ))
            }
            _ => {}
        }
        state[node] = IN_PROGRESS;
        for &child in &children[node] {
            visit(child, children, state, post_order)?;
        }
        state[node] = DONE;
        post_order.push(node);
        Ok(())
    }

    let mut state = vec![UNVISITED; n];
    let mut post_order = Vec::new();
    for node in 0..n {
        if has_edge[node] && state[node] == UNVISITED {
            visit(node, &children, &mut state, &mut post_order)?;
        }
    }

    // Post-order lists children first; reverse for parents-first.
    let mut order: Vec<usize> = post_order.into_iter().rev().collect();
    order.extend((0..n).filter(|&i| !has_edge[i]));
    Ok(order)
}

/// Collapse deferred updates touching the same row so that a key link and
/// a parent link discovered in different phases do not overwrite each
/// other (links only ever transition from unset to set).
fn merge_deferred_updates(deferred: Vec<X509CertificateRecord>) -> Vec<X509CertificateRecord> {
    let mut merged: Vec<X509CertificateRecord> = Vec::new();
    for update in deferred {
        if let Some(existing) = merged.iter_mut().find(|u| u.id == update.id) {
            existing.parent_certificate_id = existing
                .parent_certificate_id
                .or(update.parent_certificate_id);
            existing.private_key_id = existing.private_key_id.or(update.private_key_id);
        } else {
            merged.push(update);
        }
    }
    merged
}
