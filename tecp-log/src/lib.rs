//! Append-only Merkle transparency log (TECP component C4), RFC 6962
//! hashing over a `rusqlite` store.
//!
//! The tree is recomputed from the full leaf set on every `append` and
//! `proof` call rather than maintained incrementally. Append volume for a
//! trust root is modest (receipts, not arbitrary blockchain traffic), and a
//! recompute-per-call design means there is no incremental tree-update
//! invariant to get wrong; it trades O(n) work per append for zero state
//! beyond the leaf list.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use thiserror::Error;

use tecp_receipt::{LogClient, LogClientError, LogInclusion};

mod merkle;
pub use merkle::{leaf_hash, node_hash, root_from_inclusion_proof, ReconstructError};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("no active signing key")]
    NoActiveKey,
    #[error("unknown leaf index {0}")]
    UnknownLeaf(u64),
    #[error("log is empty")]
    Empty,
}

impl From<LogError> for LogClientError {
    fn from(e: LogError) -> Self {
        LogClientError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Next,
    Active,
    Revoked,
}

impl KeyState {
    fn as_str(self) -> &'static str {
        match self {
            KeyState::Next => "next",
            KeyState::Active => "active",
            KeyState::Revoked => "revoked",
        }
    }

    fn from_str(s: &str) -> Option<KeyState> {
        match s {
            "next" => Some(KeyState::Next),
            "active" => Some(KeyState::Active),
            "revoked" => Some(KeyState::Revoked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub kid: i64,
    pub pubkey: Vec<u8>,
    pub state: KeyState,
    pub created_ms: i64,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub leaf_index: u64,
    pub code_ref: String,
    pub receipt_hash: Vec<u8>,
    pub leaf_hash: Vec<u8>,
    pub created_ms: i64,
}

/// A signed tree head: the log's periodically published commitment to its
/// current state. `kid` identifies the signing key in the key registry so
/// a verifier can resolve the right public key even across rotations;
/// `signer_pubkey` is carried alongside it so the STH is independently
/// verifiable without a separate registry lookup.
#[derive(Debug, Clone)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub root_hash: Vec<u8>,
    pub signed_ms: i64,
    pub sig: Vec<u8>,
    pub kid: i64,
    pub signer_pubkey: Vec<u8>,
}

/// A signed wall-clock timestamp, tied to the current root so it endorses
/// "now, as of this tree state" rather than a bare clock reading. Its
/// preimage (`"TECP-TIME" || ts_ms || root_hash || kid`) is byte-disjoint
/// from the STH preimage (`"TECP-STH" || ...`) so neither signature can be
/// replayed as the other.
#[derive(Debug, Clone)]
pub struct SignedTimestamp {
    pub ts_ms: i64,
    pub root_hash: Vec<u8>,
    pub sig: Vec<u8>,
    pub kid: i64,
    pub signer_pubkey: Vec<u8>,
}

/// The append-only transparency log. Holds a single serialized connection
/// behind a mutex: every write (`append`, `rotate_keys`) takes the lock for
/// its whole transaction, which is the log's only concurrency control.
pub struct TransparencyLog {
    conn: Mutex<Connection>,
}

impl TransparencyLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, LogError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, LogError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entries (
                leaf_index   INTEGER PRIMARY KEY,
                code_ref     TEXT NOT NULL,
                receipt_hash BLOB NOT NULL,
                leaf_hash    BLOB NOT NULL,
                created_ms   INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS roots (
                tree_size      INTEGER PRIMARY KEY,
                root_hash      BLOB NOT NULL,
                signed_ms      INTEGER NOT NULL,
                sig            BLOB NOT NULL,
                kid            INTEGER NOT NULL,
                signer_pubkey  BLOB NOT NULL
            );
            CREATE TABLE IF NOT EXISTS keys (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                pubkey      BLOB NOT NULL,
                privkey     BLOB NOT NULL,
                state       TEXT NOT NULL,
                created_ms  INTEGER NOT NULL
            );",
        )?;
        let log = TransparencyLog {
            conn: Mutex::new(conn),
        };
        if log.active_key()?.is_none() {
            log.seed_first_key()?;
        }
        Ok(log)
    }

    fn seed_first_key(&self) -> Result<(), LogError> {
        let mut csprng = rand::rngs::OsRng;
        let key = SigningKey::generate(&mut csprng);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO keys (pubkey, privkey, state, created_ms) VALUES (?1, ?2, ?3, ?4)",
            params![
                key.verifying_key().to_bytes().to_vec(),
                key.to_bytes().to_vec(),
                KeyState::Active.as_str(),
                now_ms()
            ],
        )?;
        Ok(())
    }

    fn active_key(&self) -> Result<Option<(i64, SigningKey)>, LogError> {
        let conn = self.conn.lock();
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT id, privkey FROM keys WHERE state = ?1 ORDER BY id DESC LIMIT 1",
                params![KeyState::Active.as_str()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(kid, bytes)| (kid, SigningKey::from_bytes(&to_array32(&bytes)))))
    }

    /// Resolve a historical public key by `kid`, including revoked ones —
    /// an STH a revoked key signed in the past must still verify.
    pub fn resolve_key(&self, kid: i64) -> Result<Option<Vec<u8>>, LogError> {
        let conn = self.conn.lock();
        conn.query_row("SELECT pubkey FROM keys WHERE id = ?1", params![kid], |r| r.get(0))
            .optional()
            .map_err(LogError::from)
    }

    /// Rotate keys: the active key is revoked, the `next` key (if any)
    /// becomes active, and a fresh `next` key is generated. Matches the
    /// lifecycle `next -> active -> revoked`.
    pub fn rotate_keys(&self) -> Result<(), LogError> {
        let mut csprng = rand::rngs::OsRng;
        let fresh_next = SigningKey::generate(&mut csprng);
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE keys SET state = ?1 WHERE state = ?2",
            params![KeyState::Revoked.as_str(), KeyState::Active.as_str()],
        )?;
        let promoted = conn.execute(
            "UPDATE keys SET state = ?1 WHERE state = ?2",
            params![KeyState::Active.as_str(), KeyState::Next.as_str()],
        )?;
        if promoted == 0 {
            // No queued successor: promote a brand new key directly to active
            // so the log is never left without a signer.
            conn.execute(
                "INSERT INTO keys (pubkey, privkey, state, created_ms) VALUES (?1, ?2, ?3, ?4)",
                params![
                    fresh_next.verifying_key().to_bytes().to_vec(),
                    fresh_next.to_bytes().to_vec(),
                    KeyState::Active.as_str(),
                    now_ms()
                ],
            )?;
        } else {
            conn.execute(
                "INSERT INTO keys (pubkey, privkey, state, created_ms) VALUES (?1, ?2, ?3, ?4)",
                params![
                    fresh_next.verifying_key().to_bytes().to_vec(),
                    fresh_next.to_bytes().to_vec(),
                    KeyState::Next.as_str(),
                    now_ms()
                ],
            )?;
        }
        tracing::warn!("rotated log signing key; previously active key is now revoked");
        Ok(())
    }

    pub fn queue_next_key(&self) -> Result<(), LogError> {
        let mut csprng = rand::rngs::OsRng;
        let key = SigningKey::generate(&mut csprng);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO keys (pubkey, privkey, state, created_ms) VALUES (?1, ?2, ?3, ?4)",
            params![
                key.verifying_key().to_bytes().to_vec(),
                key.to_bytes().to_vec(),
                KeyState::Next.as_str(),
                now_ms()
            ],
        )?;
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<KeyRecord>, LogError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id, pubkey, state, created_ms FROM keys ORDER BY id")?;
        let rows = stmt
            .query_map([], |r| {
                let state_str: String = r.get(2)?;
                Ok(KeyRecord {
                    kid: r.get(0)?,
                    pubkey: r.get(1)?,
                    state: KeyState::from_str(&state_str).unwrap_or(KeyState::Revoked),
                    created_ms: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn all_leaf_hashes(conn: &Connection) -> Result<Vec<Vec<u8>>, LogError> {
        let mut stmt = conn.prepare("SELECT leaf_hash FROM entries ORDER BY leaf_index")?;
        let rows = stmt
            .query_map([], |r| r.get::<_, Vec<u8>>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Append a new entry, recompute the tree, and sign a fresh tree head.
    /// Four steps in one transaction: insert the entry, recompute the
    /// root, sign it, persist the new signed root. Any failure rolls the
    /// whole append back; a receipt is never handed a `LogInclusion` that
    /// the log itself didn't durably commit to.
    pub fn append(&self, code_ref: &str, receipt_hash: &[u8]) -> Result<LogInclusion, LogError> {
        let (kid, signing_key) = self.active_key()?.ok_or(LogError::NoActiveKey)?;
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let created = now_ms();
        let leaf = leaf_hash(receipt_hash);
        // Leaf indices are 1-based (spec.md section 3, "strictly monotonically
        // starting at 1"); the 0-based position in the in-memory leaf vector
        // used to walk the Merkle tree is always `leaf_index - 1`.
        let leaf_index: i64 = tx.query_row(
            "SELECT COALESCE(MAX(leaf_index) + 1, 1) FROM entries",
            [],
            |r| r.get(0),
        )?;
        tx.execute(
            "INSERT INTO entries (leaf_index, code_ref, receipt_hash, leaf_hash, created_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![leaf_index, code_ref, receipt_hash, leaf.clone(), created],
        )?;
        let leaf_index = leaf_index as u64;

        let leaves = Self::all_leaf_hashes(&tx)?;
        let tree_size = leaves.len() as u64;
        let root_hash = merkle::mth(&leaves);
        let signed_ms = now_ms();
        let sth_sig = sign_sth(&signing_key, tree_size, &root_hash, signed_ms);

        tx.execute(
            "INSERT INTO roots (tree_size, root_hash, signed_ms, sig, kid, signer_pubkey)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(tree_size) DO UPDATE SET
                root_hash = excluded.root_hash,
                signed_ms = excluded.signed_ms,
                sig = excluded.sig,
                kid = excluded.kid,
                signer_pubkey = excluded.signer_pubkey",
            params![
                tree_size as i64,
                root_hash.clone(),
                signed_ms,
                sth_sig.clone(),
                kid,
                signing_key.verifying_key().to_bytes().to_vec()
            ],
        )?;

        let proof = merkle::audit_path(&leaves, (leaf_index - 1) as usize);
        tx.commit()?;

        tracing::info!(leaf_index, tree_size, code_ref, "appended log entry");

        Ok(LogInclusion {
            leaf_index,
            tree_size,
            merkle_proof: proof,
            log_root: root_hash,
        })
    }

    /// Recompute the inclusion proof for an existing leaf against the
    /// current tree. `leaf_index` is 1-based; the Merkle tree position is
    /// `leaf_index - 1`.
    pub fn proof(&self, leaf_index: u64) -> Result<LogInclusion, LogError> {
        let conn = self.conn.lock();
        let leaves = Self::all_leaf_hashes(&conn)?;
        if leaf_index == 0 || (leaf_index - 1) as usize >= leaves.len() {
            return Err(LogError::UnknownLeaf(leaf_index));
        }
        let position = (leaf_index - 1) as usize;
        let tree_size = leaves.len() as u64;
        let root_hash = merkle::mth(&leaves);
        let proof = merkle::audit_path(&leaves, position);
        Ok(LogInclusion {
            leaf_index,
            tree_size,
            merkle_proof: proof,
            log_root: root_hash,
        })
    }

    /// The current signed tree head, recomputed from the live leaf set.
    pub fn root(&self) -> Result<SignedTreeHead, LogError> {
        let (kid, signing_key) = self.active_key()?.ok_or(LogError::NoActiveKey)?;
        let conn = self.conn.lock();
        let leaves = Self::all_leaf_hashes(&conn)?;
        let tree_size = leaves.len() as u64;
        let root_hash = merkle::mth(&leaves);
        let signed_ms = now_ms();
        let sig = sign_sth(&signing_key, tree_size, &root_hash, signed_ms);
        Ok(SignedTreeHead {
            tree_size,
            root_hash,
            signed_ms,
            sig,
            kid,
            signer_pubkey: signing_key.verifying_key().to_bytes().to_vec(),
        })
    }

    /// Any historical root this log has published, by tree size.
    pub fn root_at(&self, tree_size: u64) -> Result<Option<SignedTreeHead>, LogError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT tree_size, root_hash, signed_ms, sig, kid, signer_pubkey
             FROM roots WHERE tree_size = ?1",
            params![tree_size as i64],
            |r| {
                let tree_size: i64 = r.get(0)?;
                Ok(SignedTreeHead {
                    tree_size: tree_size as u64,
                    root_hash: r.get(1)?,
                    signed_ms: r.get(2)?,
                    sig: r.get(3)?,
                    kid: r.get(4)?,
                    signer_pubkey: r.get(5)?,
                })
            },
        )
        .optional()
        .map_err(LogError::from)
    }

    /// The `limit` most recently appended entries, newest first. Intended
    /// for mirroring and debugging (spec.md section 4.4.2), not for paging
    /// through the whole log in order.
    pub fn entries(&self, limit: u64) -> Result<Vec<LogEntry>, LogError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT leaf_index, code_ref, receipt_hash, leaf_hash, created_ms
             FROM entries ORDER BY leaf_index DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |r| {
                let leaf_index: i64 = r.get(0)?;
                Ok(LogEntry {
                    leaf_index: leaf_index as u64,
                    code_ref: r.get(1)?,
                    receipt_hash: r.get(2)?,
                    leaf_hash: r.get(3)?,
                    created_ms: r.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// A signed wall-clock attestation, independent of tree state.
    pub fn signed_time(&self) -> Result<SignedTimestamp, LogError> {
        let (kid, signing_key) = self.active_key()?.ok_or(LogError::NoActiveKey)?;
        let ts_ms = now_ms();
        let root_hash = {
            let conn = self.conn.lock();
            merkle::mth(&Self::all_leaf_hashes(&conn)?)
        };
        let sig = sign_timestamp(&signing_key, ts_ms, &root_hash);
        Ok(SignedTimestamp {
            ts_ms,
            root_hash,
            sig,
            kid,
            signer_pubkey: signing_key.verifying_key().to_bytes().to_vec(),
        })
    }
}

impl LogClient for TransparencyLog {
    fn append(&self, code_ref: &str, receipt_hash: &[u8]) -> Result<LogInclusion, LogClientError> {
        TransparencyLog::append(self, code_ref, receipt_hash).map_err(Into::into)
    }

    fn verify_inclusion(&self, leaf_hash: &[u8], proof: &LogInclusion) -> Result<bool, LogClientError> {
        if proof.leaf_index == 0 {
            return Ok(false);
        }
        // `root_from_inclusion_proof` walks the tree by 0-based position;
        // `LogInclusion::leaf_index` is the 1-based external index.
        let reconstructed = match root_from_inclusion_proof(
            leaf_hash,
            proof.leaf_index - 1,
            proof.tree_size,
            &proof.merkle_proof,
        ) {
            Ok(root) => root,
            Err(_) => return Ok(false),
        };
        if reconstructed != proof.log_root {
            return Ok(false);
        }
        // The root must also be one the log itself actually published.
        let known = self.root_at(proof.tree_size)?;
        Ok(known.is_some_and(|sth| sth.root_hash == proof.log_root))
    }
}

/// Preimage: `"TECP-STH" || tree_size (8 BE bytes) || root_hash || signed_ms (8 BE bytes)`.
/// Kept byte-disjoint from the timestamp preimage below so no signature is
/// ambiguous between the two purposes.
fn sign_sth(key: &SigningKey, tree_size: u64, root_hash: &[u8], signed_ms: i64) -> Vec<u8> {
    let mut preimage = Vec::with_capacity(8 + 8 + root_hash.len() + 8);
    preimage.extend_from_slice(b"TECP-STH");
    preimage.extend_from_slice(&tree_size.to_be_bytes());
    preimage.extend_from_slice(root_hash);
    preimage.extend_from_slice(&signed_ms.to_be_bytes());
    key.sign(&preimage).to_bytes().to_vec()
}

pub fn verify_sth(sth: &SignedTreeHead) -> bool {
    let Ok(pubkey) = VerifyingKey::from_bytes(&to_array32(&sth.signer_pubkey)) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&sth.sig) else {
        return false;
    };
    let mut preimage = Vec::with_capacity(8 + 8 + sth.root_hash.len() + 8);
    preimage.extend_from_slice(b"TECP-STH");
    preimage.extend_from_slice(&sth.tree_size.to_be_bytes());
    preimage.extend_from_slice(&sth.root_hash);
    preimage.extend_from_slice(&sth.signed_ms.to_be_bytes());
    pubkey.verify(&preimage, &sig).is_ok()
}

/// Preimage: `"TECP-TIME" || ts_ms (8 BE bytes) || root_hash`. Distinct
/// literal prefix and field set from the STH preimage above, so a signature
/// over one can never be replayed as valid for the other.
fn sign_timestamp(key: &SigningKey, ts_ms: i64, root_hash: &[u8]) -> Vec<u8> {
    let mut preimage = Vec::with_capacity(9 + 8 + root_hash.len());
    preimage.extend_from_slice(b"TECP-TIME");
    preimage.extend_from_slice(&ts_ms.to_be_bytes());
    preimage.extend_from_slice(root_hash);
    key.sign(&preimage).to_bytes().to_vec()
}

pub fn verify_signed_time(stamp: &SignedTimestamp) -> bool {
    let Ok(pubkey) = VerifyingKey::from_bytes(&to_array32(&stamp.signer_pubkey)) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(&stamp.sig) else {
        return false;
    };
    let mut preimage = Vec::with_capacity(9 + 8 + stamp.root_hash.len());
    preimage.extend_from_slice(b"TECP-TIME");
    preimage.extend_from_slice(&stamp.ts_ms.to_be_bytes());
    preimage.extend_from_slice(&stamp.root_hash);
    pubkey.verify(&preimage, &sig).is_ok()
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before Unix epoch")
        .as_millis() as i64
}

fn to_array32(bytes: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let n = bytes.len().min(32);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_proof_round_trips() {
        let log = TransparencyLog::open_in_memory().unwrap();
        let mut inclusions = Vec::new();
        for i in 0..7u8 {
            let hash = Sha256::digest([i]).to_vec();
            inclusions.push(log.append("git:abc", &hash).unwrap());
        }

        for (i, inclusion) in inclusions.iter().enumerate() {
            let leaf = leaf_hash(&Sha256::digest([i as u8]));
            let ok = log.verify_inclusion(&leaf, inclusion).unwrap();
            assert!(ok, "leaf {i} failed inclusion check");
        }
    }

    #[test]
    fn stale_inclusion_proof_still_verifies_against_its_own_tree_size() {
        let log = TransparencyLog::open_in_memory().unwrap();
        let hash0 = Sha256::digest([0u8]).to_vec();
        let inclusion_at_1 = log.append("git:abc", &hash0).unwrap();
        for i in 1..5u8 {
            let hash = Sha256::digest([i]).to_vec();
            log.append("git:abc", &hash).unwrap();
        }

        let leaf0 = leaf_hash(&hash0);
        assert!(log.verify_inclusion(&leaf0, &inclusion_at_1).unwrap());
    }

    #[test]
    fn tampered_root_fails_verification() {
        let log = TransparencyLog::open_in_memory().unwrap();
        let hash0 = Sha256::digest([0u8]).to_vec();
        let mut inclusion = log.append("git:abc", &hash0).unwrap();
        inclusion.log_root[0] ^= 0xFF;

        let leaf0 = leaf_hash(&hash0);
        assert!(!log.verify_inclusion(&leaf0, &inclusion).unwrap());
    }

    #[test]
    fn sth_is_self_consistent_and_signed() {
        let log = TransparencyLog::open_in_memory().unwrap();
        for i in 0..3u8 {
            log.append("git:abc", &Sha256::digest([i])).unwrap();
        }
        let sth = log.root().unwrap();
        assert_eq!(sth.tree_size, 3);
        assert!(verify_sth(&sth));
    }

    #[test]
    fn signed_time_is_distinguishable_from_sth_signature() {
        let log = TransparencyLog::open_in_memory().unwrap();
        log.append("git:abc", &Sha256::digest([0u8])).unwrap();
        let sth = log.root().unwrap();
        let stamp = log.signed_time().unwrap();
        assert!(verify_sth(&sth));
        assert!(verify_signed_time(&stamp));
        // Cross-using one signature for the other's preimage must fail.
        let cross = SignedTreeHead {
            tree_size: stamp.ts_ms as u64,
            root_hash: stamp.root_hash.clone(),
            signed_ms: 0,
            sig: stamp.sig.clone(),
            kid: stamp.kid,
            signer_pubkey: stamp.signer_pubkey.clone(),
        };
        assert!(!verify_sth(&cross));
    }

    #[test]
    fn key_rotation_moves_next_to_active_and_retires_active() {
        let log = TransparencyLog::open_in_memory().unwrap();
        log.queue_next_key().unwrap();
        let before = log.keys().unwrap();
        assert_eq!(before.iter().filter(|k| k.state == KeyState::Active).count(), 1);
        assert_eq!(before.iter().filter(|k| k.state == KeyState::Next).count(), 1);

        log.rotate_keys().unwrap();
        let after = log.keys().unwrap();
        assert_eq!(after.iter().filter(|k| k.state == KeyState::Active).count(), 1);
        assert_eq!(after.iter().filter(|k| k.state == KeyState::Revoked).count(), 1);
    }

    #[test]
    fn entries_returns_most_recent_first() {
        let log = TransparencyLog::open_in_memory().unwrap();
        for i in 0..5u8 {
            log.append("git:abc", &Sha256::digest([i])).unwrap();
        }
        let page = log.entries(3).unwrap();
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].leaf_index, 5);
        assert_eq!(page[1].leaf_index, 4);
        assert_eq!(page[2].leaf_index, 3);
    }

    #[test]
    fn first_appended_entry_gets_leaf_index_one() {
        let log = TransparencyLog::open_in_memory().unwrap();
        let inclusion = log.append("git:abc", &Sha256::digest([0u8])).unwrap();
        assert_eq!(inclusion.leaf_index, 1);
    }

    #[test]
    fn proof_for_unknown_leaf_errors() {
        let log = TransparencyLog::open_in_memory().unwrap();
        log.append("git:abc", &Sha256::digest([0u8])).unwrap();
        assert!(matches!(log.proof(99), Err(LogError::UnknownLeaf(99))));
        assert!(matches!(log.proof(0), Err(LogError::UnknownLeaf(0))));
    }

    proptest::proptest! {
        #[test]
        fn every_leaf_in_a_random_size_tree_verifies(n in 1usize..64) {
            let log = TransparencyLog::open_in_memory().unwrap();
            let mut hashes = Vec::new();
            for i in 0..n {
                let h = Sha256::digest((i as u32).to_be_bytes()).to_vec();
                hashes.push(h.clone());
                log.append("git:abc", &h).unwrap();
            }
            for (i, h) in hashes.iter().enumerate() {
                let inclusion = log.proof((i + 1) as u64).unwrap();
                let leaf = leaf_hash(h);
                prop_assert!(log.verify_inclusion(&leaf, &inclusion).unwrap());
            }
        }
    }
}
