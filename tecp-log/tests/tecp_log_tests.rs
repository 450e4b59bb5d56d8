use sha2::{Digest, Sha256};
use tecp_log::{leaf_hash, TransparencyLog};
use tecp_receipt::LogClient;

#[test]
fn log_survives_reopen_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tecp-log.sqlite3");

    let inclusion = {
        let log = TransparencyLog::open(&path).unwrap();
        log.append("git:abc123", &Sha256::digest(b"receipt-one")).unwrap()
    };

    let log = TransparencyLog::open(&path).unwrap();
    let leaf = leaf_hash(&Sha256::digest(b"receipt-one"));
    assert!(log.verify_inclusion(&leaf, &inclusion).unwrap());

    let sth = log.root().unwrap();
    assert_eq!(sth.tree_size, 1);
}

#[test]
fn appending_many_entries_keeps_every_proof_valid() {
    let log = TransparencyLog::open_in_memory().unwrap();
    let mut inclusions = Vec::new();
    for i in 0..50u32 {
        let digest = Sha256::digest(i.to_be_bytes());
        inclusions.push((digest.to_vec(), log.append("git:abc123", &digest).unwrap()));
    }

    // Every earlier inclusion proof, recomputed against later tree states
    // via `proof()`, must still validate against the log's current root.
    for (receipt_hash, inclusion) in &inclusions {
        let fresh = log.proof(inclusion.leaf_index).unwrap();
        let leaf = leaf_hash(receipt_hash);
        assert!(log.verify_inclusion(&leaf, &fresh).unwrap());
    }
}

#[test]
fn rotated_key_retires_old_sth_signer() {
    let log = TransparencyLog::open_in_memory().unwrap();
    log.append("git:abc123", &Sha256::digest(b"r1")).unwrap();
    let sth_before = log.root().unwrap();

    log.rotate_keys().unwrap();
    log.append("git:abc123", &Sha256::digest(b"r2")).unwrap();
    let sth_after = log.root().unwrap();

    assert_ne!(sth_before.signer_pubkey, sth_after.signer_pubkey);
    assert!(tecp_log::verify_sth(&sth_after));
}
