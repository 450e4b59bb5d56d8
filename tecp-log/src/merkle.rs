//! RFC 6962 Merkle tree hashing: leaf/node hash prefixes, tree head
//! computation, inclusion-proof generation, and inclusion-proof
//! verification against a bare leaf hash (no access to the other leaves).

use sha2::{Digest, Sha256};
use thiserror::Error;

/// `leaf_hash(x) = SHA-256(0x00 || x)`.
pub fn leaf_hash(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update([0x00]);
    hasher.update(data);
    hasher.finalize().to_vec()
}

/// `node_hash(l, r) = SHA-256(0x01 || l || r)`.
pub fn node_hash(left: &[u8], right: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update([0x01]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().to_vec()
}

/// Largest power of two strictly less than `n` (`n` must be >= 2).
fn split_point(n: usize) -> usize {
    let mut k = 1;
    while k * 2 < n {
        k *= 2;
    }
    k
}

/// Merkle Tree Hash over already-leaf-hashed entries. `SHA-256("")` for the
/// empty tree, matching RFC 6962's `MTH({}) = SHA-256()`.
pub fn mth(hashes: &[Vec<u8>]) -> Vec<u8> {
    match hashes.len() {
        0 => Sha256::digest([]).to_vec(),
        1 => hashes[0].clone(),
        n => {
            let k = split_point(n);
            node_hash(&mth(&hashes[..k]), &mth(&hashes[k..]))
        }
    }
}

/// The audit path (inclusion proof) for leaf `m` in a tree of
/// already-leaf-hashed entries, built by the same recursive split `mth`
/// uses. Entries are ordered leaf-to-root, matching RFC 6962's `PATH`
/// definition.
pub fn audit_path(hashes: &[Vec<u8>], m: usize) -> Vec<Vec<u8>> {
    fn go(hashes: &[Vec<u8>], m: usize) -> Vec<Vec<u8>> {
        let n = hashes.len();
        if n <= 1 {
            return Vec::new();
        }
        let k = split_point(n);
        if m < k {
            let mut path = go(&hashes[..k], m);
            path.push(mth(&hashes[k..]));
            path
        } else {
            let mut path = go(&hashes[k..], m - k);
            path.push(mth(&hashes[..k]));
            path
        }
    }
    go(hashes, m)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconstructError {
    #[error("leaf index {index} out of range for tree size {tree_size}")]
    IndexOutOfRange { index: u64, tree_size: u64 },
    #[error("proof has {got} entries, expected {expected}")]
    WrongProofLength { got: usize, expected: usize },
}

/// Reconstruct the Merkle root a leaf's inclusion proof implies, without
/// needing the rest of the tree. Mirrors `audit_path`'s recursive split so
/// the two stay structurally paired: whatever order `audit_path` emits
/// sibling hashes in, this consumes them in.
pub fn root_from_inclusion_proof(
    leaf_hash_value: &[u8],
    leaf_index: u64,
    tree_size: u64,
    proof: &[Vec<u8>],
) -> Result<Vec<u8>, ReconstructError> {
    if leaf_index >= tree_size {
        return Err(ReconstructError::IndexOutOfRange {
            index: leaf_index,
            tree_size,
        });
    }

    fn go(
        leaf: &[u8],
        m: usize,
        n: usize,
        proof: &[Vec<u8>],
        pos: &mut usize,
    ) -> Result<Vec<u8>, ReconstructError> {
        if n <= 1 {
            return Ok(leaf.to_vec());
        }
        let k = split_point(n);
        let combined = if m < k {
            let left = go(leaf, m, k, proof, pos)?;
            let right = proof
                .get(*pos)
                .ok_or(ReconstructError::WrongProofLength {
                    got: proof.len(),
                    expected: *pos + 1,
                })?
                .clone();
            *pos += 1;
            node_hash(&left, &right)
        } else {
            let right = go(leaf, m - k, n - k, proof, pos)?;
            let left = proof
                .get(*pos)
                .ok_or(ReconstructError::WrongProofLength {
                    got: proof.len(),
                    expected: *pos + 1,
                })?
                .clone();
            *pos += 1;
            node_hash(&left, &right)
        };
        Ok(combined)
    }

    let mut pos = 0;
    let root = go(leaf_hash_value, leaf_index as usize, tree_size as usize, proof, &mut pos)?;
    if pos != proof.len() {
        return Err(ReconstructError::WrongProofLength {
            got: proof.len(),
            expected: pos,
        });
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hashes(n: usize) -> Vec<Vec<u8>> {
        (0..n).map(|i| leaf_hash(&[i as u8])).collect()
    }

    #[test]
    fn single_leaf_tree_root_is_its_own_leaf_hash() {
        let hs = hashes(1);
        assert_eq!(mth(&hs), hs[0]);
    }

    #[test]
    fn empty_tree_hash_is_sha256_of_empty_string() {
        let root = mth(&[]);
        assert_eq!(root, Sha256::digest([]).to_vec());
    }

    #[test]
    fn every_leaf_proof_reconstructs_the_root() {
        for n in 1..40 {
            let hs = hashes(n);
            let root = mth(&hs);
            for m in 0..n {
                let proof = audit_path(&hs, m);
                let reconstructed =
                    root_from_inclusion_proof(&hs[m], m as u64, n as u64, &proof).unwrap();
                assert_eq!(reconstructed, root, "n={n} m={m}");
            }
        }
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let hs = hashes(4);
        let err = root_from_inclusion_proof(&hs[0], 4, 4, &[]).unwrap_err();
        assert!(matches!(err, ReconstructError::IndexOutOfRange { .. }));
    }

    #[test]
    fn wrong_length_proof_is_rejected() {
        let hs = hashes(8);
        let proof = audit_path(&hs, 3);
        let truncated = &proof[..proof.len() - 1];
        let err = root_from_inclusion_proof(&hs[3], 3, 8, truncated).unwrap_err();
        assert!(matches!(err, ReconstructError::WrongProofLength { .. }));
    }
}
