//! Share difficulty estimation
//!
//! The pool applies a cheap difficulty gate before relaying a share:
//! blake2b over the proof nonces, difficulty taken from the leading
//! digest bytes. Full cuckoo-cycle verification stays with the node,
//! which has the final say on validity.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

type Blake2b256 = Blake2b<U32>;

/// Difficulty of a proof, `u64::MAX / digest-prefix`
///
/// An empty proof has difficulty 0.
pub fn share_difficulty(pow: &[u64]) -> u64 {
    if pow.is_empty() {
        return 0;
    }

    let mut hasher = Blake2b256::new();
    for nonce in pow {
        hasher.update(nonce.to_le_bytes());
    }
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let num = u64::from_be_bytes(prefix);

    if num == 0 {
        u64::MAX
    } else {
        u64::MAX / num
    }
}
