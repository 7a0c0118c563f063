//! Verifiable delay function: iterated SHA-256.
//!
//! `VDF(x, d) = SHA256^d(x)`. The iterations cannot be parallelized because
//! each depends on the previous digest, which gives a provable minimum
//! sequential computation time. Intermediate digests are sampled at a fixed
//! interval as proof checkpoints; verification replays each fixed-size
//! segment against its checkpoint, so a forged output fails at the first
//! divergent segment.

use sha2::{Digest, Sha256};

use crate::domain::Hash256;

/// Output of a VDF computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdfResult {
    pub output: Hash256,
    /// Digests at iterations `interval, 2·interval, …` where
    /// `interval = max(1, difficulty / granularity)`.
    pub checkpoints: Vec<Hash256>,
    pub difficulty: u32,
}

fn step(state: &Hash256) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(state);
    hasher.finalize().into()
}

/// Checkpoint sampling interval for a given difficulty.
pub fn checkpoint_interval(difficulty: u32, granularity: u32) -> u32 {
    (difficulty / granularity.max(1)).max(1)
}

/// Compute `SHA256^difficulty(input)`, sampling checkpoints along the way.
///
/// `difficulty` must be at least 1; a difficulty of 1 is a single SHA-256
/// application.
pub fn compute_vdf(input: &Hash256, difficulty: u32, granularity: u32) -> VdfResult {
    let difficulty = difficulty.max(1);
    let interval = checkpoint_interval(difficulty, granularity);

    let mut current = *input;
    let mut checkpoints = Vec::with_capacity((difficulty / interval) as usize);

    for i in 1..=difficulty {
        current = step(&current);
        if i % interval == 0 {
            checkpoints.push(current);
        }
    }

    VdfResult {
        output: current,
        checkpoints,
        difficulty,
    }
}

/// Verify a VDF output against its checkpoints.
///
/// Each checkpoint-to-checkpoint segment has a fixed iteration count, so
/// verification cost is independent of chain length and a tampered
/// checkpoint or output fails at its segment boundary.
pub fn verify_vdf(
    input: &Hash256,
    output: &Hash256,
    checkpoints: &[Hash256],
    difficulty: u32,
    granularity: u32,
) -> bool {
    let difficulty = difficulty.max(1);
    let interval = checkpoint_interval(difficulty, granularity);
    let expected_count = (difficulty / interval) as usize;
    if checkpoints.len() != expected_count {
        return false;
    }

    let mut state = *input;
    let mut position: u32 = 0;

    for checkpoint in checkpoints {
        for _ in 0..interval {
            state = step(&state);
        }
        position += interval;
        if &state != checkpoint {
            return false;
        }
    }

    // Tail segment when difficulty is not a multiple of the interval.
    for _ in position..difficulty {
        state = step(&state);
    }

    &state == output
}
