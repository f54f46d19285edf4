//! Provably-Fair Engine
//!
//! Commit-reveal randomness for case openings:
//! 1. Server seed generated at creation, only its hash published
//! 2. Each seat contributes a client seed
//! 3. Every draw hashes `server:client:nonce` with a unique nonce
//! 4. After the battle the seed is revealed and draws can be replayed

pub mod draw;
pub mod seed;
pub mod verify;

pub use draw::{fair_rand, pick_item, Draw, NonceSequence, ROLL_MAX};
pub use seed::{client_seed_for, verify_commitment, ServerSeed};
pub use verify::{replay_battle, ReplayReport};

use crate::catalog::case::CaseId;

/// Fairness failures. All are fatal for the battle being drawn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FairnessError {
    /// Case has no items to draw from.
    #[error("case {case_id} has no items")]
    EmptyCase {
        /// Case ID.
        case_id: CaseId,
    },
    /// Roll fell outside every item range.
    #[error("roll {roll} is not covered by any item of case {case_id}")]
    UncoveredRoll {
        /// Case ID.
        case_id: CaseId,
        /// Offending roll.
        roll: u32,
    },
    /// A round ran out of nonces.
    #[error("nonce space exhausted in round {round}")]
    NoncesExhausted {
        /// Zero-based round.
        round: usize,
    },
    /// Occupied seat has no client seed.
    #[error("no client seed for seat {seat}")]
    MissingClientSeed {
        /// Seat label.
        seat: String,
    },
    /// Revealed seed does not hash to the commitment.
    #[error("server seed does not match its commitment")]
    CommitmentMismatch,
    /// Seed not available for replay.
    #[error("server seed has not been revealed")]
    SeedNotRevealed,
    /// Results reference a round with no case.
    #[error("no case recorded for round {round}")]
    UnknownRound {
        /// Zero-based round.
        round: usize,
    },
    /// Join key MAC could not be keyed.
    #[error("join key: {0}")]
    JoinKey(String),
    /// Replay drew a different item.
    #[error("round {round} seat {seat}: recorded item {recorded}, replay drew {replayed}")]
    ReplayMismatch {
        /// Zero-based round.
        round: usize,
        /// Seat label.
        seat: String,
        /// Item in the results.
        recorded: i64,
        /// Item from the replay.
        replayed: i64,
    },
}
