//! # Case Battle Server
//!
//! Provably-fair multiplayer case battles: players stake the same set of
//! cases, every opening is derived from a committed server seed, and the
//! pot goes to the winning team.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CASE BATTLE SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── money.rs    - Integer-cent money                        │
//! │  ├── hash.rs     - SHA-256, domain-separated hashing         │
//! │  └── clock.rs    - Wall time and pacing sleeps               │
//! │                                                              │
//! │  fairness/       - Provably-fair engine (deterministic)      │
//! │  ├── seed.rs     - Server/client seeds, commitments          │
//! │  ├── draw.rs     - fair_rand, item pick, nonces              │
//! │  └── verify.rs   - Replay of a finished battle               │
//! │                                                              │
//! │  catalog/        - Cases, items and bots                     │
//! │  battle/         - Lifecycle, store, rolls, payouts          │
//! │  backend/        - Records, ledger, query boundary           │
//! │                                                              │
//! │  network/        - Protocol, dispatch, identity, live feed   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! The `fairness/` module is **fully deterministic**: given the revealed
//! server seed, the seat client seeds and the recorded nonces, anyone can
//! recompute every roll and every item of a battle.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod backend;
pub mod battle;
pub mod catalog;
pub mod config;
pub mod core;
pub mod error;
pub mod fairness;
pub mod network;

// Re-export commonly used types
pub use battle::{BattleService, Collaborators, CreateBattle, JoinBattle, PlayerType, SeatId};
pub use config::BattleConfig;
pub use core::money::Money;
pub use error::{BattleError, ErrorKind};
pub use fairness::{fair_rand, pick_item, replay_battle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
