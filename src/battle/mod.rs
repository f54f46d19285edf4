//! Battle Engine
//!
//! Seat topology, battle state, and the controller that moves a battle
//! from forming through rolling, resolution and payout to archival.
//!
//! ## Module Structure
//!
//! - `topology`: Seats, player types, team layouts
//! - `model`: Battle record and client view
//! - `store`: Live index with write-through persistence
//! - `lifecycle`: Create, join, seat changes, bots, cancel
//! - `roll`: Per-round draws and the background driver
//! - `resolve`: Winner selection and pot division
//! - `archive`: Payouts and archival
//! - `tasks`: Supervised background tasks

pub mod archive;
pub mod lifecycle;
pub mod model;
pub mod resolve;
pub mod roll;
pub mod store;
pub mod tasks;
pub mod topology;

// Re-export key types
pub use lifecycle::{
    BattleService, CaseSelection, Collaborators, CreateBattle, CreatedBattle, JoinBattle,
};
pub use model::{
    Battle, BattleId, BattleOption, BattleStatus, BattleView, Slot, SlotKind, Summary, UserId,
    Winner,
};
pub use store::BattleStore;
pub use tasks::TaskPool;
pub use topology::{PlayerType, SeatId};
