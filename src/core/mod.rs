//! Core primitives.
//!
//! Money arithmetic and hashing are deterministic and platform independent.
//! The clock is the single seam through which time enters battle logic.

pub mod clock;
pub mod hash;
pub mod money;

// Re-export core types
pub use clock::{Clock, SystemClock, VirtualClock};
pub use hash::{sha256, sha256_hex, Digest32};
pub use money::{Money, MoneyError};
