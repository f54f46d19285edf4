//! Battle Errors
//!
//! Every failure a client can see maps to a stable type tag and numeric
//! code; the message text is free to change.

use serde::{Deserialize, Serialize};

use crate::backend::{BackendError, LedgerError};
use crate::battle::model::{BattleId, UserId};
use crate::battle::topology::SeatId;
use crate::core::money::Money;
use crate::fairness::FairnessError;
use crate::network::auth::AuthError;

/// Client-visible error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Request could not be decoded.
    InvalidTypeOrFormat,
    /// Unknown or malformed case selection.
    InvalidCaseId,
    /// Unknown seat topology.
    InvalidPlayerType,
    /// Balance below the entry cost.
    InsufficientBalance,
    /// No such live battle.
    NotFound,
    /// Private key mismatch.
    GameIsPrivate,
    /// Battle no longer forming.
    GameIsLocked,
    /// Caller already seated.
    AlreadyJoined,
    /// Target seat taken.
    SlotIsNotEmpty,
    /// Seat not part of this battle.
    InvalidSlot,
    /// Caller is not allowed to do this.
    InvalidCredentials,
    /// Caller holds no seat.
    NotInBattle,
    /// Cancel preconditions not met.
    CannotCancel,
    /// Bot roster exhausted.
    NoBotAvailable,
    /// Token rejected.
    TokenInvalid,
    /// Profile or balance lookup failed.
    ProfileGrpcError,
    /// Persistent store failure.
    DbData,
    /// Ledger failure.
    CreditGrpcError,
    /// Case data cannot be drawn from.
    CatalogIntegrity,
    /// Anything else.
    InternalError,
}

impl ErrorKind {
    /// Stable numeric code.
    pub fn code(self) -> u32 {
        match self {
            ErrorKind::InvalidTypeOrFormat => 5003,
            ErrorKind::InvalidCaseId => 1027,
            ErrorKind::InvalidPlayerType => 5002,
            ErrorKind::InsufficientBalance => 7001,
            ErrorKind::NotFound => 5006,
            ErrorKind::GameIsPrivate => 5008,
            ErrorKind::GameIsLocked => 5007,
            ErrorKind::AlreadyJoined => 1017,
            ErrorKind::SlotIsNotEmpty => 1028,
            ErrorKind::InvalidSlot => 1029,
            ErrorKind::InvalidCredentials => 208,
            ErrorKind::NotInBattle => 1018,
            ErrorKind::CannotCancel => 5009,
            ErrorKind::NoBotAvailable => 5010,
            ErrorKind::TokenInvalid => 1032,
            ErrorKind::ProfileGrpcError => 1033,
            ErrorKind::DbData => 1070,
            ErrorKind::CreditGrpcError => 1063,
            ErrorKind::CatalogIntegrity => 1080,
            ErrorKind::InternalError => 1099,
        }
    }

    /// Stable type tag.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidTypeOrFormat => "INVALID_TYPE_OR_FORMAT",
            ErrorKind::InvalidCaseId => "INVALID_CASE_ID",
            ErrorKind::InvalidPlayerType => "INVALID_PLAYER_TYPE",
            ErrorKind::InsufficientBalance => "INSUFFICIENT_BALANCE",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::GameIsPrivate => "GAME_IS_PRIVATE",
            ErrorKind::GameIsLocked => "GAME_IS_LOCKED",
            ErrorKind::AlreadyJoined => "ALREADY_JOINED",
            ErrorKind::SlotIsNotEmpty => "SLOT_IS_NOT_EMPTY",
            ErrorKind::InvalidSlot => "INVALID_SLOT",
            ErrorKind::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorKind::NotInBattle => "NOT_IN_BATTLE",
            ErrorKind::CannotCancel => "CANNOT_CANCEL",
            ErrorKind::NoBotAvailable => "NO_BOT_AVAILABLE",
            ErrorKind::TokenInvalid => "TOKEN_INVALID",
            ErrorKind::ProfileGrpcError => "PROFILE_GRPC_ERROR",
            ErrorKind::DbData => "DB_DATA",
            ErrorKind::CreditGrpcError => "CREDIT_GRPC_ERROR",
            ErrorKind::CatalogIntegrity => "CATALOG_INTEGRITY",
            ErrorKind::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// Battle operation errors.
#[derive(Debug, thiserror::Error)]
pub enum BattleError {
    /// Request could not be decoded.
    #[error("invalid request: {0}")]
    InvalidFormat(String),

    /// Bad case selection.
    #[error("invalid case: {0}")]
    InvalidCase(String),

    /// Unknown seat topology.
    #[error("invalid player type: {0}")]
    InvalidPlayerType(String),

    /// Balance below cost.
    #[error("insufficient balance: cost {cost}, balance {balance}")]
    InsufficientBalance {
        /// Entry cost.
        cost: Money,
        /// Caller's balance.
        balance: Money,
    },

    /// No such live battle.
    #[error("battle {0} not found")]
    NotFound(BattleId),

    /// Private key missing or wrong.
    #[error("battle is private and the key does not match")]
    PrivateKeyMismatch,

    /// Battle is past forming.
    #[error("battle {0} is locked")]
    Locked(BattleId),

    /// Caller already holds a seat.
    #[error("already joined battle {0}")]
    AlreadyJoined(BattleId),

    /// Seat is taken.
    #[error("seat {0} is not empty")]
    SeatOccupied(SeatId),

    /// Seat does not exist here.
    #[error("seat {0} is not part of this battle")]
    InvalidSeat(SeatId),

    /// Only the creator may do this.
    #[error("only the battle creator may do this")]
    NotCreator,

    /// Caller holds no seat.
    #[error("not seated in battle {0}")]
    NotSeated(BattleId),

    /// Cancel preconditions not met.
    #[error("battle {0} cannot be canceled once others have joined")]
    CannotCancel(BattleId),

    /// Bot roster exhausted.
    #[error("no bot available")]
    NoBotAvailable,

    /// Identity failure.
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    /// Store failure.
    #[error("store error: {0}")]
    Store(#[from] BackendError),

    /// Ledger failure.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Case data could not be drawn from.
    #[error("fairness error: {0}")]
    Fairness(#[from] FairnessError),

    /// An operation failed after a debit and the refund failed too.
    #[error("{cause}; refund of {amount} owed to user {user_id}")]
    RefundOwed {
        /// Debited user.
        user_id: UserId,
        /// Amount still owed.
        amount: Money,
        /// What failed first.
        cause: Box<BattleError>,
    },

    /// Invariant breach.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BattleError {
    /// Client-visible category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BattleError::InvalidFormat(_) => ErrorKind::InvalidTypeOrFormat,
            BattleError::InvalidCase(_) => ErrorKind::InvalidCaseId,
            BattleError::InvalidPlayerType(_) => ErrorKind::InvalidPlayerType,
            BattleError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            BattleError::NotFound(_) => ErrorKind::NotFound,
            BattleError::PrivateKeyMismatch => ErrorKind::GameIsPrivate,
            BattleError::Locked(_) => ErrorKind::GameIsLocked,
            BattleError::AlreadyJoined(_) => ErrorKind::AlreadyJoined,
            BattleError::SeatOccupied(_) => ErrorKind::SlotIsNotEmpty,
            BattleError::InvalidSeat(_) => ErrorKind::InvalidSlot,
            BattleError::NotCreator => ErrorKind::InvalidCredentials,
            BattleError::NotSeated(_) => ErrorKind::NotInBattle,
            BattleError::CannotCancel(_) => ErrorKind::CannotCancel,
            BattleError::NoBotAvailable => ErrorKind::NoBotAvailable,
            BattleError::Unauthorized(AuthError::ProfileUnavailable(_)) => ErrorKind::ProfileGrpcError,
            BattleError::Unauthorized(_) => ErrorKind::TokenInvalid,
            BattleError::Store(_) => ErrorKind::DbData,
            BattleError::Ledger(_) | BattleError::RefundOwed { .. } => ErrorKind::CreditGrpcError,
            BattleError::Fairness(_) => ErrorKind::CatalogIntegrity,
            BattleError::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// Numeric code of [`BattleError::kind`].
    pub fn code(&self) -> u32 {
        self.kind().code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [ErrorKind; 20] = [
        ErrorKind::InvalidTypeOrFormat,
        ErrorKind::InvalidCaseId,
        ErrorKind::InvalidPlayerType,
        ErrorKind::InsufficientBalance,
        ErrorKind::NotFound,
        ErrorKind::GameIsPrivate,
        ErrorKind::GameIsLocked,
        ErrorKind::AlreadyJoined,
        ErrorKind::SlotIsNotEmpty,
        ErrorKind::InvalidSlot,
        ErrorKind::InvalidCredentials,
        ErrorKind::NotInBattle,
        ErrorKind::CannotCancel,
        ErrorKind::NoBotAvailable,
        ErrorKind::TokenInvalid,
        ErrorKind::ProfileGrpcError,
        ErrorKind::DbData,
        ErrorKind::CreditGrpcError,
        ErrorKind::CatalogIntegrity,
        ErrorKind::InternalError,
    ];

    #[test]
    fn test_codes_are_unique() {
        let codes: HashSet<u32> = ALL.iter().map(|k| k.code()).collect();
        assert_eq!(codes.len(), ALL.len());
    }

    #[test]
    fn test_tags_match_serde_names() {
        for kind in ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_error_mapping() {
        let err = BattleError::InsufficientBalance {
            cost: Money::from_units(5),
            balance: Money::from_units(2),
        };
        assert_eq!(err.code(), 7001);
        assert_eq!(err.to_string(), "insufficient balance: cost 5.00, balance 2.00");

        assert_eq!(BattleError::from(BackendError::NoRowsAffected).kind(), ErrorKind::DbData);
        assert_eq!(
            BattleError::from(AuthError::ProfileUnavailable("down".into())).kind(),
            ErrorKind::ProfileGrpcError
        );
        assert_eq!(BattleError::from(AuthError::Expired).code(), 1032);
    }

    #[test]
    fn test_refund_owed_keeps_cause() {
        let err = BattleError::RefundOwed {
            user_id: 4,
            amount: Money::from_cents(250),
            cause: Box::new(BattleError::Store(BackendError::NoRowsAffected)),
        };
        assert_eq!(err.kind(), ErrorKind::CreditGrpcError);
        let text = err.to_string();
        assert!(text.starts_with("store error"), "{text}");
        assert!(text.ends_with("refund of 2.50 owed to user 4"), "{text}");
    }
}
