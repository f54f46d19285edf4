//! Protocol Messages
//!
//! Wire format for client-server communication. Every message is a JSON
//! object tagged by `type`; requests are decoded once into typed structs
//! and converted into service requests here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::battle::lifecycle::{CaseSelection, CreateBattle, JoinBattle};
use crate::battle::model::BattleId;
use crate::battle::topology::{PlayerType, SeatId};
use crate::catalog::case::CaseId;
use crate::error::{BattleError, ErrorKind};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Open a new battle.
    NewBattle(NewBattleRequest),

    /// Take a seat.
    Join(JoinRequest),

    /// Move to another seat.
    ChangeSeat(ChangeSeatRequest),

    /// Fill a seat with a bot.
    AddBot(AddBotRequest),

    /// Cancel an unjoined battle.
    Cancel(CancelRequest),

    /// One live battle.
    GetBattle(GetBattleRequest),

    /// Every live battle.
    GetBattles,

    /// Case catalog.
    GetCases,

    /// Bot roster.
    GetBots,

    /// Round-trip timing.
    Ping {
        /// Client timestamp, echoed back.
        #[serde(default)]
        timestamp: u64,
    },
}

/// Create request as sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBattleRequest {
    /// Session token.
    pub token: String,
    /// Topology label, e.g. `"2v2"`.
    pub player_type: String,
    /// Option tags.
    #[serde(default)]
    pub options: Vec<String>,
    /// Case selections, each `{ "<caseId>": count }`.
    pub cases: Vec<BTreeMap<String, u32>>,
}

impl NewBattleRequest {
    /// Validate into a service request.
    pub fn to_create(&self) -> Result<CreateBattle, BattleError> {
        let player_type: PlayerType = self
            .player_type
            .parse()
            .map_err(BattleError::InvalidPlayerType)?;

        let mut cases = Vec::new();
        for selection in &self.cases {
            for (raw_id, count) in selection {
                let case_id: CaseId = raw_id
                    .trim()
                    .parse()
                    .map_err(|_| BattleError::InvalidCase(format!("bad case id {raw_id:?}")))?;
                cases.push(CaseSelection { case_id, count: *count });
            }
        }

        Ok(CreateBattle { player_type, options: self.options.clone(), cases })
    }
}

/// Join request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Session token.
    pub token: String,
    /// Target battle.
    pub battle_id: BattleId,
    /// Requested seat label.
    #[serde(default)]
    pub slot_id: Option<String>,
    /// Key for private battles.
    #[serde(default)]
    pub private_key: Option<String>,
}

impl JoinRequest {
    /// Validate into a service request.
    pub fn to_join(&self) -> Result<JoinBattle, BattleError> {
        Ok(JoinBattle {
            battle_id: self.battle_id,
            seat: parse_seat(self.slot_id.as_deref())?,
            private_key: self.private_key.clone(),
        })
    }
}

/// Seat change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSeatRequest {
    /// Session token.
    pub token: String,
    /// Target battle.
    pub battle_id: BattleId,
    /// Seat to move to.
    pub slot_id: String,
}

/// Bot request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddBotRequest {
    /// Session token.
    pub token: String,
    /// Target battle.
    pub battle_id: BattleId,
    /// Seat to fill; first open seat when absent.
    #[serde(default)]
    pub slot_id: Option<String>,
}

/// Cancel request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    /// Session token.
    pub token: String,
    /// Target battle.
    pub battle_id: BattleId,
}

/// Single battle lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBattleRequest {
    /// Battle ID.
    pub battle_id: BattleId,
}

/// Parse an optional seat label.
pub fn parse_seat(raw: Option<&str>) -> Result<Option<SeatId>, BattleError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(label) => label
            .parse()
            .map(Some)
            .map_err(|e| BattleError::InvalidFormat(format!("{e}"))),
        None => Ok(None),
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Reply to one client message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Echo of the request type.
    #[serde(rename = "type")]
    pub kind: String,
    /// 1 on success, 0 on failure.
    pub status: u8,
    /// Numeric error code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<u32>,
    /// Error type tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
    /// Error description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Result payload.
    #[serde(default)]
    pub data: Value,
}

impl Response {
    /// Successful reply.
    pub fn ok(kind: &str, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            status: 1,
            error: None,
            error_type: None,
            message: None,
            data,
        }
    }

    /// Failed reply.
    pub fn err(kind: &str, error: &BattleError) -> Self {
        let data = match error {
            BattleError::InsufficientBalance { cost, balance } => {
                serde_json::json!({ "cost": cost, "balance": balance })
            }
            _ => Value::Null,
        };
        Self {
            kind: kind.to_string(),
            status: 0,
            error: Some(error.code()),
            error_type: Some(error.kind()),
            message: Some(error.to_string()),
            data,
        }
    }

    /// Did the request succeed?
    pub fn is_ok(&self) -> bool {
        self.status == 1
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Wire name of this message type.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::NewBattle(_) => "newBattle",
            ClientMessage::Join(_) => "join",
            ClientMessage::ChangeSeat(_) => "changeSeat",
            ClientMessage::AddBot(_) => "addBot",
            ClientMessage::Cancel(_) => "cancel",
            ClientMessage::GetBattle(_) => "getBattle",
            ClientMessage::GetBattles => "getBattles",
            ClientMessage::GetCases => "getCases",
            ClientMessage::GetBots => "getBots",
            ClientMessage::Ping { .. } => "ping",
        }
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl Response {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::money::Money;

    #[test]
    fn test_new_battle_decodes() {
        let json = r#"{
            "type": "newBattle",
            "token": "tok-1",
            "playerType": "2v2",
            "options": ["Jackpot"],
            "cases": [{"3": 2}, {"7": 1}]
        }"#;

        let ClientMessage::NewBattle(req) = ClientMessage::from_json(json).unwrap() else {
            panic!("Wrong message type");
        };
        let create = req.to_create().unwrap();
        assert_eq!(create.player_type, PlayerType::TwoVsTwo);
        assert_eq!(create.options, vec!["Jackpot".to_string()]);
        assert_eq!(
            create.cases,
            vec![CaseSelection { case_id: 3, count: 2 }, CaseSelection { case_id: 7, count: 1 }]
        );
    }

    #[test]
    fn test_new_battle_rejects_bad_fields() {
        let mut req = NewBattleRequest {
            token: "t".into(),
            player_type: "5v5".into(),
            options: vec![],
            cases: vec![BTreeMap::from([("1".to_string(), 1)])],
        };
        assert!(matches!(req.to_create(), Err(BattleError::InvalidPlayerType(_))));

        req.player_type = "1v1".into();
        req.cases = vec![BTreeMap::from([("abc".to_string(), 1)])];
        assert_eq!(req.to_create().unwrap_err().code(), 1027);
    }

    #[test]
    fn test_join_seat_parsing() {
        let json = r#"{"type":"join","token":"t","battleId":4,"slotId":"s3"}"#;
        let ClientMessage::Join(req) = ClientMessage::from_json(json).unwrap() else {
            panic!("Wrong message type");
        };
        let join = req.to_join().unwrap();
        assert_eq!(join.seat, SeatId::new(3));
        assert!(join.private_key.is_none());

        assert_eq!(parse_seat(None).unwrap(), None);
        assert_eq!(parse_seat(Some(" ")).unwrap(), None);
        assert!(matches!(parse_seat(Some("s9")), Err(BattleError::InvalidFormat(_))));
    }

    #[test]
    fn test_unit_messages() {
        for (json, kind) in [
            (r#"{"type":"getBattles"}"#, "getBattles"),
            (r#"{"type":"getCases"}"#, "getCases"),
            (r#"{"type":"getBots"}"#, "getBots"),
            (r#"{"type":"ping"}"#, "ping"),
        ] {
            assert_eq!(ClientMessage::from_json(json).unwrap().kind(), kind);
        }
        assert!(ClientMessage::from_json(r#"{"type":"launch"}"#).is_err());
    }

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::Cancel(CancelRequest { token: "t".into(), battle_id: 12 });
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"cancel""#));
        assert!(json.contains(r#""battleId":12"#));
        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_error_response_shape() {
        let error = BattleError::InsufficientBalance {
            cost: Money::from_cents(500),
            balance: Money::from_cents(120),
        };
        let json = Response::err("join", &error).to_json().unwrap();

        assert!(json.contains(r#""status":0"#));
        assert!(json.contains(r#""error":7001"#));
        assert!(json.contains("INSUFFICIENT_BALANCE"));
        assert!(json.contains(r#""cost":5.0"#));
    }

    #[test]
    fn test_ok_response_shape() {
        let response = Response::ok("getBots", serde_json::json!([]));
        assert!(response.is_ok());
        let json = response.to_json().unwrap();
        assert!(!json.contains("error"));
        assert_eq!(Response::from_json(&json).unwrap(), response);
    }
}
