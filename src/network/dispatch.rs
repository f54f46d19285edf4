//! Request Routing
//!
//! Decodes a client message once and routes it onto [`BattleService`].
//! Every outcome, including a message that does not decode, becomes a
//! [`Response`]; nothing here panics on client input.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::battle::lifecycle::BattleService;
use crate::error::{BattleError, ErrorKind};

use super::protocol::{parse_seat, ClientMessage, Response};

/// Routes client messages to the battle service.
#[derive(Clone)]
pub struct Dispatcher {
    service: Arc<BattleService>,
}

fn to_data<T: Serialize>(value: &T) -> Result<Value, BattleError> {
    serde_json::to_value(value).map_err(|e| BattleError::Internal(format!("encode response: {e}")))
}

impl Dispatcher {
    /// Dispatcher over `service`.
    pub fn new(service: Arc<BattleService>) -> Self {
        Self { service }
    }

    /// Decode and handle one raw JSON message.
    pub async fn handle_text(&self, text: &str) -> Response {
        match ClientMessage::from_json(text) {
            Ok(msg) => self.handle(msg).await,
            Err(e) => {
                debug!("Undecodable client message: {}", e);
                let kind = serde_json::from_str::<Value>(text)
                    .ok()
                    .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string());
                Response::err(&kind, &BattleError::InvalidFormat(e.to_string()))
            }
        }
    }

    /// Handle one decoded message.
    pub async fn handle(&self, msg: ClientMessage) -> Response {
        let kind = msg.kind();
        match self.route(msg).await {
            Ok(data) => Response::ok(kind, data),
            Err(e) => {
                match e.kind() {
                    ErrorKind::DbData
                    | ErrorKind::CreditGrpcError
                    | ErrorKind::CatalogIntegrity
                    | ErrorKind::InternalError => warn!("Request {} failed: {}", kind, e),
                    _ => debug!("Request {} rejected: {}", kind, e),
                }
                Response::err(kind, &e)
            }
        }
    }

    async fn route(&self, msg: ClientMessage) -> Result<Value, BattleError> {
        let service = &self.service;
        match msg {
            ClientMessage::NewBattle(req) => {
                let create = req.to_create()?;
                to_data(&service.create(&req.token, create).await?)
            }
            ClientMessage::Join(req) => {
                let join = req.to_join()?;
                to_data(&service.join(&req.token, join).await?)
            }
            ClientMessage::ChangeSeat(req) => {
                let seat = parse_seat(Some(&req.slot_id))?
                    .ok_or_else(|| BattleError::InvalidFormat("slotId is required".into()))?;
                to_data(&service.change_seat(&req.token, req.battle_id, seat).await?)
            }
            ClientMessage::AddBot(req) => {
                let seat = parse_seat(req.slot_id.as_deref())?;
                to_data(&service.add_bot(&req.token, req.battle_id, seat).await?)
            }
            ClientMessage::Cancel(req) => to_data(&service.cancel(&req.token, req.battle_id).await?),
            ClientMessage::GetBattle(req) => to_data(&service.battle(req.battle_id).await?),
            ClientMessage::GetBattles => to_data(&service.live_battles().await),
            ClientMessage::GetCases => to_data(&service.cases().await?),
            ClientMessage::GetBots => to_data(&service.bots().await?),
            ClientMessage::Ping { timestamp } => Ok(json!({
                "timestamp": timestamp,
                "serverTime": service.clock.now().timestamp_millis(),
            })),
        }
    }
}
