//! Wire messages exchanged between peers of one room.
//!
//! Every frame is a JSON object `{ "type": ..., "payload": ... }`. Decoding
//! goes through an untyped envelope first so that frames from newer peers
//! with a `type` we do not know are skipped instead of failing the session.
use board::{Element, ElementId, ElementMap, ElementPatch};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Cursor, PeerId, Result, SyncError};

pub const REASON_INCORRECT_PASSWORD: &str = "Incorrect Password";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    SyncRequest(SyncRequest),
    SyncResponse(SyncResponse),
    AccessDenied(AccessDenied),
    AddElement(Element),
    UpdateElement(ElementUpdate),
    DeleteElement(ElementRef),
    CursorMove(Cursor),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SyncResponse {
    pub elements: ElementMap,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessDenied {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementUpdate {
    pub id: ElementId,
    pub updates: ElementPatch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ElementRef {
    pub id: ElementId,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl Action {
    pub fn sync_request(password: Option<String>) -> Self {
        Action::SyncRequest(SyncRequest { password })
    }

    pub fn sync_response(elements: ElementMap) -> Self {
        Action::SyncResponse(SyncResponse { elements })
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Action::AccessDenied(AccessDenied {
            reason: reason.into(),
        })
    }

    pub fn update(id: ElementId, updates: ElementPatch) -> Self {
        Action::UpdateElement(ElementUpdate { id, updates })
    }

    pub fn delete(id: ElementId) -> Self {
        Action::DeleteElement(ElementRef { id })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::SyncRequest(_) => "SYNC_REQUEST",
            Action::SyncResponse(_) => "SYNC_RESPONSE",
            Action::AccessDenied(_) => "ACCESS_DENIED",
            Action::AddElement(_) => "ADD_ELEMENT",
            Action::UpdateElement(_) => "UPDATE_ELEMENT",
            Action::DeleteElement(_) => "DELETE_ELEMENT",
            Action::CursorMove(_) => "CURSOR_MOVE",
        }
    }

    /// Durable actions change the element map; the rest are handshake or ephemeral.
    pub fn is_element_edit(&self) -> bool {
        matches!(
            self,
            Action::AddElement(_) | Action::UpdateElement(_) | Action::DeleteElement(_)
        )
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode one frame. `Ok(None)` means a well-formed envelope of a type
    /// this peer does not understand.
    pub fn decode(text: &str) -> Result<Option<Self>> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| SyncError::Protocol(format!("malformed envelope: {e}")))?;
        let payload = envelope.payload;

        let action = match envelope.kind.as_str() {
            "SYNC_REQUEST" => {
                if payload.is_null() {
                    Action::SyncRequest(SyncRequest::default())
                } else {
                    Action::SyncRequest(parse(&envelope.kind, payload)?)
                }
            }
            "SYNC_RESPONSE" => Action::SyncResponse(parse(&envelope.kind, payload)?),
            "ACCESS_DENIED" => Action::AccessDenied(parse(&envelope.kind, payload)?),
            "ADD_ELEMENT" => Action::AddElement(parse(&envelope.kind, payload)?),
            "UPDATE_ELEMENT" => Action::UpdateElement(parse(&envelope.kind, payload)?),
            "DELETE_ELEMENT" => Action::DeleteElement(parse(&envelope.kind, payload)?),
            "CURSOR_MOVE" => Action::CursorMove(parse(&envelope.kind, payload)?),
            _ => return Ok(None),
        };
        Ok(Some(action))
    }
}

fn parse<T: serde::de::DeserializeOwned>(kind: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload)
        .map_err(|e| SyncError::Protocol(format!("invalid {kind} payload: {e}")))
}

/// An action addressed either to every connected peer or to exactly one.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub target: Option<PeerId>,
    pub action: Action,
}

impl Outbound {
    pub fn broadcast(action: Action) -> Self {
        Self {
            target: None,
            action,
        }
    }

    pub fn to(peer: PeerId, action: Action) -> Self {
        Self {
            target: Some(peer),
            action,
        }
    }
}
