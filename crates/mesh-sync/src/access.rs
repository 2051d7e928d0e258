//! Password gate deciding whether this peer discloses its replica.
//!
//! The password is a shared secret checked peer-side. Any peer that was let
//! in can re-share under the secret it supplied; there is no revocable
//! credential authority on a serverless mesh.
use serde::{Deserialize, Serialize};

use crate::{Result, RoomId, SyncError, REASON_INCORRECT_PASSWORD};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessState {
    /// No password known for this room.
    Unprotected,
    /// This peer created the room and holds its password.
    ProtectedAsCreator { password: String },
    /// This peer joins a protected room with whatever secret it has.
    ProtectedAsGuest {
        secret: Option<String>,
        verified: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Share,
    Deny(String),
    Ignore,
}

/// What the UI shows about room access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AccessStatus {
    Open,
    Creator,
    Pending,
    Unlocked,
    Locked { reason: String },
}

#[derive(Debug, Clone)]
pub struct AccessGate {
    state: AccessState,
    locked: Option<String>,
    received_snapshot: bool,
}

impl AccessGate {
    pub fn unprotected() -> Self {
        Self::with_state(AccessState::Unprotected)
    }

    pub fn creator(password: impl Into<String>) -> Self {
        Self::with_state(AccessState::ProtectedAsCreator {
            password: password.into(),
        })
    }

    pub fn guest(secret: Option<String>) -> Self {
        Self::with_state(AccessState::ProtectedAsGuest {
            secret: normalize(secret),
            verified: false,
        })
    }

    /// Pick the starting state from what this peer has cached for the room.
    pub fn from_cached(creator_password: Option<String>, unlock_secret: Option<String>) -> Self {
        match (normalize(creator_password), normalize(unlock_secret)) {
            (Some(password), _) => Self::creator(password),
            (None, Some(secret)) => Self::guest(Some(secret)),
            (None, None) => Self::unprotected(),
        }
    }

    fn with_state(state: AccessState) -> Self {
        Self {
            state,
            locked: None,
            received_snapshot: false,
        }
    }

    pub fn state(&self) -> &AccessState {
        &self.state
    }

    pub fn is_creator(&self) -> bool {
        matches!(self.state, AccessState::ProtectedAsCreator { .. })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.is_some()
    }

    pub fn lock_reason(&self) -> Option<&str> {
        self.locked.as_deref()
    }

    /// Unrequested snapshots are only pushed into rooms nobody protects.
    pub fn allows_push(&self) -> bool {
        matches!(self.state, AccessState::Unprotected) && self.locked.is_none()
    }

    pub fn has_received_snapshot(&self) -> bool {
        self.received_snapshot
    }

    pub fn status(&self) -> AccessStatus {
        if let Some(reason) = &self.locked {
            return AccessStatus::Locked {
                reason: reason.clone(),
            };
        }
        match &self.state {
            AccessState::Unprotected => AccessStatus::Open,
            AccessState::ProtectedAsCreator { .. } => AccessStatus::Creator,
            AccessState::ProtectedAsGuest { verified: true, .. } => AccessStatus::Unlocked,
            AccessState::ProtectedAsGuest { verified: false, .. } => AccessStatus::Pending,
        }
    }

    /// The secret a `SYNC_REQUEST` from this peer carries.
    pub fn request_secret(&self) -> Option<String> {
        match &self.state {
            AccessState::ProtectedAsGuest { secret, .. } => secret.clone(),
            AccessState::Unprotected | AccessState::ProtectedAsCreator { .. } => None,
        }
    }

    /// Only the creator refuses. A verified guest re-shares under the
    /// secret it was let in with and stays silent on anything else.
    pub fn evaluate(&self, supplied: Option<&str>) -> AccessDecision {
        if self.locked.is_some() {
            return AccessDecision::Ignore;
        }
        match &self.state {
            AccessState::Unprotected => AccessDecision::Share,
            AccessState::ProtectedAsCreator { password } => {
                if supplied == Some(password.as_str()) {
                    AccessDecision::Share
                } else {
                    AccessDecision::Deny(REASON_INCORRECT_PASSWORD.to_string())
                }
            }
            AccessState::ProtectedAsGuest {
                secret: Some(secret),
                verified: true,
            } if supplied == Some(secret.as_str()) => AccessDecision::Share,
            AccessState::ProtectedAsGuest { .. } => AccessDecision::Ignore,
        }
    }

    /// A snapshot arrived.
    ///
    /// An empty snapshot says nothing about the secret: any peer that never
    /// heard of a password answers with whatever it has. A non-empty one
    /// sent to a guest that asked with a secret means the secret was
    /// accepted, so the guest becomes verified and the lock from an earlier
    /// refusal clears. Refusals of requests sent before a retry arrive ahead
    /// of the answer to the retry, which this relies on. Returns the secret
    /// to cache as this room's unlock secret the first time it verifies.
    /// A refused peer without a secret stays locked whatever it receives;
    /// only [`retry`](Self::retry) gets it out.
    pub fn on_sync_response(&mut self, non_empty: bool) -> Option<String> {
        match &mut self.state {
            AccessState::ProtectedAsGuest {
                secret: Some(secret),
                verified,
            } if non_empty => {
                self.locked = None;
                if *verified {
                    return None;
                }
                *verified = true;
                Some(secret.clone())
            }
            AccessState::ProtectedAsGuest { .. }
            | AccessState::Unprotected
            | AccessState::ProtectedAsCreator { .. } => None,
        }
    }

    /// A snapshot was merged into the replica.
    ///
    /// A guest still waiting for its secret to be accepted keeps asking
    /// newly joined peers.
    pub fn on_snapshot_merged(&mut self) {
        let awaiting = matches!(
            self.state,
            AccessState::ProtectedAsGuest {
                secret: Some(_),
                verified: false,
            }
        );
        if !awaiting {
            self.received_snapshot = true;
        }
    }

    /// Returns true when the denial locked this peer.
    ///
    /// Only a creator refuses, so a refusal outweighs any earlier snapshot:
    /// the guest loses its verification until it retries. A creator cannot
    /// be locked out of its own room.
    pub fn on_access_denied(&mut self, reason: impl Into<String>) -> bool {
        match &mut self.state {
            AccessState::ProtectedAsCreator { .. } => return false,
            AccessState::ProtectedAsGuest { verified, .. } => *verified = false,
            AccessState::Unprotected => {}
        }
        if self.state == AccessState::Unprotected {
            self.state = AccessState::ProtectedAsGuest {
                secret: None,
                verified: false,
            };
        }
        self.locked = Some(reason.into());
        true
    }

    /// Become the creator of `room` under `password`.
    ///
    /// Creating again with the same password is a no-op; a different one is
    /// refused so an existing room cannot be silently re-keyed.
    pub fn create(&mut self, room: &RoomId, password: impl Into<String>) -> Result<()> {
        let password = password.into();
        if password.is_empty() {
            return Err(SyncError::InvalidOp("room password must not be empty".into()));
        }
        if let AccessState::ProtectedAsCreator { password: existing } = &self.state {
            if *existing != password {
                return Err(SyncError::RoomProtected(room.clone()));
            }
            return Ok(());
        }
        self.state = AccessState::ProtectedAsCreator { password };
        self.locked = None;
        Ok(())
    }

    /// Re-enter the request cycle with a new password.
    pub fn retry(&mut self, password: Option<String>) {
        if self.is_creator() {
            return;
        }
        self.locked = None;
        self.received_snapshot = false;
        self.state = AccessState::ProtectedAsGuest {
            secret: normalize(password),
            verified: false,
        };
    }
}

fn normalize(secret: Option<String>) -> Option<String> {
    secret.filter(|s| !s.is_empty())
}
