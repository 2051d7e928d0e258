//! Ephemeral cursor presence.
//! Cursors are never persisted or merged; the last frame received for a peer wins.
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::PeerId;

/// Color assigned to a peer for cursor highlighting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl PeerColor {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Deterministic color for a peer id, so every replica paints a peer the same way.
    pub fn from_peer_id(peer_id: &PeerId) -> Self {
        // FNV-1a; stable across processes unlike the std hasher.
        let mut hash: u32 = 0x811c_9dc5;
        for byte in peer_id.as_str().bytes() {
            hash ^= byte as u32;
            hash = hash.wrapping_mul(0x0100_0193);
        }
        let [r, g, b, _] = hash.to_le_bytes();
        Self { r, g, b }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// One peer's pointer as carried by `CURSOR_MOVE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
    pub peer_id: PeerId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub color: String,
}

/// Client-side rate limit for outgoing cursor frames.
#[derive(Debug, Clone)]
pub struct CursorThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl CursorThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns true and records the send when at least `interval` has passed
    /// since the previous accepted send.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_color_is_stable() {
        let id = PeerId::from("peer-a");
        assert_eq!(PeerColor::from_peer_id(&id), PeerColor::from_peer_id(&id));

        let hex = PeerColor::from_peer_id(&id).to_hex();
        assert!(hex.starts_with('#'));
        assert_eq!(hex.len(), 7);
    }

    #[test]
    fn test_cursor_wire_shape() {
        let cursor = Cursor {
            x: 1.5,
            y: 2.0,
            peer_id: PeerId::from("p1"),
            display_name: "Brave Otter".into(),
            color: "#112233".into(),
        };
        let value = serde_json::to_value(&cursor).unwrap();
        assert_eq!(value["peerId"], "p1");
        assert_eq!(value["displayName"], "Brave Otter");
    }

    #[test]
    fn test_throttle_limits_rate() {
        let mut throttle = CursorThrottle::new(Duration::from_millis(50));
        let start = Instant::now();

        assert!(throttle.try_acquire(start));
        assert!(!throttle.try_acquire(start + Duration::from_millis(10)));
        assert!(!throttle.try_acquire(start + Duration::from_millis(49)));
        assert!(throttle.try_acquire(start + Duration::from_millis(50)));
        assert!(!throttle.try_acquire(start + Duration::from_millis(60)));

        throttle.reset();
        assert!(throttle.try_acquire(start + Duration::from_millis(61)));
    }
}
