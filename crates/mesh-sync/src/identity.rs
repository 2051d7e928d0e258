//! Who this peer is to everyone else in the room.
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{Cursor, LocalSecrets, PeerColor, PeerId};

const ADJECTIVES: &[&str] = &[
    "Brave", "Calm", "Clever", "Eager", "Gentle", "Happy", "Jolly", "Kind", "Lively", "Lucky",
    "Mellow", "Nimble", "Proud", "Quiet", "Swift", "Witty",
];

const ANIMALS: &[&str] = &[
    "Badger", "Beaver", "Falcon", "Fox", "Heron", "Koala", "Lynx", "Marten", "Otter", "Owl",
    "Panda", "Puffin", "Raven", "Seal", "Tiger", "Wombat",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIdentity {
    pub peer_id: PeerId,
    pub display_name: String,
    pub color: PeerColor,
}

impl LocalIdentity {
    /// Fresh identity with a random id and an "Adjective Animal" name.
    pub fn generate() -> Self {
        Self::for_peer(PeerId::new(), random_display_name())
    }

    pub fn for_peer(peer_id: PeerId, display_name: impl Into<String>) -> Self {
        let color = PeerColor::from_peer_id(&peer_id);
        Self {
            peer_id,
            display_name: display_name.into(),
            color,
        }
    }

    /// Reuse the identity saved on this device, or mint and save one.
    pub fn load_or_create(secrets: &LocalSecrets) -> Self {
        let peer_id = match secrets.peer_id() {
            Some(id) => id,
            None => {
                let id = PeerId::new();
                secrets.set_peer_id(&id);
                info!("Created peer id {}", id);
                id
            }
        };
        let display_name = match secrets.display_name() {
            Some(name) => name,
            None => {
                let name = random_display_name();
                secrets.set_display_name(&name);
                name
            }
        };
        Self::for_peer(peer_id, display_name)
    }

    pub fn cursor_at(&self, x: f64, y: f64) -> Cursor {
        Cursor {
            x,
            y,
            peer_id: self.peer_id.clone(),
            display_name: self.display_name.clone(),
            color: self.color.to_hex(),
        }
    }
}

pub fn random_display_name() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    let adjective = ADJECTIVES[bytes[0] as usize % ADJECTIVES.len()];
    let animal = ANIMALS[bytes[1] as usize % ANIMALS.len()];
    format!("{} {}", adjective, animal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_shape() {
        let name = random_display_name();
        let parts: Vec<&str> = name.split(' ').collect();
        assert_eq!(parts.len(), 2);
        assert!(ADJECTIVES.contains(&parts[0]));
        assert!(ANIMALS.contains(&parts[1]));
    }

    #[test]
    fn test_identity_is_reused_across_loads() {
        let secrets = LocalSecrets::in_memory();
        let first = LocalIdentity::load_or_create(&secrets);
        let second = LocalIdentity::load_or_create(&secrets);
        assert_eq!(first, second);
    }

    #[test]
    fn test_cursor_carries_identity() {
        let identity = LocalIdentity::for_peer(PeerId::from("p1"), "Quiet Owl");
        let cursor = identity.cursor_at(3.0, 4.0);
        assert_eq!(cursor.peer_id, identity.peer_id);
        assert_eq!(cursor.display_name, "Quiet Owl");
        assert_eq!(cursor.color, identity.color.to_hex());
    }
}
