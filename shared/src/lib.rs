use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const DEFAULT_PORT: u16 = 8765;
pub const BROADCAST_INTERVAL_MS: u64 = 50;
pub const DEFAULT_HP: i32 = 100;

/// Last state a client reported for itself. The server never inspects the
/// values, it only stores and rebroadcasts them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub hp: i32,
}

impl Default for PlayerSnapshot {
    /// Snapshot installed when a client connects, before its first report.
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            angle: 0.0,
            hp: DEFAULT_HP,
        }
    }
}

/// Everything the server knows, rebroadcast wholesale every tick.
///
/// `bullets` and `zombies` are opaque to the server: whichever client's
/// update arrived last supplied the entire array.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct WorldSnapshot {
    pub players: HashMap<u32, PlayerSnapshot>,
    pub bullets: Vec<Value>,
    pub zombies: Vec<Value>,
}

/// Body of a `state` message. `bullets`/`zombies` are optional: a client
/// that omits them leaves the server's current arrays untouched.
#[derive(Debug, Deserialize, Clone)]
pub struct StateUpdate {
    pub player: PlayerSnapshot,
    #[serde(default)]
    pub bullets: Option<Vec<Value>>,
    #[serde(default)]
    pub zombies: Option<Vec<Value>>,
}

/// Client → server messages, dispatched on the `type` field.
///
/// Unknown types deserialize to `Unknown` and are dropped without comment,
/// so protocol additions on the client side never break older servers.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    State(StateUpdate),
    #[serde(other)]
    Unknown,
}

/// Server → client messages. `id` is the recipient's own identity so a
/// client can pick itself out of `world.players`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    World { id: u32, world: WorldSnapshot },
}
