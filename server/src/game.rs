use log::info;
use shared::{PlayerSnapshot, StateUpdate, WorldSnapshot};

/// The shared world: the union of every connected client's latest report.
///
/// The server never simulates anything. Players overwrite their own entry
/// wholesale, and bullets/zombies are whole-array replacements from
/// whichever client reported last.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    snapshot: WorldSnapshot,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the spawn snapshot for a freshly connected client
    pub fn add_player(&mut self, client_id: u32) {
        self.snapshot
            .players
            .insert(client_id, PlayerSnapshot::default());
        info!("Added player {}", client_id);
    }

    /// Deletes a player entry when its connection goes away
    pub fn remove_player(&mut self, client_id: &u32) {
        self.snapshot.players.remove(client_id);
        info!("Removed player {}", client_id);
    }

    /// Applies a `state` report from the given client
    ///
    /// The player entry is overwritten unconditionally; bullets and zombies
    /// are replaced only when the report carries them. Values are trusted
    /// as-is and republished on the next broadcast.
    pub fn apply_state(&mut self, client_id: u32, update: StateUpdate) {
        self.snapshot.players.insert(client_id, update.player);
        if let Some(bullets) = update.bullets {
            self.snapshot.bullets = bullets;
        }
        if let Some(zombies) = update.zombies {
            self.snapshot.zombies = zombies;
        }
    }

    /// Current world, read by the broadcast pass
    pub fn snapshot(&self) -> &WorldSnapshot {
        &self.snapshot
    }
}
