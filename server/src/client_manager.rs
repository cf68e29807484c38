//! Connection registry for the relay server
//!
//! This module tracks every upgraded connection, including:
//! - Identity assignment and peer-address bookkeeping
//! - The outbound frame channel feeding each connection's socket writer
//! - Idempotent removal on disconnect or broadcast failure
//!
//! All mutation happens on the server event-loop task, which keeps
//! membership changes linearizable with broadcast iteration.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// A registered connection
///
/// Holds the server-assigned identity, the peer address for log context,
/// and the bounded channel whose receiving end is the connection's writer
/// task. Dropping the sender (by removal from the registry) is what tells
/// that task to shut down.
#[derive(Debug)]
pub struct Client {
    /// Unique identity assigned at handshake, never reused
    pub id: u32,
    /// Peer address, kept for logging
    pub addr: SocketAddr,
    /// Encoded frames queued for this connection's socket
    pub sender: mpsc::Sender<Vec<u8>>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self { id, addr, sender }
    }
}

/// Manages the set of live connections
///
/// The registry is the single source of truth for who is connected: an
/// identity appears in broadcasts exactly as long as its entry lives here.
#[derive(Debug, Default)]
pub struct ClientManager {
    /// Connected clients indexed by their identity
    clients: HashMap<u32, Client>,
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an upgraded connection under its identity
    pub fn add_client(&mut self, client: Client) {
        info!("Client {} connected from {}", client.id, client.addr);
        self.clients.insert(client.id, client);
    }

    /// Removes a client from the registry
    ///
    /// Returns true if the client was found and removed, false if it was
    /// already gone. Disconnect and broadcast-failure cleanup can race, so
    /// removal stays idempotent.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    /// Returns true while the identity is registered
    pub fn contains(&self, client_id: &u32) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Iterates over all live connections for a broadcast pass
    pub fn iter(&self) -> impl Iterator<Item = (&u32, &Client)> {
        self.clients.iter()
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
