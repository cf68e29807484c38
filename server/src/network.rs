//! Server network layer handling connection lifecycle and broadcast scheduling

use crate::client_manager::{Client, ClientManager};
use crate::frame::{self, DecodedFrame};
use crate::game::WorldState;
use crate::handshake;
use log::{debug, error, info, warn};
use shared::{ClientMessage, ServerMessage, StateUpdate};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

/// Frames queued per connection before broadcast ticks are dropped for it
const OUTBOUND_QUEUE: usize = 32;

/// Read chunk size for inbound frame data
const READ_CHUNK: usize = 2048;

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum NetworkEvent {
    NewConnection {
        client_id: u32,
        addr: SocketAddr,
        sender: mpsc::Sender<Vec<u8>>,
    },
    PlayerState {
        client_id: u32,
        update: StateUpdate,
    },
    ClientDisconnect {
        client_id: u32,
    },
}

/// Main server owning the listener, the registry and the world
///
/// Each instance is fully self-contained, so tests can run several
/// servers side by side on ephemeral ports.
pub struct Server {
    listener: TcpListener,
    broadcast_interval: Duration,
    next_client_id: AtomicU32,
    event_tx: mpsc::UnboundedSender<NetworkEvent>,
    event_rx: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl Server {
    pub async fn new(
        addr: &str,
        broadcast_interval: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            broadcast_interval,
            next_client_id: AtomicU32::new(1),
            event_tx,
            event_rx,
        })
    }

    /// Address the listener actually bound, for callers that asked for port 0
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Main server loop coordinating all operations
    ///
    /// Accepts connections, applies events from connection tasks and runs
    /// the broadcast tick. The registry and world are owned exclusively by
    /// this task, so every mutation is serialized and each broadcast pass
    /// sees a consistent world.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut clients = ClientManager::new();
        let mut world = WorldState::new();

        let mut tick = interval(self.broadcast_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Server started successfully");

        loop {
            tokio::select! {
                // Promote freshly accepted sockets in their own tasks
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
                            tokio::spawn(handle_connection(
                                stream,
                                addr,
                                client_id,
                                self.event_tx.clone(),
                            ));
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                },

                // Handle connection lifecycle and inbound state
                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => handle_event(event, &mut clients, &mut world),
                        None => break,
                    }
                },

                // Handle broadcast tick events
                _ = tick.tick() => {
                    broadcast_world(&mut clients, &mut world);
                },
            }
        }

        Ok(())
    }
}

/// Applies one event to the registry and world
///
/// Registration installs the spawn snapshot in the same step, and removal
/// deletes the player entry in the same step, so broadcasts never see a
/// connection without a player or a player without a connection.
fn handle_event(event: NetworkEvent, clients: &mut ClientManager, world: &mut WorldState) {
    match event {
        NetworkEvent::NewConnection {
            client_id,
            addr,
            sender,
        } => {
            clients.add_client(Client::new(client_id, addr, sender));
            world.add_player(client_id);
        }
        NetworkEvent::PlayerState { client_id, update } => {
            // A task may still report state while its removal is in flight
            if clients.contains(&client_id) {
                world.apply_state(client_id, update);
            }
        }
        NetworkEvent::ClientDisconnect { client_id } => {
            if clients.remove_client(&client_id) {
                world.remove_player(&client_id);
            }
        }
    }
}

/// Publishes the current world to every registered connection
///
/// Each client gets the snapshot tagged with its own identity. A failed
/// hand-off to one connection never aborts the pass: a full queue drops
/// this tick for that client only, and a closed channel marks the client
/// for removal once the pass completes.
fn broadcast_world(clients: &mut ClientManager, world: &mut WorldState) {
    let mut dead: Vec<u32> = Vec::new();

    for (client_id, client) in clients.iter() {
        let message = ServerMessage::World {
            id: *client_id,
            world: world.snapshot().clone(),
        };
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize world for client {}: {}", client_id, e);
                continue;
            }
        };

        match client.sender.try_send(frame::encode_frame(&json)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Client {} is lagging, dropping this tick", client_id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*client_id),
        }
    }

    for client_id in dead {
        if clients.remove_client(&client_id) {
            world.remove_player(&client_id);
        }
    }
}

/// Owns one client socket from accept to teardown
///
/// Performs the upgrade, announces the connection to the server loop, then
/// relays inbound frames upward and outbound frames to the socket until
/// either direction fails or the peer says goodbye.
async fn handle_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    client_id: u32,
    events: mpsc::UnboundedSender<NetworkEvent>,
) {
    let mut buf = match handshake::upgrade(&mut stream).await {
        Ok(leftover) => leftover,
        Err(e) => {
            warn!("Handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let (sender, mut outbound) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE);
    if events
        .send(NetworkEvent::NewConnection {
            client_id,
            addr,
            sender,
        })
        .is_err()
    {
        // Server loop is gone, nothing left to relay to
        return;
    }

    // The client may have pipelined frames right behind its request head
    if !drain_frames(&mut buf, client_id, &events) {
        let _ = events.send(NetworkEvent::ClientDisconnect { client_id });
        return;
    }

    let (mut reader, mut writer) = stream.split();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        buf.extend_from_slice(&chunk[..n]);
                        if !drain_frames(&mut buf, client_id, &events) {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("Read error for client {}: {}", client_id, e);
                        break;
                    }
                }
            },
            outgoing = outbound.recv() => {
                match outgoing {
                    Some(bytes) => {
                        if let Err(e) = writer.write_all(&bytes).await {
                            debug!("Write error for client {}: {}", client_id, e);
                            break;
                        }
                    }
                    // Unregistered by the server loop
                    None => break,
                }
            },
        }
    }

    let _ = events.send(NetworkEvent::ClientDisconnect { client_id });
}

/// Decodes every complete frame currently buffered
///
/// Returns false once the connection should be torn down (close frame or
/// an unrecoverable framing error).
fn drain_frames(
    buf: &mut Vec<u8>,
    client_id: u32,
    events: &mpsc::UnboundedSender<NetworkEvent>,
) -> bool {
    loop {
        match frame::decode_frame(buf) {
            Ok(Some(decoded)) => {
                let keep_going = handle_frame(&decoded, client_id, events);
                buf.drain(..decoded.consumed);
                if !keep_going {
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                // No way to find the next frame boundary past this
                warn!("Dropping client {}: {}", client_id, e);
                return false;
            }
        }
    }
}

/// Interprets one inbound frame; returns false on a close frame
fn handle_frame(
    decoded: &DecodedFrame,
    client_id: u32,
    events: &mpsc::UnboundedSender<NetworkEvent>,
) -> bool {
    if decoded.opcode == frame::OPCODE_CLOSE {
        debug!("Client {} sent close frame", client_id);
        return false;
    }
    if !decoded.fin || decoded.opcode != frame::OPCODE_TEXT {
        warn!(
            "Ignoring unsupported frame from client {} (fin: {}, opcode: {:#x})",
            client_id, decoded.fin, decoded.opcode
        );
        return true;
    }

    let text = match std::str::from_utf8(&decoded.payload) {
        Ok(text) => text,
        Err(_) => {
            warn!(
                "Malformed frame from client {}: payload is not valid UTF-8",
                client_id
            );
            return true;
        }
    };

    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::State(update)) => {
            let _ = events.send(NetworkEvent::PlayerState { client_id, update });
        }
        // Unknown types are accepted and ignored
        Ok(ClientMessage::Unknown) => {}
        Err(e) => warn!("Malformed frame from client {}: {}", client_id, e),
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::{PlayerSnapshot, DEFAULT_HP};

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn registered_client(
        clients: &mut ClientManager,
        world: &mut WorldState,
        client_id: u32,
        queue: usize,
    ) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(queue);
        handle_event(
            NetworkEvent::NewConnection {
                client_id,
                addr: test_addr(),
                sender: tx,
            },
            clients,
            world,
        );
        rx
    }

    fn decode_world(frame_bytes: &[u8]) -> (u32, shared::WorldSnapshot) {
        let decoded = frame::decode_frame(frame_bytes).unwrap().unwrap();
        let text = String::from_utf8(decoded.payload).unwrap();
        let ServerMessage::World { id, world } = serde_json::from_str(&text).unwrap();
        (id, world)
    }

    #[test]
    fn test_new_connection_installs_spawn_snapshot() {
        let mut clients = ClientManager::new();
        let mut world = WorldState::new();

        let _rx = registered_client(&mut clients, &mut world, 1, 4);

        assert!(clients.contains(&1));
        assert_eq!(world.snapshot().players[&1].hp, DEFAULT_HP);
    }

    #[test]
    fn test_disconnect_removes_registry_and_player_together() {
        let mut clients = ClientManager::new();
        let mut world = WorldState::new();
        let _rx = registered_client(&mut clients, &mut world, 1, 4);

        handle_event(
            NetworkEvent::ClientDisconnect { client_id: 1 },
            &mut clients,
            &mut world,
        );

        assert!(!clients.contains(&1));
        assert!(!world.snapshot().players.contains_key(&1));

        // A second disconnect for the same identity is a no-op
        handle_event(
            NetworkEvent::ClientDisconnect { client_id: 1 },
            &mut clients,
            &mut world,
        );
    }

    #[test]
    fn test_state_for_unregistered_identity_is_discarded() {
        let mut clients = ClientManager::new();
        let mut world = WorldState::new();

        handle_event(
            NetworkEvent::PlayerState {
                client_id: 42,
                update: StateUpdate {
                    player: PlayerSnapshot::default(),
                    bullets: None,
                    zombies: None,
                },
            },
            &mut clients,
            &mut world,
        );

        // No ghost entry may appear for a connection that is already gone
        assert!(world.snapshot().players.is_empty());
    }

    #[test]
    fn test_broadcast_tags_each_recipient_with_its_own_identity() {
        let mut clients = ClientManager::new();
        let mut world = WorldState::new();
        let mut rx1 = registered_client(&mut clients, &mut world, 1, 4);
        let mut rx2 = registered_client(&mut clients, &mut world, 2, 4);

        broadcast_world(&mut clients, &mut world);

        let (id1, world1) = decode_world(&rx1.try_recv().unwrap());
        let (id2, world2) = decode_world(&rx2.try_recv().unwrap());

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(world1.players.len(), 2);
        assert_eq!(world2.players.len(), 2);
    }

    #[test]
    fn test_broadcast_survives_one_dead_connection() {
        let mut clients = ClientManager::new();
        let mut world = WorldState::new();
        let mut rx1 = registered_client(&mut clients, &mut world, 1, 4);
        let rx2 = registered_client(&mut clients, &mut world, 2, 4);
        let mut rx3 = registered_client(&mut clients, &mut world, 3, 4);

        // Client 2's writer is gone
        drop(rx2);

        broadcast_world(&mut clients, &mut world);

        // The others still got this tick's frame
        assert!(rx1.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());

        // The dead connection was pruned from registry and world alike
        assert!(!clients.contains(&2));
        assert!(!world.snapshot().players.contains_key(&2));
        assert_eq!(clients.len(), 2);
    }

    #[test]
    fn test_broadcast_drops_tick_for_lagging_client_without_removal() {
        let mut clients = ClientManager::new();
        let mut world = WorldState::new();
        let _rx = registered_client(&mut clients, &mut world, 1, 1);

        // First pass fills the queue, second finds it full
        broadcast_world(&mut clients, &mut world);
        broadcast_world(&mut clients, &mut world);

        assert!(clients.contains(&1));
        assert!(world.snapshot().players.contains_key(&1));
    }

    #[test]
    fn test_drain_frames_forwards_state_updates() {
        let (events, mut event_rx) = mpsc::unbounded_channel();
        let text = json!({
            "type": "state",
            "player": { "x": 5.0, "y": 5.0, "angle": 0.0, "hp": 90 },
        })
        .to_string();
        let mut buf = frame::encode_masked_frame(&text, [1, 2, 3, 4]);

        assert!(drain_frames(&mut buf, 7, &events));
        assert!(buf.is_empty());

        match event_rx.try_recv().unwrap() {
            NetworkEvent::PlayerState { client_id, update } => {
                assert_eq!(client_id, 7);
                assert_eq!(update.player.hp, 90);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_drain_frames_keeps_connection_after_malformed_payload() {
        let (events, mut event_rx) = mpsc::unbounded_channel();
        let mut buf = frame::encode_masked_frame("this is not json", [1, 2, 3, 4]);
        let follow_up = json!({
            "type": "state",
            "player": { "x": 1.0, "y": 2.0, "angle": 3.0, "hp": 4 },
        })
        .to_string();
        buf.extend_from_slice(&frame::encode_masked_frame(&follow_up, [5, 6, 7, 8]));

        assert!(drain_frames(&mut buf, 7, &events));

        // The bad frame was dropped, the good one still went through
        assert!(matches!(
            event_rx.try_recv().unwrap(),
            NetworkEvent::PlayerState { client_id: 7, .. }
        ));
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn test_drain_frames_ignores_unknown_message_types() {
        let (events, mut event_rx) = mpsc::unbounded_channel();
        let text = json!({ "type": "chat", "text": "hello" }).to_string();
        let mut buf = frame::encode_masked_frame(&text, [1, 2, 3, 4]);

        assert!(drain_frames(&mut buf, 7, &events));
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn test_drain_frames_stops_on_close_frame() {
        let (events, _event_rx) = mpsc::unbounded_channel();
        // FIN + close opcode, masked empty payload
        let mut buf = vec![0x88, 0x80, 0, 0, 0, 0];

        assert!(!drain_frames(&mut buf, 7, &events));
    }

    #[test]
    fn test_drain_frames_leaves_partial_frame_buffered() {
        let (events, mut event_rx) = mpsc::unbounded_channel();
        let text = json!({
            "type": "state",
            "player": { "x": 0.0, "y": 0.0, "angle": 0.0, "hp": 100 },
        })
        .to_string();
        let wire = frame::encode_masked_frame(&text, [1, 2, 3, 4]);

        let mut buf = wire[..wire.len() / 2].to_vec();
        assert!(drain_frames(&mut buf, 7, &events));
        assert_eq!(buf.len(), wire.len() / 2);
        assert!(event_rx.try_recv().is_err());

        buf.extend_from_slice(&wire[wire.len() / 2..]);
        assert!(drain_frames(&mut buf, 7, &events));
        assert!(event_rx.try_recv().is_ok());
    }
}
