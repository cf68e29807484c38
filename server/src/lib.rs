//! # Relay Server Library
//!
//! This library implements the server half of a client-authoritative
//! multiplayer game. Clients simulate their own physics and AI locally and
//! report the results; the server's whole job is to merge those reports
//! into one world snapshot and fan it back out to everyone, fast enough to
//! never become the bottleneck.
//!
//! ## Core Responsibilities
//!
//! ### Protocol Upgrade
//! Every connection arrives as a plain TCP socket carrying an HTTP upgrade
//! request. The handshake module validates it, answers with the computed
//! accept key and promotes the socket to a framed message channel.
//!
//! ### Frame Codec
//! After the upgrade, traffic is exchanged as single binary text frames
//! with the three-tier length encoding and client-side masking. The codec
//! is pure and incremental, so partial TCP reads are handled naturally.
//!
//! ### Connection Registry
//! Each promoted connection gets a monotonically increasing identity and a
//! bounded outbound queue. The registry is the authority on who receives
//! broadcasts; removing an entry also removes the player's world entry in
//! the same step, so no ghost players can ever be published.
//!
//! ### State Relay
//! Inbound `state` messages overwrite the sender's player snapshot and
//! whole-replace the shared bullet/zombie arrays, last writer wins. Every
//! 50 ms the broadcast tick serializes the world once per recipient,
//! tagged with that recipient's own identity.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! One task owns both the registry and the world. Connection tasks talk to
//! it through an event channel, and the broadcast tick runs inside it.
//! This serializes every mutation without locks, so a broadcast pass can
//! never observe a half-applied update.
//!
//! ### One Task per Connection
//! Each connection task handles its own socket reads and writes. A slow or
//! dead peer therefore stalls only itself: broadcasts hand frames to a
//! bounded per-connection queue and drop the tick when the queue is full.
//!
//! ## Module Organization
//!
//! - [`frame`]: binary frame encode/decode
//! - [`handshake`]: the one-shot protocol upgrade
//! - [`client_manager`]: the connection registry
//! - [`game`]: the shared world snapshot and its merge rules
//! - [`network`]: listener, connection tasks, event loop and broadcasts
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Bind the relay and broadcast the world every 50 ms
//!     let mut server = Server::new("0.0.0.0:8765", Duration::from_millis(50)).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod frame;
pub mod game;
pub mod handshake;
pub mod network;
