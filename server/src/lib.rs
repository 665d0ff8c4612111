//! # Arena Room Server Library
//!
//! This library provides the authoritative room server for the arena
//! shooter. It owns the canonical world state, replicates it to every
//! connected client at a fixed rate, and drives the round life-cycle.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! The room's [`store::EntityStore`] holds every networked entity, user and
//! room attribute. Entities are written only by their owning connection;
//! round logic is the only writer of phase attributes.
//!
//! ### Replication
//! Every store mutation lands in a change log. The
//! [`replication::ReplicationChannel`] coalesces it into one `statePatch`
//! per patch interval (20 Hz by default). Newly joined clients receive a
//! full `stateSnapshot` instead.
//!
//! ### Round Life-Cycle
//! [`round::RoundController`] runs Waiting -> BeginRound -> SimulateRound ->
//! EndRound with a nested countdown, kill scoring, winner/tie resolution and
//! join locking. Phase labels are projected onto room attributes so clients
//! can mirror them.
//!
//! ### Connection Lifecycle
//! [`client_manager::ClientManager`] binds connections to users. A dropped
//! connection keeps its user and entities for a grace period (10 s by
//! default); rejoining with the same session id resumes the same identity.
//!
//! ## Architecture Design
//!
//! ### Single Room Loop
//! All handlers and ticks for a room run sequentially on one task, so no
//! handler ever races the tick or another handler. Network reader/writer
//! tasks only move frames between sockets and channels.
//!
//! ### Explicit Context
//! Round logic and custom methods receive a [`context::RoomContext`]
//! (store, outbox, admission, clock) rather than reaching for globals, so
//! any number of rooms can live in one process.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::RoomOptions;
//! use server::network::{LoopTiming, Server};
//! use server::room::Room;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let room = Room::new(RoomOptions::default());
//!     let mut server = Server::new("127.0.0.1:2567", room, LoopTiming::default()).await?;
//!
//!     // Accepts connections, ticks the round and broadcasts patches
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod context;
pub mod custom_methods;
pub mod error;
pub mod network;
pub mod replication;
pub mod room;
pub mod round;
pub mod store;
