//! # Arena Client Library
//!
//! Client side of the arena state-synchronization layer. The client keeps a
//! cache of the room it joined, smooths the motion of entities owned by other
//! players, publishes the transform of the entities it owns and mirrors the
//! server's round phase.
//!
//! ## Architecture Overview
//!
//! ### Room Cache
//! [`room::ClientRoom`] applies every message the server sends (full
//! snapshots, coalesced patches, RFC envelopes, round signals) and returns
//! explicit [`room::ClientEvent`]s. It also builds the outgoing requests,
//! including entity creation with a one-shot confirmation callback.
//!
//! ### Snapshot Interpolation
//! Every authoritative change of a remote entity is pushed into that entity's
//! [`proxy::ProxyBuffer`]. Each frame the [`motion::MotionReconciler`] renders
//! the entity slightly in the past, easing toward the newest snapshot, then
//! extrapolating along the last velocity for a bounded time before freezing.
//!
//! ### Owned Entities
//! The owner is the only writer of an entity's transform. The
//! [`motion::OwnedEntitySync`] samples the local transform at a fixed cadence
//! and sends only the fields that changed since the last send.
//!
//! ### Remote Function Calls
//! [`rfc::RfcDispatcher`] resolves relayed calls against views bound to
//! entities, using per-view-type registries of named handlers.
//!
//! ### Round Mirror
//! [`state_mirror::StateMirror`] tracks the round phase published on the room
//! attributes and refuses transitions the phase table does not allow.
//!
//! ## Module Organization
//!
//! - `network`: TCP session loop, ping, rejoin, and the headless [`network::Client`]
//! - `input`: scripted movement and fire decisions for the headless client
//! - `room`, `proxy`, `motion`, `rfc`, `state_mirror`: described above
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientSettings};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! let mut client = Client::new(ClientSettings::default());
//! client.run(shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod input;
pub mod motion;
pub mod network;
pub mod proxy;
pub mod rfc;
pub mod room;
pub mod state_mirror;

pub use error::ClientError;
