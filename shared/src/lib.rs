//! # Shared Arena Types
//!
//! Types and constants used by both the authoritative room server and the
//! client runtime. Everything that crosses the wire lives here so both sides
//! agree on field names and encodings.
//!
//! ## Modules
//!
//! - `math`: `Vec3`/`Quat` with the interpolation helpers the client uses
//! - `model`: replicated `NetworkedEntity` and `NetworkedUser` records
//! - `game_state`: round phase labels, room attribute keys and `Winner`
//! - `protocol`: `ClientMessage`/`ServerMessage` and their payloads
//! - `codec`: length-prefixed JSON framing over tokio streams

pub mod codec;
pub mod game_state;
pub mod math;
pub mod model;
pub mod protocol;

use rand::distributions::Alphanumeric;
use rand::Rng;

pub use game_state::{CountDownState, ServerGameState, Winner};
pub use math::{Quat, Vec3};
pub use model::{NetworkedEntity, NetworkedUser, TransformField};
pub use protocol::{ClientMessage, ServerMessage, StateChange};

/// Snapshots kept per remote entity on the client
pub const PROXY_BUFFER_DEPTH: usize = 20;

pub const DEFAULT_PATCH_RATE_HZ: u32 = 20;
pub const DEFAULT_TICK_RATE_HZ: u32 = 30;
pub const DEFAULT_RECONNECT_GRACE_SECS: u64 = 10;
pub const DEFAULT_MAX_CLIENTS: usize = 25;
pub const DEFAULT_MIN_REQ_PLAYERS: usize = 2;

pub const PING_INTERVAL_MS: u64 = 500;
pub const PING_TIMEOUT_SECS: u64 = 15;
pub const REJOIN_BACKOFF_SECS: u64 = 5;

pub const DEFAULT_INTERPOLATION_BACK_MS: f64 = 200.0;
pub const DEFAULT_EXTRAPOLATION_LIMIT_MS: f64 = 500.0;
/// Rotation deltas above this many degrees snap instead of slerping
pub const DEFAULT_SNAP_ANGLE_DEG: f32 = 100.0;
pub const DEFAULT_LERP_SPEED: f32 = 5.0;
pub const DEFAULT_SLERP_SPEED: f32 = 5.0;
/// Catch-up gain per second of snapshot staleness
pub const CATCH_UP_GAIN: f32 = 0.2;
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 100;

const ID_LEN: usize = 9;

/// Random 9-character alphanumeric id for entities, users and creation requests
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}
