//! Command line arguments and room creation options

use clap::Parser;
use serde_json::Value;
use shared::model::value_as_f64;
use std::collections::HashMap;
use std::time::Duration;

/// Arena room server
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about)]
pub struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "2567")]
    pub port: u16,
    /// Simulation ticks per second
    #[clap(short, long, default_value_t = shared::DEFAULT_TICK_RATE_HZ)]
    pub tick_rate: u32,
    /// State patches broadcast per second
    #[clap(long, default_value_t = shared::DEFAULT_PATCH_RATE_HZ)]
    pub patch_rate: u32,
    /// Maximum number of users in the room
    #[clap(short, long, default_value_t = shared::DEFAULT_MAX_CLIENTS)]
    pub max_clients: usize,
    /// Users required before a round can start
    #[clap(long)]
    pub min_req_players: Option<usize>,
    /// Fixed room id instead of a generated one
    #[clap(long)]
    pub room_id: Option<String>,
    /// Seconds a dropped connection may take to reconnect
    #[clap(long, default_value_t = shared::DEFAULT_RECONNECT_GRACE_SECS)]
    pub reconnect_grace: u64,
}

impl Args {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.max(1) as f64)
    }

    pub fn patch_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.patch_rate.max(1) as f64)
    }

    /// Room options as they would arrive in a room creation request
    pub fn creation_options(&self) -> HashMap<String, Value> {
        let mut options = HashMap::new();
        if let Some(min) = self.min_req_players {
            options.insert("minReqPlayers".to_string(), Value::from(min));
        }
        if let Some(room_id) = &self.room_id {
            options.insert("roomId".to_string(), Value::from(room_id.clone()));
        }
        options
    }

    pub fn room_options(&self) -> RoomOptions {
        let mut options = RoomOptions::from_options(&self.creation_options());
        options.max_clients = self.max_clients;
        options.reconnect_grace = Duration::from_secs(self.reconnect_grace);
        options
    }
}

/// Settings a room is created with
#[derive(Debug, Clone, PartialEq)]
pub struct RoomOptions {
    pub room_id: Option<String>,
    pub min_req_players: usize,
    pub max_clients: usize,
    pub reconnect_grace: Duration,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            room_id: None,
            min_req_players: shared::DEFAULT_MIN_REQ_PLAYERS,
            max_clients: shared::DEFAULT_MAX_CLIENTS,
            reconnect_grace: Duration::from_secs(shared::DEFAULT_RECONNECT_GRACE_SECS),
        }
    }
}

impl RoomOptions {
    /// Reads `minReqPlayers` and `roomId` from a creation options map.
    /// Missing or unparsable values fall back to defaults.
    pub fn from_options(options: &HashMap<String, Value>) -> Self {
        let mut room_options = RoomOptions::default();

        if let Some(min) = options
            .get("minReqPlayers")
            .and_then(value_as_f64)
            .filter(|min| *min >= 0.0)
        {
            room_options.min_req_players = min as usize;
        }

        room_options.room_id = match options.get("roomId") {
            Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
            _ => None,
        };

        room_options
    }
}
