//! Round phase labels and the room attribute keys they travel under

use serde::{Deserialize, Serialize};

/// Room attribute keys used for phase signaling
pub mod keys {
    pub const CURRENT_GAME_STATE: &str = "currentGameState";
    pub const LAST_GAME_STATE: &str = "lastGameState";
    pub const COUNT_DOWN: &str = "countDown";
    pub const COUNT_DOWN_STATE: &str = "CurrentCountDownState";
    pub const CURR_COUNT_DOWN: &str = "currCountDown";
    pub const GENERAL_MESSAGE: &str = "generalMessage";
}

/// Authoritative round phases as they appear on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServerGameState {
    #[default]
    None,
    Waiting,
    BeginRound,
    SimulateRound,
    EndRound,
}

impl ServerGameState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerGameState::None => "None",
            ServerGameState::Waiting => "Waiting",
            ServerGameState::BeginRound => "BeginRound",
            ServerGameState::SimulateRound => "SimulateRound",
            ServerGameState::EndRound => "EndRound",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "None" => Some(ServerGameState::None),
            "Waiting" => Some(ServerGameState::Waiting),
            "BeginRound" => Some(ServerGameState::BeginRound),
            "SimulateRound" => Some(ServerGameState::SimulateRound),
            "EndRound" => Some(ServerGameState::EndRound),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServerGameState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phases of the pre-round countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CountDownState {
    #[default]
    Enter,
    GetReady,
    CountDown,
}

impl CountDownState {
    pub fn as_str(self) -> &'static str {
        match self {
            CountDownState::Enter => "Enter",
            CountDownState::GetReady => "GetReady",
            CountDownState::CountDown => "CountDown",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "Enter" => Some(CountDownState::Enter),
            "GetReady" => Some(CountDownState::GetReady),
            "CountDown" => Some(CountDownState::CountDown),
            _ => None,
        }
    }
}

/// Result of a finished round
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Winner {
    pub id: String,
    pub score: u32,
    pub tie: bool,
    #[serde(default)]
    pub tied: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_labels_round_trip() {
        for state in [
            ServerGameState::None,
            ServerGameState::Waiting,
            ServerGameState::BeginRound,
            ServerGameState::SimulateRound,
            ServerGameState::EndRound,
        ] {
            assert_eq!(ServerGameState::from_wire(state.as_str()), Some(state));
        }
        assert_eq!(ServerGameState::from_wire("SendTargets"), None);
    }

    #[test]
    fn test_countdown_labels() {
        assert_eq!(CountDownState::default(), CountDownState::Enter);
        assert_eq!(
            CountDownState::from_wire("GetReady"),
            Some(CountDownState::GetReady)
        );
        assert_eq!(CountDownState::CountDown.as_str(), "CountDown");
    }

    #[test]
    fn test_winner_wire_shape() {
        let winner = Winner {
            id: String::new(),
            score: 5,
            tie: true,
            tied: vec!["B".into(), "C".into()],
        };
        let json = serde_json::to_value(&winner).unwrap();
        assert_eq!(json["tie"], true);
        assert_eq!(json["tied"][1], "C");
    }
}
