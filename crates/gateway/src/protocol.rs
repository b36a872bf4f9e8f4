use crate::error::GatewayResult;
use cadence_core::Track;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Initialize {
        token: String,
        broadcast: bool,
        presence: bool,
    },
    Player {
        track: Option<Track>,
        seek: f64,
        paused: bool,
        update: bool,
    },
    Seek {
        seek: f64,
    },
    Latency,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub message: Outbound,
    pub timestamp: Option<i64>,
}

impl Envelope {
    pub fn new(message: Outbound) -> Self {
        Self {
            message,
            timestamp: None,
        }
    }

    pub fn at(message: Outbound, timestamp: i64) -> Self {
        Self {
            message,
            timestamp: Some(timestamp),
        }
    }

    pub fn encode(&self, now_ms: i64) -> GatewayResult<String> {
        let stamped = Envelope {
            message: self.message.clone(),
            timestamp: Some(self.timestamp.unwrap_or(now_ms)),
        };
        Ok(serde_json::to_string(&stamped)?)
    }
}

impl From<Outbound> for Envelope {
    fn from(message: Outbound) -> Self {
        Envelope::new(message)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct SyncCommand {
    pub timestamp: Option<i64>,
    pub track: Option<Track>,
    pub progress: f64,
    pub paused: bool,
    pub seek: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    Latency {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Sync(SyncCommand),
    Recents {
        #[serde(default)]
        recents: Vec<Track>,
    },
    #[serde(other)]
    Unknown,
}

pub fn parse_inbound(raw: &str) -> GatewayResult<Inbound> {
    Ok(serde_json::from_str(raw)?)
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
