use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackOrigin {
    #[default]
    Remote,
    Downloaded,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    Queue,
    Track,
}

impl RepeatMode {
    pub fn next(self) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::Queue,
            RepeatMode::Queue => RepeatMode::Track,
            RepeatMode::Track => RepeatMode::Off,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub icon: String,
    pub source_url: String,
    pub duration: f64,
    pub origin: TrackOrigin,
}

impl Track {
    pub fn is_local(&self) -> bool {
        self.origin == TrackOrigin::Downloaded
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlayableItem {
    pub id: Option<String>,
    pub url: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub artwork: Option<String>,
    pub duration: Option<f64>,
    pub is_local: bool,
}
