pub mod config;
pub mod model;
pub mod transform;

pub use config::{AppConfig, GatewayConfig};
pub use model::{PlayableItem, RepeatMode, Track, TrackOrigin};
pub use transform::{from_playable_item, to_playable_source, SourceResolver};
