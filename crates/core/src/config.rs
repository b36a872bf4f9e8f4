use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_schema_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub url: Option<String>,
    pub token: String,
    pub broadcast: bool,
    pub presence: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: String::new(),
            broadcast: true,
            presence: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub base_url: String,
    pub media_dir: PathBuf,
    pub log_level: String,
    pub gateway: GatewayConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            base_url: "http://127.0.0.1:8080/".to_string(),
            media_dir: PathBuf::from("media"),
            log_level: "info".to_string(),
            gateway: GatewayConfig::default(),
        }
    }
}
