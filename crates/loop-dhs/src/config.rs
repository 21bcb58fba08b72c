//! Configuration types for loop-dhs.
//! Parsed from config/<beamline>.toml.

use std::path::{Path, PathBuf};

use dhs_core::TransportConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub dcss: Endpoint,
    #[serde(default = "default_automl")]
    pub automl: AutomlSection,
    #[serde(default = "default_axis")]
    pub axis: Endpoint,
    #[serde(default = "default_jpeg_receiver")]
    pub jpeg_receiver: Endpoint,
    /// Timings shared by every connection.
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    fn url(&self, scheme: &str) -> String {
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomlSection {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_heartbeat_path")]
    pub heartbeat_path: String,
    /// Image sent by the `predictOne` test operation.
    #[serde(default = "default_test_image")]
    pub test_image: PathBuf,
}

fn default_automl() -> AutomlSection {
    AutomlSection {
        host: "localhost".into(),
        port: 8080,
        heartbeat_path: default_heartbeat_path(),
        test_image: default_test_image(),
    }
}
fn default_heartbeat_path() -> String {
    dhs_services::automl::HEALTH_PATH.into()
}
fn default_test_image() -> PathBuf {
    "tests/loop_nylon.jpg".into()
}
fn default_axis() -> Endpoint {
    Endpoint {
        host: "localhost".into(),
        port: 80,
    }
}
fn default_jpeg_receiver() -> Endpoint {
    Endpoint {
        host: "0.0.0.0".into(),
        port: 7171,
    }
}

impl LoopConfig {
    /// Conventional location of a beamline's config file.
    pub fn default_path(beamline: &str) -> PathBuf {
        PathBuf::from("config").join(format!("{beamline}.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn dcss_url(&self) -> String {
        self.dcss.url("dcss")
    }

    pub fn automl_url(&self) -> String {
        format!("http://{}:{}", self.automl.host, self.automl.port)
    }

    pub fn axis_url(&self) -> String {
        self.axis.url("http")
    }

    pub fn jpeg_receiver_url(&self) -> String {
        self.jpeg_receiver.url("http")
    }

    /// Transport settings for the AutoML connection, probing the model's health path.
    pub fn automl_transport(&self) -> TransportConfig {
        TransportConfig {
            heartbeat_path: Some(self.automl.heartbeat_path.clone()),
            ..self.transport.clone()
        }
    }
}
