//! Bridge configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Settings for the dev-server side of the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeConfig {
    /// HTTP path the MCP endpoint is mounted on.
    pub endpoint: String,
    /// Websocket path pages connect to.
    pub bridge_path: String,
    /// `serverInfo.name`.
    pub name: String,
    /// `serverInfo.version`.
    pub version: String,
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Per-call timeout in milliseconds. Absent means calls wait forever.
    pub call_timeout_ms: Option<u64>,
    /// Where `saveScreenshot` writes files.
    pub screenshots_dir: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: "/mcp".into(),
            bridge_path: "/__mcp_bridge".into(),
            name: "Vite MCP Server".into(),
            version: "1.0.0".into(),
            host: "127.0.0.1".into(),
            port: 3000,
            call_timeout_ms: None,
            screenshots_dir: PathBuf::from("tmp").join("screenshots"),
        }
    }
}

impl BridgeConfig {
    /// Load a JSON config file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Check that both paths can be mounted on one router.
    pub fn validate(&self) -> Result<()> {
        for (field, path) in [("endpoint", &self.endpoint), ("bridgePath", &self.bridge_path)] {
            if !path.starts_with('/') {
                return Err(Error::InvalidParams(format!(
                    "{field} must start with '/': {path:?}"
                )));
            }
        }
        if self.endpoint == self.bridge_path {
            return Err(Error::InvalidParams(format!(
                "endpoint and bridgePath must differ: {:?}",
                self.endpoint
            )));
        }
        Ok(())
    }

    /// The call timeout as a duration.
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    /// `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
