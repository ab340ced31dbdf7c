//! Server and networking configuration types.

use std::path::PathBuf;

use serde::Deserialize;

/// Control-plane server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener type: "uds" or "tcp".
    pub transport: String,
    /// Directory holding the registry socket (uds only).
    pub socket_dir: String,
    /// Host to bind to (tcp only).
    pub host: String,
    /// Port to bind to (tcp only).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "uds".to_string(),
            socket_dir: "/tmp/patchbay".to_string(),
            host: "127.0.0.1".to_string(),
            port: 9700,
        }
    }
}

impl ServerConfig {
    /// Path of the registry socket under `socket_dir`.
    pub fn socket_path(&self) -> PathBuf {
        PathBuf::from(&self.socket_dir).join("registry.sock")
    }

    /// Endpoint string clients can dial, matching the transport type.
    pub fn endpoint(&self) -> String {
        if self.transport == "tcp" {
            format!("{}:{}", self.host, self.port)
        } else {
            self.socket_path().to_string_lossy().into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let server = ServerConfig::default();
        assert_eq!(server.transport, "uds");
        assert_eq!(server.socket_dir, "/tmp/patchbay");
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.port, 9700);
    }

    #[test]
    fn test_endpoint_uds() {
        let server = ServerConfig::default();
        assert_eq!(server.endpoint(), "/tmp/patchbay/registry.sock");
    }

    #[test]
    fn test_endpoint_tcp() {
        let server = ServerConfig {
            transport: "tcp".to_string(),
            ..Default::default()
        };
        assert_eq!(server.endpoint(), "127.0.0.1:9700");
    }

    #[test]
    fn test_server_config_from_yaml() {
        let yaml = r#"
transport: tcp
host: 0.0.0.0
port: 9800
"#;
        let server: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(server.transport, "tcp");
        assert_eq!(server.endpoint(), "0.0.0.0:9800");
        assert_eq!(server.socket_dir, "/tmp/patchbay");
    }
}
