//! Client configuration for the Engine.IO and Socket.IO layers.

use std::time::Duration;

/// Settings for one Engine.IO session.
#[derive(Debug, Clone)]
pub struct EngineIoConfig {
    /// Server URL; `http`/`https` map to `ws`/`wss`.
    pub url: String,
    /// Mount path, used when the URL has none.
    pub path: String,
    /// Extra query pairs appended after `EIO=4&transport=websocket`.
    pub query: Vec<(String, String)>,
    pub connect_timeout: Duration,
}

impl Default for EngineIoConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            path: "/socket.io/".to_string(),
            query: Vec::new(),
            connect_timeout: Duration::from_secs(20),
        }
    }
}

/// Settings for the Socket.IO client layered above.
#[derive(Debug, Clone)]
pub struct SocketIoConfig {
    pub url: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    /// Whether a dropped session is redialed automatically.
    pub reconnect: bool,
    pub reconnection_attempts: u32,
    pub reconnection_delay: Duration,
    pub reconnection_delay_max: Duration,
    /// Bound on connect and on waiting for the server's CONNECT
    /// confirmation per namespace.
    pub timeout: Duration,
}

impl SocketIoConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: "/socket.io/".to_string(),
            query: Vec::new(),
            reconnect: true,
            reconnection_attempts: u32::MAX,
            reconnection_delay: Duration::from_secs(1),
            reconnection_delay_max: Duration::from_secs(5),
            timeout: Duration::from_secs(20),
        }
    }

    pub(crate) fn engine_config(&self) -> EngineIoConfig {
        EngineIoConfig {
            url: self.url.clone(),
            path: self.path.clone(),
            query: self.query.clone(),
            connect_timeout: self.timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let cfg = SocketIoConfig::new("http://localhost:3000");
        assert_eq!(cfg.path, "/socket.io/");
        assert!(cfg.reconnect);
        assert_eq!(cfg.reconnection_delay, Duration::from_secs(1));
        assert_eq!(cfg.reconnection_delay_max, Duration::from_secs(5));
        assert_eq!(cfg.timeout, Duration::from_secs(20));
    }
}
