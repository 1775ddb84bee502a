//! Connection configuration: the endpoint, transport stack options,
//! heartbeat/reconnect settings and the ordered middleware list a
//! [`crate::connection::Connection`] is built from.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nexuskit_middleware::Middleware;
use nexuskit_transport::{CipherPolicy, Socks5Auth, TlsVersion};

/// Where to dial. TCP carries its own host/port; WebSocket carries a full
/// URL (scheme rewriting for Engine.IO happens one layer up).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Ws { url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMode {
    Client,
    Server,
    Both,
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub enabled: bool,
    pub mode: HeartbeatMode,
    pub adaptive: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            enabled: true,
            mode: HeartbeatMode::Client,
            adaptive: false,
        }
    }
}

/// TLS options, reusing the transport layer's pinning/cipher types
/// directly rather than re-declaring parallel ones.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub server_name: Option<String>,
    pub alpn_protocols: Vec<Vec<u8>>,
    pub version: TlsVersion,
    pub cipher_policy: CipherPolicy,
    pub pins: Option<Vec<nexuskit_transport::CertPin>>,
    pub allow_self_signed: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            server_name: None,
            alpn_protocols: Vec::new(),
            version: TlsVersion::Auto,
            cipher_policy: CipherPolicy::Default,
            pins: None,
            allow_self_signed: false,
        }
    }
}

/// SOCKS5 tunnelling options.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub auth: Option<Socks5Auth>,
}

/// Everything a `Connection` needs to drive one endpoint.
#[derive(Clone)]
pub struct ConnectionConfiguration {
    pub id: String,
    pub endpoint: Endpoint,
    pub middlewares: Vec<Arc<dyn Middleware>>,
    pub connect_timeout: Duration,
    pub read_write_timeout: Duration,
    pub heartbeat: HeartbeatConfig,
    pub tls: Option<TlsSettings>,
    pub proxy: Option<ProxyConfig>,
    pub metadata: HashMap<String, String>,
}

impl ConnectionConfiguration {
    pub fn new(id: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            endpoint,
            middlewares: Vec::new(),
            connect_timeout: Duration::from_secs(10),
            read_write_timeout: Duration::from_secs(30),
            heartbeat: HeartbeatConfig::default(),
            tls: None,
            proxy: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }
}
