//! TLS transport layer, via `tokio-rustls`. Wraps an inner
//! [`Transport`] (bridged to `AsyncRead + AsyncWrite` by [`TransportIo`]) the
//! same way `Socks5Transport` wraps one, so TLS composes transparently on
//! top of a plain TCP dial or a SOCKS5 tunnel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::TransportError;
use crate::io_bridge::TransportIo;
use crate::transport::{PeerInfo, Transport};

const READ_CHUNK: usize = 64 * 1024;

/// Which protocol version(s) the handshake offers. `Auto` defers to the
/// cipher policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    Tls12,
    Tls13,
    Auto,
}

/// Coarse handshake strictness, applied when the version is `Auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherPolicy {
    /// TLS 1.3 only.
    Modern,
    /// TLS 1.3 with a 1.2 fallback, for interop with older servers.
    Compatible,
    /// Whatever the `ring` provider ships by default (1.3 + 1.2).
    Default,
}

/// A certificate pin, compared against the leaf certificate's SHA-256
/// digest by default, or byte-equal to the raw DER.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertPin {
    Sha256([u8; 32]),
    Der(Vec<u8>),
}

impl CertPin {
    /// Pin every certificate in a PEM bundle by its raw DER.
    pub fn from_pem(pem: &[u8]) -> Result<Vec<CertPin>, TransportError> {
        let mut reader = std::io::BufReader::new(pem);
        let mut pins = Vec::new();
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(TransportError::Io)?;
            pins.push(CertPin::Der(cert.as_ref().to_vec()));
        }
        if pins.is_empty() {
            return Err(TransportError::TlsHandshake(
                "no certificates in PEM bundle".into(),
            ));
        }
        Ok(pins)
    }

    /// Parse a hex-encoded SHA-256 digest, e.g. from configuration.
    pub fn from_sha256_hex(hex_digest: &str) -> Result<Self, TransportError> {
        let bytes = hex::decode(hex_digest)
            .map_err(|e| TransportError::InvalidServerName(e.to_string()))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TransportError::InvalidServerName("pin must be 32 bytes".into()))?;
        Ok(CertPin::Sha256(digest))
    }

    fn matches(&self, leaf_der: &[u8]) -> bool {
        match self {
            CertPin::Sha256(expected) => {
                let digest: [u8; 32] = Sha256::digest(leaf_der).into();
                &digest == expected
            }
            CertPin::Der(expected) => expected.as_slice() == leaf_der,
        }
    }
}

/// Outcome of a completed handshake, cached process-wide by
/// `(host, port, cipher policy)`.
#[derive(Debug, Clone)]
pub struct TlsInfo {
    pub peer_cert_der: Vec<u8>,
    pub alpn_selected: Option<Vec<u8>>,
}

type TlsCacheKey = (String, u16, CipherPolicy);
static TLS_CACHE: Lazy<DashMap<TlsCacheKey, TlsInfo>> = Lazy::new(DashMap::new);

#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub server_name: String,
    pub alpn_protocols: Vec<Vec<u8>>,
    pub version: TlsVersion,
    pub cipher_policy: CipherPolicy,
    pub pins: Option<Vec<CertPin>>,
    /// Skip chain validation entirely, accepting self-signed peers. Ignored
    /// when `pins` is set — pinning already replaces PKI validation.
    pub allow_self_signed: bool,
}

impl TlsConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            alpn_protocols: Vec::new(),
            version: TlsVersion::Auto,
            cipher_policy: CipherPolicy::Default,
            pins: None,
            allow_self_signed: false,
        }
    }
}

static TLS12_ONLY: [&rustls::SupportedProtocolVersion; 1] = [&rustls::version::TLS12];
static TLS13_ONLY: [&rustls::SupportedProtocolVersion; 1] = [&rustls::version::TLS13];
static TLS13_THEN_TLS12: [&rustls::SupportedProtocolVersion; 2] =
    [&rustls::version::TLS13, &rustls::version::TLS12];

fn protocol_versions(
    version: TlsVersion,
    policy: CipherPolicy,
) -> &'static [&'static rustls::SupportedProtocolVersion] {
    match version {
        TlsVersion::Tls12 => &TLS12_ONLY,
        TlsVersion::Tls13 => &TLS13_ONLY,
        TlsVersion::Auto => match policy {
            CipherPolicy::Modern => &TLS13_ONLY,
            CipherPolicy::Compatible | CipherPolicy::Default => &TLS13_THEN_TLS12,
        },
    }
}

/// Marker the pinning verifier plants in its handshake error, so the
/// connect path can tell a pin failure apart from every other alert the
/// rustls stack renders through the same `io::Error` wrapper.
const PIN_MISMATCH: &str = "certificate pin mismatch";

/// Accepts any chain (skips PKI validation) and instead checks the leaf
/// certificate against the configured pins. Used only when `pins` is set.
#[derive(Debug)]
struct PinningVerifier {
    pins: Vec<CertPin>,
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.pins.iter().any(|p| p.matches(end_entity.as_ref())) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(PIN_MISMATCH.into()))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

/// Accepts any presented chain without validation. Only reachable through
/// `TlsConfig::allow_self_signed` with no pins configured.
#[derive(Debug)]
struct AcceptAnyVerifier {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}

fn build_client_config(cfg: &TlsConfig) -> Result<ClientConfig, TransportError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let versions = protocol_versions(cfg.version, cfg.cipher_policy);

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(versions)
        .map_err(|e| TransportError::TlsHandshake(e.to_string()))?;

    let mut config = if let Some(pins) = cfg.pins.clone() {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(PinningVerifier { pins, provider }))
            .with_no_client_auth()
    } else if cfg.allow_self_signed {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyVerifier { provider }))
            .with_no_client_auth()
    } else {
        let mut roots = RootCertStore::empty();
        for cert in rustls_native_certs::load_native_certs().certs {
            let _ = roots.add(cert);
        }
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    if !cfg.alpn_protocols.is_empty() {
        config.alpn_protocols = cfg.alpn_protocols.clone();
    }
    Ok(config)
}

/// A TLS session over any inner [`Transport`].
pub struct TlsTransport {
    inner: Option<Box<dyn Transport>>,
    stream: Option<TlsStream<TransportIo>>,
    config: TlsConfig,
    peer: Option<PeerInfo>,
    last_info: Option<TlsInfo>,
}

impl TlsTransport {
    pub fn new(inner: Box<dyn Transport>, config: TlsConfig) -> Self {
        Self {
            inner: Some(inner),
            stream: None,
            config,
            peer: None,
            last_info: None,
        }
    }

    pub fn last_handshake_info(&self) -> Option<&TlsInfo> {
        self.last_info.as_ref()
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        let mut inner = self.inner.take().ok_or(TransportError::NotConnected)?;
        inner.connect(timeout).await?;
        let peer = inner.peer_info();

        let client_config = build_client_config(&self.config)?;
        let connector = TlsConnector::from(Arc::new(client_config));
        let server_name = ServerName::try_from(self.config.server_name.clone())
            .map_err(|_| TransportError::InvalidServerName(self.config.server_name.clone()))?;

        let io = TransportIo::new(inner);
        let stream = tokio::time::timeout(timeout, connector.connect(server_name, io))
            .await
            .map_err(|_| TransportError::ConnectTimeout)?
            .map_err(|e| {
                let rendered = e.to_string();
                if rendered.contains(PIN_MISMATCH) {
                    TransportError::PinMismatch
                } else {
                    TransportError::TlsHandshake(rendered)
                }
            })?;

        let (_, conn) = stream.get_ref();
        let peer_cert_der = conn
            .peer_certificates()
            .and_then(|certs| certs.first())
            .map(|c| c.as_ref().to_vec())
            .unwrap_or_default();
        let alpn_selected = conn.alpn_protocol().map(|p| p.to_vec());

        let info = TlsInfo {
            peer_cert_der,
            alpn_selected,
        };
        if let Some(PeerInfo { address, port }) = &peer {
            TLS_CACHE.insert(
                (address.clone(), *port, self.config.cipher_policy),
                info.clone(),
            );
        }
        debug!(server_name = %self.config.server_name, "tls handshake complete");
        self.last_info = Some(info);
        self.peer = peer;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(bytes).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buf = vec![0u8; READ_CHUNK];
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }

    fn peer_info(&self) -> Option<PeerInfo> {
        self.peer.clone()
    }
}

/// Look up a cached handshake result from a prior connection to the same
/// `(host, port)` under the same cipher policy.
pub fn cached_tls_info(host: &str, port: u16, policy: CipherPolicy) -> Option<TlsInfo> {
    TLS_CACHE
        .get(&(host.to_string(), port, policy))
        .map(|entry| entry.clone())
}
