//! SOCKS5 tunnelling: RFC 1928 CONNECT plus RFC 1929 user/pass auth.
//!
//! `Socks5Transport` owns an inner transport already dialed to the proxy
//! address, negotiates a CONNECT to the real target over it, then forwards
//! `send`/`recv` through — composing transparently under TLS, since TLS just
//! wraps this the same way it wraps a bare `TcpTransport`.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{PeerInfo, Transport};

const VER: u8 = 0x05;
const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_V4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_V6: u8 = 0x04;

fn map_rep_error(rep: u8) -> TransportError {
    TransportError::ProxyNegotiationFailed(rep)
}

/// SOCKS5 proxy credentials, per RFC 1929.
#[derive(Debug, Clone)]
pub struct Socks5Auth {
    pub username: String,
    pub password: String,
}

pub struct Socks5Transport {
    inner: Box<dyn Transport>,
    target_host: String,
    target_port: u16,
    auth: Option<Socks5Auth>,
    read_buf: Vec<u8>,
    peer: Option<PeerInfo>,
}

impl Socks5Transport {
    pub fn new(
        inner: Box<dyn Transport>,
        target_host: impl Into<String>,
        target_port: u16,
        auth: Option<Socks5Auth>,
    ) -> Self {
        Self {
            inner,
            target_host: target_host.into(),
            target_port,
            auth,
            read_buf: Vec::new(),
            peer: None,
        }
    }

    /// Pull exactly `n` bytes, first from the leftover buffer, then from the
    /// inner transport, buffering any surplus for the next call.
    async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        while self.read_buf.len() < n {
            let chunk = self.inner.recv().await?;
            self.read_buf.extend_from_slice(&chunk);
        }
        let rest = self.read_buf.split_off(n);
        let taken = std::mem::replace(&mut self.read_buf, rest);
        Ok(taken)
    }

    async fn negotiate_method(&mut self) -> Result<(), TransportError> {
        let mut greeting = vec![VER];
        if self.auth.is_some() {
            greeting.push(2);
            greeting.push(METHOD_NO_AUTH);
            greeting.push(METHOD_USER_PASS);
        } else {
            greeting.push(1);
            greeting.push(METHOD_NO_AUTH);
        }
        self.inner.send(&greeting).await?;

        let reply = self.read_exact(2).await?;
        if reply[0] != VER {
            return Err(TransportError::ProxyProtocol("bad version in method reply"));
        }
        match reply[1] {
            METHOD_NO_AUTH => Ok(()),
            METHOD_USER_PASS => self.negotiate_user_pass().await,
            METHOD_NO_ACCEPTABLE => Err(TransportError::ProxyAuthFailed),
            _ => Err(TransportError::ProxyProtocol("unsupported auth method")),
        }
    }

    async fn negotiate_user_pass(&mut self) -> Result<(), TransportError> {
        let Some(auth) = self.auth.clone() else {
            return Err(TransportError::ProxyAuthFailed);
        };
        let mut req = vec![0x01u8, auth.username.len() as u8];
        req.extend_from_slice(auth.username.as_bytes());
        req.push(auth.password.len() as u8);
        req.extend_from_slice(auth.password.as_bytes());
        self.inner.send(&req).await?;

        let reply = self.read_exact(2).await?;
        if reply[1] != 0x00 {
            return Err(TransportError::ProxyAuthFailed);
        }
        Ok(())
    }

    fn encode_target_address(&self) -> Vec<u8> {
        if let Ok(v4) = Ipv4Addr::from_str(&self.target_host) {
            let mut out = vec![ATYP_V4];
            out.extend_from_slice(&v4.octets());
            out
        } else if let Ok(v6) = Ipv6Addr::from_str(&self.target_host) {
            let mut out = vec![ATYP_V6];
            out.extend_from_slice(&v6.octets());
            out
        } else {
            let mut out = vec![ATYP_DOMAIN, self.target_host.len() as u8];
            out.extend_from_slice(self.target_host.as_bytes());
            out
        }
    }

    async fn send_connect_request(&mut self) -> Result<(), TransportError> {
        let mut req = vec![VER, CMD_CONNECT, 0x00];
        req.extend_from_slice(&self.encode_target_address());
        req.extend_from_slice(&self.target_port.to_be_bytes());
        self.inner.send(&req).await?;

        let head = self.read_exact(4).await?;
        if head[0] != VER {
            return Err(TransportError::ProxyProtocol("bad version in connect reply"));
        }
        let rep = head[1];
        let atyp = head[3];

        let addr_len = match atyp {
            ATYP_V4 => 4,
            ATYP_V6 => 16,
            ATYP_DOMAIN => {
                let len_byte = self.read_exact(1).await?;
                len_byte[0] as usize
            }
            _ => return Err(TransportError::ProxyProtocol("unsupported reply ATYP")),
        };
        let _bound_addr = self.read_exact(addr_len).await?;
        let _bound_port = self.read_exact(2).await?;

        if rep != 0x00 {
            return Err(map_rep_error(rep));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for Socks5Transport {
    async fn connect(&mut self, timeout: Duration) -> Result<(), TransportError> {
        tokio::time::timeout(timeout, async {
            self.inner.connect(timeout).await?;
            self.negotiate_method().await?;
            self.send_connect_request().await
        })
        .await
        .map_err(|_| TransportError::ConnectTimeout)??;

        debug!(host = %self.target_host, port = self.target_port, "socks5 tunnel established");
        self.peer = Some(PeerInfo {
            address: self.target_host.clone(),
            port: self.target_port,
        });
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner.send(bytes).await
    }

    async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        if !self.read_buf.is_empty() {
            return Ok(std::mem::take(&mut self.read_buf));
        }
        self.inner.recv().await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    fn peer_info(&self) -> Option<PeerInfo> {
        self.peer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rep_codes_map_to_distinct_errors() {
        for rep in 0x01u8..=0x08 {
            match map_rep_error(rep) {
                TransportError::ProxyNegotiationFailed(code) => assert_eq!(code, rep),
                other => panic!("unexpected error variant {other:?}"),
            }
        }
    }

    #[test]
    fn address_encoding_prefers_literal_ipv4_then_ipv6_then_domain() {
        let t = Socks5Transport::new(Box::new(NoopTransport), "127.0.0.1", 80, None);
        assert_eq!(t.encode_target_address()[0], ATYP_V4);

        let t = Socks5Transport::new(Box::new(NoopTransport), "::1", 80, None);
        assert_eq!(t.encode_target_address()[0], ATYP_V6);

        let t = Socks5Transport::new(Box::new(NoopTransport), "example.com", 80, None);
        let encoded = t.encode_target_address();
        assert_eq!(encoded[0], ATYP_DOMAIN);
        assert_eq!(encoded[1] as usize, "example.com".len());
    }

    struct NoopTransport;

    #[async_trait]
    impl Transport for NoopTransport {
        async fn connect(&mut self, _timeout: Duration) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
        async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
            Err(TransportError::Closed)
        }
        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn peer_info(&self) -> Option<PeerInfo> {
            None
        }
    }
}
