//! Bridges a [`Transport`] trait object to `AsyncRead + AsyncWrite`, so
//! stream-oriented layers like `tokio-rustls` can be composed on top of any
//! transport (not just a raw `TcpStream`).

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::Transport;

/// Adapts a boxed [`Transport`] into `AsyncRead + AsyncWrite`.
///
/// A single driver task owns the transport and multiplexes between pending
/// writes and the blocking `recv()`, so a write can always go out while a
/// read is parked — a TLS handshake needs exactly that interleaving.
pub struct TransportIo {
    read_rx: mpsc::Receiver<Result<Vec<u8>, TransportError>>,
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    read_buf: BytesMut,
    driver: tokio::task::JoinHandle<()>,
}

impl TransportIo {
    pub fn new(mut inner: Box<dyn Transport>) -> Self {
        let (read_tx, read_rx) = mpsc::channel(64);
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let driver = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = write_rx.recv() => {
                        match outgoing {
                            Some(bytes) => {
                                if inner.send(&bytes).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    incoming = inner.recv() => {
                        let is_err = incoming.is_err();
                        if read_tx.send(incoming).await.is_err() || is_err {
                            break;
                        }
                    }
                }
            }
            let _ = inner.close().await;
        });

        Self {
            read_rx,
            write_tx,
            read_buf: BytesMut::new(),
            driver,
        }
    }
}

impl Drop for TransportIo {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

impl AsyncRead for TransportIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.read_buf.is_empty() {
            let n = std::cmp::min(buf.remaining(), self.read_buf.len());
            buf.put_slice(&self.read_buf[..n]);
            self.read_buf.advance(n);
            return Poll::Ready(Ok(()));
        }

        match self.read_rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                self.read_buf.extend_from_slice(&bytes);
                let n = std::cmp::min(buf.remaining(), self.read_buf.len());
                buf.put_slice(&self.read_buf[..n]);
                self.read_buf.advance(n);
                Poll::Ready(Ok(()))
            }
            // EOF and transport errors both surface as a zero-byte read.
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for TransportIo {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.write_tx.send(buf.to_vec()) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::other("transport driver task gone"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
