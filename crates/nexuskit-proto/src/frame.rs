//! The length-prefixed frame wire format: `[u32 BE length][Header][body]`,
//! where `length` covers header + body.

use bytes::{Buf, Bytes, BytesMut};

use crate::constants::{HEADER_LEN, LEN_PREFIX};
use crate::error::ProtoError;
use crate::header::Header;
use crate::limits::FrameLimits;

/// A single decoded frame, with an owned body detached from the receive
/// buffer so it can be moved across tasks/channels.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub body: Bytes,
}

impl Frame {
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Assemble the full wire bytes for this frame: length prefix + header + body.
    pub fn encode(&self) -> Vec<u8> {
        let frame_len = HEADER_LEN + self.body.len();
        let mut out = Vec::with_capacity(LEN_PREFIX + frame_len);
        out.extend_from_slice(&(frame_len as u32).to_be_bytes());
        let mut hbuf = [0u8; HEADER_LEN];
        self.header.encode_into(&mut hbuf);
        out.extend_from_slice(&hbuf);
        out.extend_from_slice(&self.body);
        out
    }
}

/// Incremental frame decoder over a per-connection receive buffer.
///
/// Mirrors the shape of a typical `tokio`-based length-prefixed framer:
/// callers grow `buf_mut()` from socket reads, then call `drain_frames()` to
/// pull out as many complete frames as are currently buffered.
pub struct FrameReader {
    buf: BytesMut,
    limits: FrameLimits,
}

impl FrameReader {
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            buf: BytesMut::with_capacity(8 * 1024),
            limits,
        }
    }

    /// Mutable access to the internal buffer for socket reads, e.g.
    /// `socket.read_buf(reader.buf_mut()).await?`.
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Decode as many complete frames as are currently buffered, consuming
    /// their bytes. Partial trailing data is left in the buffer for the next
    /// call. Fails the whole read if a length prefix is out of bounds —
    /// framing is desynchronized at that point and the caller should
    /// disconnect.
    pub fn drain_frames(&mut self) -> Result<Vec<Frame>, ProtoError> {
        if self.buf.len() > self.limits.max_buffered {
            return Err(ProtoError::InvalidFrame("receive buffer exceeded bound"));
        }

        let mut frames = Vec::new();
        loop {
            if self.buf.len() < LEN_PREFIX {
                break;
            }
            let frame_len = u32::from_be_bytes(self.buf[0..LEN_PREFIX].try_into().unwrap()) as usize;
            if !self.limits.accepts(frame_len) {
                return Err(ProtoError::InvalidFrame("frame length out of bounds"));
            }
            let total_needed = LEN_PREFIX + frame_len;
            if self.buf.len() < total_needed {
                break;
            }

            let header = Header::decode(&self.buf[LEN_PREFIX..LEN_PREFIX + HEADER_LEN])?;
            let body = Bytes::copy_from_slice(&self.buf[LEN_PREFIX + HEADER_LEN..total_needed]);
            frames.push(Frame::new(header, body));

            self.buf.advance(total_needed);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::HEARTBEAT_FUNCTION_ID;

    #[test]
    fn encode_decode_round_trips() {
        let header = Header::new(1, 5);
        let frame = Frame::new(header, Bytes::from_static(b"payload"));
        let bytes = frame.encode();

        let mut reader = FrameReader::new(FrameLimits::default());
        reader.buf_mut().extend_from_slice(&bytes);
        let decoded = reader.drain_frames().unwrap();

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].header, header);
        assert_eq!(decoded[0].body, Bytes::from_static(b"payload"));
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let header = Header::new(1, 5);
        let frame = Frame::new(header, Bytes::from_static(b"payload"));
        let bytes = frame.encode();

        let mut reader = FrameReader::new(FrameLimits::default());
        reader.buf_mut().extend_from_slice(&bytes[..bytes.len() - 2]);
        assert!(reader.drain_frames().unwrap().is_empty());

        reader.buf_mut().extend_from_slice(&bytes[bytes.len() - 2..]);
        assert_eq!(reader.drain_frames().unwrap().len(), 1);
    }

    #[test]
    fn two_frames_in_one_read_both_decode_in_order() {
        let f1 = Frame::new(Header::new(1, 1), Bytes::from_static(b"a"));
        let f2 = Frame::new(Header::new(2, 2), Bytes::from_static(b"bb"));

        let mut reader = FrameReader::new(FrameLimits::default());
        reader.buf_mut().extend_from_slice(&f1.encode());
        reader.buf_mut().extend_from_slice(&f2.encode());

        let frames = reader.drain_frames().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].header.request_id, 1);
        assert_eq!(frames[1].header.request_id, 2);
    }

    #[test]
    fn heartbeat_frame_has_empty_body() {
        let mut header = Header::new(HEARTBEAT_FUNCTION_ID, 0);
        header.type_flags = crate::constants::FLAG_HEARTBEAT;
        let frame = Frame::new(header, Bytes::new());
        let bytes = frame.encode();
        assert_eq!(bytes.len(), LEN_PREFIX + HEADER_LEN);

        let mut reader = FrameReader::new(FrameLimits::default());
        reader.buf_mut().extend_from_slice(&bytes);
        let decoded = reader.drain_frames().unwrap();
        assert!(decoded[0].header.is_heartbeat());
        assert!(decoded[0].body.is_empty());
    }

    #[test]
    fn rejects_length_below_header_size() {
        let mut reader = FrameReader::new(FrameLimits::default());
        reader.buf_mut().extend_from_slice(&10u32.to_be_bytes());
        reader.buf_mut().extend_from_slice(&[0u8; 10]);
        assert!(reader.drain_frames().is_err());
    }
}
