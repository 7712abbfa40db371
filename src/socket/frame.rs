//! Length-prefixed framing on top of WebSocket messages.
//!
//! Every frame carries a 3-byte big-endian length. One WebSocket message may
//! hold several frames, and a frame may be split across messages.

use crate::error::ConnectionError;

/// Largest payload a 3-byte length can describe.
pub const MAX_FRAME_LEN: usize = (1 << 24) - 1;

/// Prefix a payload with its 3-byte length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ConnectionError> {
    let len = payload.len();
    if len > MAX_FRAME_LEN {
        return Err(ConnectionError::Transport(format!("frame of {len} bytes is too large")));
    }
    let mut frame = Vec::with_capacity(len + 3);
    frame.push(((len >> 16) & 0xFF) as u8);
    frame.push(((len >> 8) & 0xFF) as u8);
    frame.push((len & 0xFF) as u8);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Reassembles frames from a byte stream.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Take the next complete frame, if one has fully arrived.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.buf.len() < 3 {
            return None;
        }
        let len = ((self.buf[0] as usize) << 16) | ((self.buf[1] as usize) << 8) | (self.buf[2] as usize);
        if self.buf.len() < len + 3 {
            return None;
        }
        let frame = self.buf[3..3 + len].to_vec();
        self.buf.drain(..3 + len);
        Some(frame)
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix() {
        assert_eq!(encode_frame(b"abc").unwrap(), vec![0, 0, 3, b'a', b'b', b'c']);
        let big = vec![0u8; 70_000];
        assert_eq!(&encode_frame(&big).unwrap()[..3], &[0x01, 0x11, 0x70]);
    }

    #[test]
    fn test_reassembly() {
        let mut stream = encode_frame(b"first").unwrap();
        stream.extend(encode_frame(b"").unwrap());
        stream.extend(encode_frame(b"second").unwrap());

        let mut buffer = FrameBuffer::new();
        let mut frames = Vec::new();
        for chunk in stream.chunks(4) {
            buffer.push(chunk);
            while let Some(frame) = buffer.next_frame() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![b"first".to_vec(), vec![], b"second".to_vec()]);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn test_partial_frame_waits() {
        let mut buffer = FrameBuffer::new();
        buffer.push(&[0, 0, 5, b'a']);
        assert_eq!(buffer.next_frame(), None);
        buffer.push(b"bcde");
        assert_eq!(buffer.next_frame(), Some(b"abcde".to_vec()));
    }
}
