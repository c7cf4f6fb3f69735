//! gRPC-on-HTTP/2 length-prefixed message framing.
//!
//! Stripped to the bare frame boundary: this crate does not implement a
//! message codec (that is external), only the byte-accounting state
//! machine that finds complete `[flag][len][payload]` frames inside a
//! stream of inbound `DATA` chunks.

use crate::status::{Code, Status};
use bytes::{Buf, Bytes, BytesMut};

/// `1` (compressed-flag byte) + `4` (big-endian length).
pub const FRAME_HEADER_SIZE: usize = 5;

#[derive(Debug)]
enum DecodeState {
    ReadHeader,
    ReadBody { compressed: bool, len: usize },
}

/// One fully received gRPC message frame.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub compressed: bool,
    pub payload: Bytes,
}

/// Buffers inbound `DATA` payload across frame boundaries and yields
/// complete messages only; a message may be split across many `DATA`
/// frames, or several messages may share one `DATA` frame.
pub struct FrameDecoder {
    buf: BytesMut,
    state: DecodeState,
    max_payload_size: usize,
}

impl FrameDecoder {
    pub fn new(max_payload_size: usize) -> Self {
        FrameDecoder {
            buf: BytesMut::new(),
            state: DecodeState::ReadHeader,
            max_payload_size,
        }
    }

    /// Feed in another chunk of raw `DATA` payload.
    pub fn push(&mut self, chunk: Bytes) {
        self.buf.extend_from_slice(&chunk);
    }

    /// Pull the next complete frame out of the buffer, if one is ready.
    /// Call repeatedly until it returns `Ok(None)` — a single `push` may
    /// unblock more than one frame.
    pub fn next_frame(&mut self) -> Result<Option<DecodedFrame>, Status> {
        if let DecodeState::ReadHeader = self.state {
            if self.buf.remaining() < FRAME_HEADER_SIZE {
                return Ok(None);
            }

            let compressed = match self.buf.get_u8() {
                0 => false,
                1 => true,
                flag => {
                    return Err(Status::new(
                        Code::Internal,
                        format!("protocol error: received message with invalid compression flag: {flag} (valid flags are 0 and 1)"),
                    ));
                }
            };
            let len = self.buf.get_u32() as usize;
            if len > self.max_payload_size {
                // Reject up front, before reserving or buffering the body.
                return Err(Status::new(Code::Internal, "Failed to decode message"));
            }
            self.buf.reserve(len);
            self.state = DecodeState::ReadBody { compressed, len };
        }

        if let DecodeState::ReadBody { compressed, len } = self.state {
            if self.buf.len() < len {
                return Ok(None);
            }
            let payload = self.buf.split_to(len).freeze();
            self.state = DecodeState::ReadHeader;
            return Ok(Some(DecodedFrame { compressed, payload }));
        }

        Ok(None)
    }
}

/// Frame one outbound message. `compressed` must match whatever the caller
/// actually did to `payload` — this crate only lays out the length prefix.
pub fn encode_frame(compressed: bool, payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(&[compressed as u8]);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_single_frame_delivered_whole() {
        let mut dec = FrameDecoder::new(16 * 1024 * 1024);
        dec.push(encode_frame(false, b"hello"));
        let frame = dec.next_frame().unwrap().unwrap();
        assert!(!frame.compressed);
        assert_eq!(&frame.payload[..], b"hello");
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn reassembles_a_frame_split_across_pushes() {
        let mut dec = FrameDecoder::new(16 * 1024 * 1024);
        let whole = encode_frame(true, b"a longer payload here");
        let (first, second) = whole.split_at(3);
        dec.push(Bytes::copy_from_slice(first));
        assert!(dec.next_frame().unwrap().is_none());
        dec.push(Bytes::copy_from_slice(second));
        let frame = dec.next_frame().unwrap().unwrap();
        assert!(frame.compressed);
        assert_eq!(&frame.payload[..], b"a longer payload here");
    }

    #[test]
    fn yields_multiple_frames_from_one_push() {
        let mut dec = FrameDecoder::new(16 * 1024 * 1024);
        let mut both = BytesMut::new();
        both.extend_from_slice(&encode_frame(false, b"one"));
        both.extend_from_slice(&encode_frame(false, b"two"));
        dec.push(both.freeze());
        assert_eq!(&dec.next_frame().unwrap().unwrap().payload[..], b"one");
        assert_eq!(&dec.next_frame().unwrap().unwrap().payload[..], b"two");
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_invalid_compression_flag() {
        let mut dec = FrameDecoder::new(16 * 1024 * 1024);
        let mut raw = BytesMut::new();
        raw.extend_from_slice(&[2, 0, 0, 0, 0]);
        dec.push(raw.freeze());
        let err = dec.next_frame().unwrap_err();
        assert_eq!(err.code(), Code::Internal);
    }

    #[test]
    fn oversized_length_is_rejected_without_buffering_payload() {
        let mut dec = FrameDecoder::new(4);
        let mut raw = BytesMut::new();
        raw.extend_from_slice(&[0, 0, 0, 0, 10]); // len=10 > max 4
        dec.push(raw.freeze());
        let err = dec.next_frame().unwrap_err();
        assert_eq!(err.message(), "Failed to decode message");
    }
}
