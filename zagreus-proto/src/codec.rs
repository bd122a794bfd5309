//! The escape-framed wire codec.
//!
//! Every socket carries raw device bytes with one reserved sentinel:
//! [`ESCAPE`] (`0xFF`) opens a two-byte command frame `ESC, X`, and a
//! literal `0xFF` in the payload travels as `ESC, ESC`. That is the whole
//! protocol; any byte sequence decodes, so there is no error type here.
//!
//! Fast path:
//! - No `ESC` in the chunk → one data segment, zero scanning state
//!
//! Slow path:
//! - A chunk ending in a lone `ESC` → the sentinel is carried over and
//!   resolved by the first byte of the next chunk

use bytes::{BufMut, Bytes, BytesMut};
use smallvec::SmallVec;

/// The reserved sentinel byte.
pub const ESCAPE: u8 = 0xFF;

/// Command byte: reset the device.
pub const CMD_RESET: u8 = b'r';

/// One decoded span of the wire stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal payload bytes, `ESC ESC` already collapsed.
    Data(Bytes),
    /// An in-band command byte.
    Command(u8),
}

/// Escape a payload for the wire: every `0xFF` becomes `0xFF 0xFF`.
#[must_use]
pub fn encode(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(payload.len() + 2);
    for &b in payload {
        if b == ESCAPE {
            out.put_u8(ESCAPE);
        }
        out.put_u8(b);
    }
    out.freeze()
}

/// Frame a command byte for the wire.
#[must_use]
pub fn command(c: u8) -> Bytes {
    Bytes::copy_from_slice(&[ESCAPE, c])
}

/// Stateful decoder for the escape-framed stream.
///
/// A TCP read can split a command frame between chunks; a trailing lone
/// `ESC` is held here until the next chunk supplies its second byte, so
/// `decode` never mis-reads a frame across segment boundaries.
#[derive(Debug, Default)]
pub struct WireDecoder {
    pending_escape: bool,
}

impl WireDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one chunk into alternating data/command segments.
    ///
    /// Empty data segments are suppressed, so `decode(b"")` is empty and
    /// a chunk holding only a command yields just that command.
    pub fn decode(&mut self, src: &[u8]) -> SmallVec<[Segment; 4]> {
        let mut out: SmallVec<[Segment; 4]> = SmallVec::new();
        let mut data = BytesMut::new();
        let mut i = 0;

        if self.pending_escape && !src.is_empty() {
            self.pending_escape = false;
            let b = src[0];
            i = 1;
            if b == ESCAPE {
                data.put_u8(ESCAPE);
            } else {
                out.push(Segment::Command(b));
            }
        }

        while i < src.len() {
            let b = src[i];
            if b != ESCAPE {
                data.put_u8(b);
                i += 1;
                continue;
            }
            if i + 1 >= src.len() {
                // Lone trailing sentinel; resolved by the next chunk.
                self.pending_escape = true;
                break;
            }
            let c = src[i + 1];
            i += 2;
            if c == ESCAPE {
                data.put_u8(ESCAPE);
            } else {
                if !data.is_empty() {
                    out.push(Segment::Data(data.split().freeze()));
                }
                out.push(Segment::Command(c));
            }
        }

        if !data.is_empty() {
            out.push(Segment::Data(data.freeze()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(src: &[u8]) -> Vec<Segment> {
        WireDecoder::new().decode(src).into_vec()
    }

    #[test]
    fn round_trip_is_identity() {
        let payloads: &[&[u8]] = &[
            b"hello",
            b"\xff",
            b"a\xffb",
            b"\xff\xff",
            b"\xffr",
            b"line\r\n",
        ];
        for payload in payloads {
            let segs = decode_all(&encode(payload));
            assert_eq!(
                segs,
                vec![Segment::Data(Bytes::copy_from_slice(payload))],
                "payload {payload:?}"
            );
        }
    }

    #[test]
    fn empty_payload_decodes_to_nothing() {
        assert!(decode_all(&encode(b"")).is_empty());
    }

    #[test]
    fn command_frames_decode_as_commands() {
        assert_eq!(decode_all(&command(CMD_RESET)), vec![Segment::Command(CMD_RESET)]);
        assert_eq!(decode_all(&command(b'x')), vec![Segment::Command(b'x')]);
    }

    #[test]
    fn mixed_stream_alternates_segments() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&encode(b"ab"));
        buf.extend_from_slice(&command(CMD_RESET));
        buf.extend_from_slice(&encode(b"c\xffd"));
        assert_eq!(
            decode_all(&buf),
            vec![
                Segment::Data(Bytes::from_static(b"ab")),
                Segment::Command(CMD_RESET),
                Segment::Data(Bytes::from_static(b"c\xffd")),
            ]
        );
    }

    #[test]
    fn concatenation_matches_piecewise_decode() {
        // Segments of a ++ b equal segments of a then b, modulo merging
        // of adjacent data segments.
        let a = encode(b"one\xff");
        let b = command(CMD_RESET);
        let mut joined = a.to_vec();
        joined.extend_from_slice(&b);

        let mut dec = WireDecoder::new();
        let mut piecewise: Vec<Segment> = dec.decode(&a).into_vec();
        piecewise.extend(dec.decode(&b));

        assert_eq!(decode_all(&joined), piecewise);
    }

    #[test]
    fn trailing_escape_is_buffered_across_reads() {
        let mut dec = WireDecoder::new();

        // `ESC ESC` split across two reads: a literal 0xff payload byte.
        let first = dec.decode(b"ab\xff");
        assert_eq!(
            first.into_vec(),
            vec![Segment::Data(Bytes::from_static(b"ab"))]
        );
        let second = dec.decode(b"\xffcd");
        assert_eq!(
            second.into_vec(),
            vec![Segment::Data(Bytes::from_static(b"\xffcd"))]
        );

        // `ESC r` split across two reads: a reset command.
        assert!(dec.decode(b"\xff").is_empty());
        assert_eq!(dec.decode(b"r").into_vec(), vec![Segment::Command(CMD_RESET)]);
    }

    #[test]
    fn arbitrary_bytes_survive_round_trip() {
        let all: Vec<u8> = (0..=255).collect();
        assert_eq!(
            decode_all(&encode(&all)),
            vec![Segment::Data(Bytes::from(all))]
        );
    }
}
