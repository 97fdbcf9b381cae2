//! The wire frame format and the `version` handshake rewriter.
//!
//! A frame is a fixed 24-byte header (4-byte magic, 12-byte NUL-padded
//! ASCII command, 4-byte little-endian payload length, 4-byte checksum)
//! followed immediately by the payload. The rewriter is a pure function of
//! `(buffer, port map)`: it does not touch connection state or delays, so
//! it can be unit-tested in isolation from the relay tasks that call it.

use std::error;
use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::communication::{NodeIndex, PortMap};
use crate::crypto::hash::hash256;

/// Size of the frame header, in bytes.
pub const HEADER_LENGTH: usize = 4 + 12 + 4 + 4;

/// Offset of the advertised-port field within a `version` payload.
pub const VERSION_PORT_OFFSET: usize = 4 + 8 + 8 + 26 + 8 + 16;

const COMMAND_OFFSET: usize = 4;
const COMMAND_LENGTH: usize = 12;
const LENGTH_OFFSET: usize = 16;
const CHECKSUM_OFFSET: usize = 20;

const VERSION_COMMAND: &[u8] = b"version";

/// Rewriting a `version` frame failed: either its advertised port is not
/// one the hub knows about, or the payload is too short to carry the port
/// field at the offset the wire format specifies.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameError {
    UnknownAdvertisedPort(u16),
    MalformedVersionPayload { len: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::UnknownAdvertisedPort(port) => {
                write!(f, "advertised port {} has no known node", port)
            }
            FrameError::MalformedVersionPayload { len } => write!(
                f,
                "version payload of {} bytes is too short to carry the port field at offset {}",
                len, VERSION_PORT_OFFSET
            ),
        }
    }
}

impl error::Error for FrameError {}

/// Reads the `command` field of a frame header, trimmed at the first NUL
/// byte. `header` must be at least `HEADER_LENGTH` bytes long.
fn command_of(header: &[u8]) -> &[u8] {
    let field = &header[COMMAND_OFFSET..COMMAND_OFFSET + COMMAND_LENGTH];
    match field.iter().position(|&b| b == 0) {
        Some(nul) => &field[..nul],
        None => field,
    }
}

fn payload_len_of(header: &[u8]) -> usize {
    LittleEndian::read_u32(&header[LENGTH_OFFSET..LENGTH_OFFSET + 4]) as usize
}

/// Rewrites the advertised port of a `version` payload in place and
/// recomputes its header checksum.
///
/// `proxy_port_of` maps a node index (looked up via `advertised_port` in
/// `ports`) to the proxy port that should be advertised in its place.
fn rewrite_version_frame(
    header: &[u8],
    payload: &[u8],
    ports: &PortMap,
    proxy_port_of: impl Fn(NodeIndex) -> u16,
) -> Result<Vec<u8>, FrameError> {
    if payload.len() < VERSION_PORT_OFFSET + 2 {
        return Err(FrameError::MalformedVersionPayload { len: payload.len() });
    }
    let advertised_port = BigEndian::read_u16(&payload[VERSION_PORT_OFFSET..VERSION_PORT_OFFSET + 2]);

    let rewritten_port = if advertised_port == 0 {
        0
    } else {
        let node = ports
            .get(advertised_port)
            .ok_or(FrameError::UnknownAdvertisedPort(advertised_port))?;
        proxy_port_of(node)
    };

    let mut rewritten_payload = payload.to_vec();
    BigEndian::write_u16(
        &mut rewritten_payload[VERSION_PORT_OFFSET..VERSION_PORT_OFFSET + 2],
        rewritten_port,
    );

    let checksum = hash256(&rewritten_payload).truncated();

    let mut out = Vec::with_capacity(HEADER_LENGTH + rewritten_payload.len());
    out.extend_from_slice(&header[..CHECKSUM_OFFSET]);
    out.extend_from_slice(&checksum);
    out.extend_from_slice(&rewritten_payload);
    Ok(out)
}

/// Scans as many complete frames as `buf` currently holds, rewriting
/// `version` frames in place and passing every other frame through
/// unchanged. Returns the frames to write out, in order, and truncates
/// `buf` down to the residual (incomplete) tail.
///
/// Pure over `(buf, ports)`: calling this twice with the same inputs
/// produces the same output frames and the same residual tail.
pub fn scan_and_rewrite(
    buf: &mut Vec<u8>,
    ports: &PortMap,
    proxy_port_of: impl Fn(NodeIndex) -> u16,
) -> Result<Vec<Vec<u8>>, FrameError> {
    let mut frames = Vec::new();
    let mut consumed = 0;

    loop {
        let remaining = &buf[consumed..];
        if remaining.len() <= HEADER_LENGTH {
            break;
        }

        let payload_len = payload_len_of(remaining);
        let frame_len = HEADER_LENGTH + payload_len;
        if remaining.len() < frame_len {
            break;
        }

        let header = &remaining[..HEADER_LENGTH];
        let payload = &remaining[HEADER_LENGTH..frame_len];

        if command_of(header) == VERSION_COMMAND {
            let rewritten = rewrite_version_frame(header, payload, ports, &proxy_port_of)?;
            frames.push(rewritten);
        } else {
            frames.push(remaining[..frame_len].to_vec());
        }

        consumed += frame_len;
    }

    buf.drain(..consumed);
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(command: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut header = vec![0u8; HEADER_LENGTH];
        header[..4].copy_from_slice(b"F9BE"); // opaque magic, passed through
        header[COMMAND_OFFSET..COMMAND_OFFSET + command.len()].copy_from_slice(command);
        LittleEndian::write_u32(&mut header[LENGTH_OFFSET..LENGTH_OFFSET + 4], payload.len() as u32);
        let checksum = hash256(payload).truncated();
        header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum);

        let mut out = header;
        out.extend_from_slice(payload);
        out
    }

    fn version_payload(port: u16) -> Vec<u8> {
        let mut payload = vec![0u8; VERSION_PORT_OFFSET + 2 + 8];
        BigEndian::write_u16(&mut payload[VERSION_PORT_OFFSET..VERSION_PORT_OFFSET + 2], port);
        payload
    }

    #[test]
    fn non_version_frame_passes_through_unchanged() {
        let f = frame(b"ping", b"some bytes");
        let mut buf = f.clone();
        let ports = PortMap::new();

        let frames = scan_and_rewrite(&mut buf, &ports, |_| 0).unwrap();

        assert_eq!(frames, vec![f]);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_frame_is_left_untouched() {
        let f = frame(b"version", &version_payload(1));
        let mut buf = f[..f.len() - 1].to_vec();
        let original = buf.clone();
        let ports = PortMap::new();

        let frames = scan_and_rewrite(&mut buf, &ports, |_| 0).unwrap();

        assert!(frames.is_empty());
        assert_eq!(buf, original);
    }

    #[test]
    fn version_frame_rewrites_port_and_checksum() {
        let node_port = 19000u16;
        let proxy_port = 29000u16;
        let mut ports = PortMap::new();
        ports.insert(node_port, NodeIndex::from(0u32));

        let f = frame(b"version", &version_payload(node_port));
        let mut buf = f.clone();

        let frames = scan_and_rewrite(&mut buf, &ports, |n| {
            assert_eq!(n, NodeIndex::from(0u32));
            proxy_port
        })
        .unwrap();

        assert!(buf.is_empty());
        assert_eq!(frames.len(), 1);

        let rewritten = &frames[0];
        let rewritten_payload = &rewritten[HEADER_LENGTH..];
        let port = BigEndian::read_u16(&rewritten_payload[VERSION_PORT_OFFSET..VERSION_PORT_OFFSET + 2]);
        assert_eq!(port, proxy_port);

        let expected_checksum = hash256(rewritten_payload).truncated();
        assert_eq!(&rewritten[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4], &expected_checksum);

        // only the port bytes changed
        let mut expected_payload = version_payload(node_port);
        BigEndian::write_u16(&mut expected_payload[VERSION_PORT_OFFSET..VERSION_PORT_OFFSET + 2], proxy_port);
        assert_eq!(rewritten_payload, &expected_payload[..]);
    }

    #[test]
    fn zero_port_passes_through_as_zero() {
        let mut ports = PortMap::new();
        ports.insert(19000, NodeIndex::from(0u32));

        let f = frame(b"version", &version_payload(0));
        let mut buf = f.clone();

        let frames = scan_and_rewrite(&mut buf, &ports, |_| 29000).unwrap();

        let rewritten_payload = &frames[0][HEADER_LENGTH..];
        let port = BigEndian::read_u16(&rewritten_payload[VERSION_PORT_OFFSET..VERSION_PORT_OFFSET + 2]);
        assert_eq!(port, 0);
    }

    #[test]
    fn unknown_advertised_port_is_an_error() {
        let ports = PortMap::new();
        let f = frame(b"version", &version_payload(12345));
        let mut buf = f;

        let err = scan_and_rewrite(&mut buf, &ports, |_| 0).unwrap_err();
        assert_eq!(err, FrameError::UnknownAdvertisedPort(12345));
    }

    #[test]
    fn version_payload_too_short_for_port_field_is_malformed_not_a_panic() {
        // a `version` payload shorter than VERSION_PORT_OFFSET + 2 cannot
        // carry the port field the wire format promises; this must be a
        // reported error, never an out-of-bounds panic.
        let short_payload = vec![0u8; VERSION_PORT_OFFSET];
        let f = frame(b"version", &short_payload);
        let mut buf = f;
        let ports = PortMap::new();

        let err = scan_and_rewrite(&mut buf, &ports, |_| 0).unwrap_err();
        assert_eq!(
            err,
            FrameError::MalformedVersionPayload {
                len: VERSION_PORT_OFFSET
            }
        );
    }

    #[test]
    fn two_coalesced_frames_are_each_scanned_in_order() {
        let a = frame(b"ping", b"first");
        let b = frame(b"ping", b"second-frame");
        let mut buf = a.clone();
        buf.extend_from_slice(&b);
        let ports = PortMap::new();

        let frames = scan_and_rewrite(&mut buf, &ports, |_| 0).unwrap();

        assert_eq!(frames, vec![a, b]);
        assert!(buf.is_empty());
    }

    #[test]
    fn scanning_is_deterministic_given_the_same_input() {
        let node_port = 19000u16;
        let mut ports = PortMap::new();
        ports.insert(node_port, NodeIndex::from(0u32));

        let f = frame(b"version", &version_payload(node_port));

        let mut buf1 = f.clone();
        let out1 = scan_and_rewrite(&mut buf1, &ports, |_| 29000).unwrap();

        let mut buf2 = f;
        let out2 = scan_and_rewrite(&mut buf2, &ports, |_| 29000).unwrap();

        assert_eq!(out1, out2);
        assert_eq!(buf1, buf2);
    }
}
