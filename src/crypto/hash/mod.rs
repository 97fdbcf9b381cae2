//! `hash256`: the double-SHA256 digest used to checksum wire frames.
//!
//! The node implementation this hub interposes on is out of scope, but its
//! checksum scheme is not: the frame header carries the first four bytes of
//! `SHA256(SHA256(payload))`, and rewriting a `version` payload requires
//! recomputing that checksum.

use ring::digest::{self, SHA256};

pub const DIGEST_LENGTH: usize = 32;

/// A 32-byte double-SHA256 digest.
#[derive(Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
pub struct Digest([u8; DIGEST_LENGTH]);

impl Digest {
    pub const LENGTH: usize = DIGEST_LENGTH;

    /// The first four bytes of the digest, as used in the frame checksum
    /// field.
    pub fn truncated(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.0[..4]);
        out
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Computes `SHA256(SHA256(data))`.
pub fn hash256(data: &[u8]) -> Digest {
    let first = digest::digest(&SHA256, data);
    let second = digest::digest(&SHA256, first.as_ref());

    let mut out = [0u8; DIGEST_LENGTH];
    out.copy_from_slice(second.as_ref());
    Digest(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash256_is_deterministic() {
        let a = hash256(b"some payload");
        let b = hash256(b"some payload");
        assert_eq!(a.as_ref(), b.as_ref());
    }

    #[test]
    fn hash256_differs_on_different_input() {
        let a = hash256(b"some payload");
        let b = hash256(b"some other payload");
        assert_ne!(a.as_ref(), b.as_ref());
    }

    #[test]
    fn truncated_is_first_four_bytes() {
        let d = hash256(b"abc");
        assert_eq!(&d.truncated()[..], &d.as_ref()[..4]);
    }
}
