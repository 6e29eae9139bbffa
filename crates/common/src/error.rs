//! Framing errors shared across crates.

use thiserror::Error;

/// A frame violated the wire contract.
///
/// Every variant is fatal to the connection that produced it: the receiver
/// never tries to resynchronise a stream after a framing violation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The declared (or supplied) payload length exceeds [`crate::MAX_FRAME_SIZE`].
    #[error("frame length {length} exceeds maximum of {max} bytes")]
    TooLarge { length: usize, max: usize },

    /// The peer closed the stream part way through a frame header.
    #[error("truncated frame header: received {received} of {expected} bytes")]
    TruncatedHeader { received: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_sizes() {
        let e = FrameError::TooLarge {
            length: 2_000_000,
            max: 1_048_576,
        };
        let msg = e.to_string();
        assert!(msg.contains("2000000"));
        assert!(msg.contains("1048576"));

        let e = FrameError::TruncatedHeader {
            received: 3,
            expected: 8,
        };
        assert!(e.to_string().contains("3 of 8"));
    }
}
