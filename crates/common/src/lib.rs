//! Wire framing and errors shared by the receiver and its clients.

pub mod error;
pub mod protocol;

pub use error::FrameError;
pub use protocol::{Frame, FrameHeader, Signature, HEADER_LEN, MAX_FRAME_SIZE};
