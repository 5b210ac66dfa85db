//! IPC wire protocol: length-prefixed JSON frames over a local stream socket

pub mod frame;
pub mod message;

pub use frame::{decode_frame, encode_frame, read_frame, write_frame, MAX_FRAME_LEN};
pub use message::WireFrame;
