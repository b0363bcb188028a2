//! sb-protocol: Wire protocol for sandbridge sessions
//!
//! This crate defines the binary protocol spoken between the client and the
//! remote sandbox host over a single persistent connection. Every frame is
//! self-describing: the header carries a correlation id and a frame kind
//! (call, response, event, error) so that many concurrent operations can be
//! multiplexed over one connection.

pub mod codec;
pub mod error;
pub mod frame;
pub mod ids;
pub mod message;

pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use ids::{CorrelationId, ProcessId, SessionId};
pub use message::{ErrorCode, FrameKind, Message, PROTOCOL_VERSION};
