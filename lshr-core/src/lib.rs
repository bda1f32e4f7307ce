//! lshr protocol reference implementation.
//! Host-driven: no sockets; the host feeds datagrams and ticks, and sends
//! the datagrams the sessions hand back.

pub mod block;
pub mod identity;
pub mod integrity;
pub mod protocol;
pub mod receive;
pub mod registry;
pub mod sender;
pub mod wire;

pub use block::{BlockLayout, BlockSource};
pub use identity::{ContentHash, TransferId};
pub use protocol::{Accept, Announce, DataBlock, MissingReport, Packet, DEFAULT_PORT, PROTOCOL_VERSION};
pub use receive::{BlockOutcome, ReceiveConfig, ReceiveError, ReceiveFailure, ReceiveSession, ReceiveState};
pub use registry::{Decision, Offer, Output, ReceiverRegistry, RegistryConfig, RegistryError, RegistryEvent, Reply};
pub use sender::{SenderConfig, SenderSession, SenderState, SessionError, Transmit, TransmitKind};
pub use wire::{decode_packet, encode_packet, DecodeError, EncodeError};
