//! Wire Protocol
//!
//! Inbound frames arrive as JSON text or MessagePack binary and are classified by
//! their `type` field. Outbound client messages are JSON text unless the feed is
//! configured for MessagePack.

pub mod codec;
pub mod messages;

pub use codec::{decode, encode, encode_binary, encode_json};
pub use messages::{ClientMessage, Envelope, Frame, WireFormat};
