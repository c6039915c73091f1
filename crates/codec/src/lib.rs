//! Bencode frame codec and M2M packet registry.
//!
//! A [`frame::Frame`] is the recursive, self-describing value bencode
//! carries: byte-strings, signed integers, lists, and sorted-key mappings.
//! A [`packet::Packet`] is a typed view of a `Frame::List` whose first
//! element is an integer tag — the shape every packet exchanged with the
//! M2M server takes on the wire.

pub mod error;
pub mod frame;
pub mod packet;

pub use error::Error;
pub use frame::Frame;
pub use packet::{Packet, PacketType};
