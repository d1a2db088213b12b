//! Wire-level primitives for the vanilla protocol: varint framing,
//! per-packet compression, and the connection-state enum.

pub mod compression;
mod decoder;
mod encoder;

pub use decoder::{check_chunk_size, DecodeError, Decoder};
pub use encoder::{var_int_size, Encoder};

/// Limit to avoid out-of-memory DOS.
pub(crate) const BUFFER_LIMIT: usize = 1024 * 1024; // 1 MiB

pub(crate) const VARINT_MAX_SIZE: usize = 5;

/// Protocol phase of a connection, gating which packet ids are
/// meaningful. The ids are the values carried by the handshake
/// packet's next-state field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionState {
    Handshake,
    Play,
    Status,
    Login,
}

impl ConnectionState {
    pub fn id(self) -> i32 {
        match self {
            ConnectionState::Handshake => -1,
            ConnectionState::Play => 0,
            ConnectionState::Status => 1,
            ConnectionState::Login => 2,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            -1 => Some(ConnectionState::Handshake),
            0 => Some(ConnectionState::Play),
            1 => Some(ConnectionState::Status),
            2 => Some(ConnectionState::Login),
            _ => None,
        }
    }
}
