//! Packet dispatch: the handler contract and the registration table
//! mapping (direction, connection state, packet id) to a handler.

use crate::{connection::ConnectionContext, protocol::ConnectionState, protocol::Decoder};
use ahash::AHashMap;
use std::sync::Arc;

/// Direction a packet is flowing in. Each direction has independent
/// framing and cipher state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to origin server.
    C2S,
    /// Origin server to client.
    S2C,
}

/// Outcome of a handler invocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandledFlag {
    /// Forward the packet byte-identical.
    Passed,
    /// Forward the handler's rewritten payload under the original id.
    Transformed,
    /// Suppress the packet entirely.
    Blocked,
}

/// A pluggable per-packet interceptor.
///
/// `input` is positioned at the start of the packet payload (after the
/// id). On [`HandledFlag::Transformed`] the bytes written to
/// `transformed` replace the payload; the id is preserved and the length
/// prefix recomputed. Handlers may mutate the connection context and
/// queue injected packets, but must not retain either buffer. A returned
/// error aborts the connection.
pub trait PacketHandler: Send + Sync {
    fn id(&self) -> i32;

    fn handle(
        &self,
        context: &mut ConnectionContext,
        input: &mut Decoder,
        transformed: &mut Vec<u8>,
    ) -> anyhow::Result<HandledFlag>;
}

type HandlerMap = AHashMap<i32, Arc<dyn PacketHandler>>;

/// Registration table for packet handlers.
///
/// The handshake packet is special-cased: before the handshake completes
/// there is no meaningful connection state, so it is dispatched purely by
/// id 0 on the client-to-server side. A lookup miss is not an error;
/// unknown packets are forwarded verbatim.
pub struct PacketHandlers {
    handshake_handler: Option<Arc<dyn PacketHandler>>,
    tables: AHashMap<(Direction, ConnectionState), HandlerMap>,
}

impl PacketHandlers {
    pub fn new() -> Self {
        Self {
            handshake_handler: None,
            tables: AHashMap::new(),
        }
    }

    /// Registers a handler under its own id for the given direction and
    /// state table.
    pub fn register(
        &mut self,
        direction: Direction,
        state: ConnectionState,
        handler: Arc<dyn PacketHandler>,
    ) {
        assert!(
            state != ConnectionState::Handshake,
            "use set_handshake_handler() for the handshake state"
        );
        self.tables
            .entry((direction, state))
            .or_default()
            .insert(handler.id(), handler);
    }

    pub fn unregister(&mut self, direction: Direction, state: ConnectionState, id: i32) {
        if let Some(table) = self.tables.get_mut(&(direction, state)) {
            table.remove(&id);
        }
    }

    /// Installs the distinguished handshake handler. Its id must be 0.
    pub fn set_handshake_handler(&mut self, handler: Arc<dyn PacketHandler>) {
        assert!(handler.id() == 0, "handshake packet handler id must be 0x0");
        self.handshake_handler = Some(handler);
    }

    pub fn clear_handshake_handler(&mut self) {
        self.handshake_handler = None;
    }

    /// Looks up the handler for a packet, or `None` to forward it
    /// verbatim.
    pub fn get(
        &self,
        direction: Direction,
        state: ConnectionState,
        id: i32,
    ) -> Option<&Arc<dyn PacketHandler>> {
        if state == ConnectionState::Handshake {
            return match (direction, id) {
                (Direction::C2S, 0) => self.handshake_handler.as_ref(),
                _ => None,
            };
        }
        self.tables.get(&(direction, state))?.get(&id)
    }
}

impl Default for PacketHandlers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop(i32);

    impl PacketHandler for Nop {
        fn id(&self) -> i32 {
            self.0
        }

        fn handle(
            &self,
            _context: &mut ConnectionContext,
            _input: &mut Decoder,
            _transformed: &mut Vec<u8>,
        ) -> anyhow::Result<HandledFlag> {
            Ok(HandledFlag::Passed)
        }
    }

    #[test]
    fn lookup_is_keyed_by_direction_state_and_id() {
        let mut handlers = PacketHandlers::new();
        handlers.register(Direction::C2S, ConnectionState::Login, Arc::new(Nop(1)));

        assert!(handlers.get(Direction::C2S, ConnectionState::Login, 1).is_some());
        assert!(handlers.get(Direction::C2S, ConnectionState::Login, 2).is_none());
        assert!(handlers.get(Direction::S2C, ConnectionState::Login, 1).is_none());
        assert!(handlers.get(Direction::C2S, ConnectionState::Play, 1).is_none());

        handlers.unregister(Direction::C2S, ConnectionState::Login, 1);
        assert!(handlers.get(Direction::C2S, ConnectionState::Login, 1).is_none());
    }

    #[test]
    fn handshake_handler_dispatched_by_id_zero_only() {
        let mut handlers = PacketHandlers::new();
        handlers.set_handshake_handler(Arc::new(Nop(0)));

        assert!(handlers.get(Direction::C2S, ConnectionState::Handshake, 0).is_some());
        assert!(handlers.get(Direction::C2S, ConnectionState::Handshake, 1).is_none());
        assert!(handlers.get(Direction::S2C, ConnectionState::Handshake, 0).is_none());

        handlers.clear_handshake_handler();
        assert!(handlers.get(Direction::C2S, ConnectionState::Handshake, 0).is_none());
    }

    #[test]
    #[should_panic]
    fn handshake_handler_with_nonzero_id_rejected() {
        PacketHandlers::new().set_handshake_handler(Arc::new(Nop(7)));
    }
}
