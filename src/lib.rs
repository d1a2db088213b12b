//! Transparent man-in-the-middle proxy for Minecraft (Java Edition)
//! connections.
//!
//! The proxy sits between a client and an origin server, relaying the
//! varint-framed TCP protocol in both directions while reassembling every
//! packet and dispatching it to registered [`packet::PacketHandler`]s. A
//! handler can observe a packet, rewrite it, block it, or inject extra
//! packets in either direction; anything without a handler is forwarded
//! byte-identically.
//!
//! Compression and encryption are handled so the interception stays
//! invisible: the origin's Set Compression packet is swallowed (the
//! client leg stays plainly framed while the origin leg compresses), and
//! the login encryption handshake is terminated on each leg with
//! independent AES/CFB-8 keys, the proxy re-authenticating toward the
//! origin with a configured account.

pub mod auth;
pub mod connection;
pub mod crypt;
pub mod handlers;
pub mod packet;
pub mod protocol;
pub mod proxy;
pub mod relay;
