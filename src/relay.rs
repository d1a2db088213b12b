//! The bidirectional relay engine.
//!
//! One engine instance exists per direction of a proxied connection. The
//! network layer feeds it raw inbound chunks with no alignment guarantees;
//! the engine decrypts, reassembles complete packets across partial reads,
//! dispatches each packet to a registered handler, and re-emits the bytes
//! to forward to the peer, recompressing and re-encrypting as required.
//!
//! Compression is asymmetric between the two legs by design: the proxy
//! blocks the origin's Set Compression packet so the client leg keeps
//! plain framing, while the origin leg compresses. Server-to-client input
//! is therefore decompressed before dispatch and client-to-server output
//! recompressed after it.

use crate::{
    connection::ConnectionContext,
    crypt::EncryptionContext,
    packet::{Direction, HandledFlag, PacketHandlers},
    protocol::{
        check_chunk_size, compression, DecodeError, Decoder, Encoder, BUFFER_LIMIT,
    },
};
use anyhow::bail;
use bytes::{Buf, BytesMut};
use std::sync::Arc;

/// Reassembly and dispatch state for one direction of one connection.
pub struct RelayEngine {
    direction: Direction,
    handlers: Arc<PacketHandlers>,
    /// Buffered decrypted inbound bytes not yet consumed as packets.
    buffer: BytesMut,
    /// Bytes still missing before the current packet is fully buffered;
    /// zero when no packet is pending.
    remaining_unread: usize,
}

impl RelayEngine {
    pub fn new(direction: Direction, handlers: Arc<PacketHandlers>) -> Self {
        Self {
            direction,
            handlers,
            buffer: BytesMut::new(),
            remaining_unread: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Processes one raw inbound chunk and returns the bytes to write to
    /// the peer socket. An empty return means nothing is ready yet.
    ///
    /// The chunk is decrypted in place when encryption is enabled. Any
    /// error invalidates the connection.
    pub fn receive(
        &mut self,
        context: &mut ConnectionContext,
        chunk: &mut [u8],
    ) -> anyhow::Result<Vec<u8>> {
        if chunk.is_empty() {
            return Ok(Vec::new());
        }

        // The outbound flush must use the context as it was when the
        // chunk arrived: a handler enabling encryption mid-chunk affects
        // only traffic after its own (still plaintext) response.
        let encryption_was_enabled = context.encryption().is_enabled();
        if let EncryptionContext::Enabled(ciphers) = context.encryption_mut() {
            ciphers.decrypt(self.direction, chunk);
        }

        if self.remaining_unread > 0 {
            self.buffer.extend_from_slice(chunk);
            self.remaining_unread = self.remaining_unread.saturating_sub(chunk.len());
            if self.remaining_unread > 0 {
                return Ok(Vec::new());
            }
        } else {
            self.buffer.extend_from_slice(chunk);
        }

        let mut out = Vec::new();
        let mut drained = true;
        while !self.buffer.is_empty() {
            let mut decoder = Decoder::new(&self.buffer);
            let size = match decoder.read_var_int() {
                Ok(size) => size,
                Err(DecodeError::EndOfStream(_)) => {
                    // Not even the length prefix is complete.
                    self.remaining_unread = 1;
                    drained = false;
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            let size = check_chunk_size(size)?;
            if size > BUFFER_LIMIT {
                bail!("packet length of {size} exceeds maximum allowed");
            }

            let available = decoder.buffer().len();
            if size > available {
                self.remaining_unread = size - available;
                drained = false;
                break;
            }

            let header_size = self.buffer.len() - available;
            let mut frame = self.buffer.split_to(header_size + size);
            frame.advance(header_size);
            self.process_packet(context, &frame, &mut out)?;
        }

        // Injected packets follow all packets of the triggering chunk and
        // are held back while a packet is still incomplete.
        if drained {
            self.flush_attached(context, &mut out)?;
        }

        if encryption_was_enabled {
            if let EncryptionContext::Enabled(ciphers) = context.encryption_mut() {
                ciphers.encrypt(self.direction, &mut out);
            }
        }
        Ok(out)
    }

    /// Dispatches one complete packet (`frame` holds the bytes after the
    /// length prefix), applying the leg-asymmetric compression codec.
    fn process_packet(
        &self,
        context: &mut ConnectionContext,
        frame: &[u8],
        out: &mut Vec<u8>,
    ) -> anyhow::Result<()> {
        if context.compression_threshold() >= 0 {
            match self.direction {
                Direction::S2C => {
                    let plain = compression::decompress(frame)?;
                    self.handle(context, &plain, out)?;
                }
                Direction::C2S => {
                    let mut packet = Vec::new();
                    self.handle(context, frame, &mut packet)?;
                    if !packet.is_empty() {
                        let mut decoder = Decoder::new(&packet);
                        let size = decoder.read_var_int()?;
                        compression::compress(
                            context.compression_threshold(),
                            size,
                            decoder.buffer(),
                            out,
                        )?;
                    }
                }
            }
        } else {
            self.handle(context, frame, out)?;
        }
        Ok(())
    }

    /// Invokes the handler for a packet and re-emits it in plain framing
    /// according to the returned flag.
    fn handle(
        &self,
        context: &mut ConnectionContext,
        frame: &[u8],
        out: &mut Vec<u8>,
    ) -> anyhow::Result<()> {
        let size = i32::try_from(frame.len())?;
        let mut decoder = Decoder::new(frame);
        let (id, id_size) = decoder.read_var_int_with_size()?;

        let Some(handler) = self.handlers.get(self.direction, context.state(), id) else {
            let mut encoder = Encoder::new(out);
            encoder.write_var_int(size);
            encoder.write_slice(frame);
            return Ok(());
        };
        let handler = Arc::clone(handler);

        let mut transformed = Vec::new();
        match handler.handle(context, &mut decoder, &mut transformed)? {
            HandledFlag::Passed => {
                let mut encoder = Encoder::new(out);
                encoder.write_var_int(size);
                encoder.write_slice(frame);
            }
            HandledFlag::Transformed => {
                let mut encoder = Encoder::new(out);
                encoder.write_var_int(i32::try_from(id_size + transformed.len())?);
                encoder.write_var_int(id);
                encoder.write_slice(&transformed);
            }
            HandledFlag::Blocked => {}
        }
        Ok(())
    }

    /// Drains this direction's injection queue, framing each packet per
    /// the connection's current compression settings.
    fn flush_attached(
        &self,
        context: &mut ConnectionContext,
        out: &mut Vec<u8>,
    ) -> anyhow::Result<()> {
        while let Some(packet) = context.pop_attached(self.direction) {
            if self.direction == Direction::C2S && context.compression_threshold() >= 0 {
                let mut decoder = Decoder::new(&packet);
                let size = decoder.read_var_int()?;
                compression::compress(
                    context.compression_threshold(),
                    size,
                    decoder.buffer(),
                    out,
                )?;
            } else {
                out.extend_from_slice(&packet);
            }
        }
        Ok(())
    }
}
