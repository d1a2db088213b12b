//! Shared mutable state of one proxied client↔origin connection.

use crate::{
    auth::{PlayerProfile, SessionService},
    crypt::EncryptionContext,
    packet::Direction,
    protocol::ConnectionState,
};
use ahash::AHashMap;
use std::{collections::VecDeque, sync::Arc};

/// Per-connection state shared by the two directional relay engines.
///
/// Both engines read and mutate this through a single mutex owned by the
/// connection driver; nothing here is accessed concurrently.
pub struct ConnectionContext {
    remote_host: String,
    remote_port: u16,
    client_address: Option<String>,
    state: ConnectionState,
    encryption: EncryptionContext,
    compression_threshold: i32,
    protocol_version: Option<i32>,
    player_username: Option<String>,
    accounts: Arc<AHashMap<String, PlayerProfile>>,
    session: Arc<dyn SessionService>,
    attached_c2s_packets: VecDeque<Vec<u8>>,
    attached_s2c_packets: VecDeque<Vec<u8>>,
}

impl ConnectionContext {
    pub fn new(
        remote_host: String,
        remote_port: u16,
        accounts: Arc<AHashMap<String, PlayerProfile>>,
        session: Arc<dyn SessionService>,
    ) -> Self {
        Self {
            remote_host,
            remote_port,
            client_address: None,
            state: ConnectionState::Handshake,
            encryption: EncryptionContext::Disabled,
            compression_threshold: -1,
            protocol_version: None,
            player_username: None,
            accounts,
            session,
            attached_c2s_packets: VecDeque::new(),
            attached_s2c_packets: VecDeque::new(),
        }
    }

    /// Host of the origin server this connection is relayed to.
    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    /// Port of the origin server this connection is relayed to.
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn client_address(&self) -> Option<&str> {
        self.client_address.as_deref()
    }

    pub fn set_client_address(&mut self, address: String) {
        assert!(
            self.client_address.is_none(),
            "called set_client_address() multiple times"
        );
        self.client_address = Some(address);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
    }

    pub fn encryption(&self) -> &EncryptionContext {
        &self.encryption
    }

    pub fn encryption_mut(&mut self) -> &mut EncryptionContext {
        &mut self.encryption
    }

    /// Replaces the encryption context. Transitions only move forward:
    /// disabled → handshaking → enabled.
    pub fn set_encryption(&mut self, context: EncryptionContext) {
        assert!(
            context.phase() > self.encryption.phase(),
            "encryption context may not transition backward"
        );
        self.encryption = context;
    }

    /// Compression threshold in bytes; negative means disabled.
    pub fn compression_threshold(&self) -> i32 {
        self.compression_threshold
    }

    /// Sets the compression threshold. This happens at most once per
    /// connection, moving from disabled to a non-negative value.
    pub fn set_compression_threshold(&mut self, threshold: i32) {
        assert!(
            self.compression_threshold < 0,
            "called set_compression_threshold() multiple times"
        );
        assert!(threshold >= 0, "cannot disable compression once enabled");
        self.compression_threshold = threshold;
    }

    pub fn protocol_version(&self) -> Option<i32> {
        self.protocol_version
    }

    pub fn set_protocol_version(&mut self, version: i32) {
        assert!(
            self.protocol_version.is_none(),
            "called set_protocol_version() multiple times"
        );
        self.protocol_version = Some(version);
    }

    pub fn player_username(&self) -> Option<&str> {
        self.player_username.as_deref()
    }

    pub fn set_player_username(&mut self, username: String) {
        assert!(
            self.player_username.is_none(),
            "called set_player_username() multiple times"
        );
        self.player_username = Some(username);
    }

    pub fn accounts(&self) -> &AHashMap<String, PlayerProfile> {
        &self.accounts
    }

    pub fn session(&self) -> &dyn SessionService {
        &*self.session
    }

    /// Queues a fully framed packet for injection toward the client.
    pub fn send_to_client(&mut self, packet: Vec<u8>) {
        self.attached_s2c_packets.push_back(packet);
    }

    /// Queues a fully framed packet for injection toward the origin
    /// server.
    pub fn send_to_server(&mut self, packet: Vec<u8>) {
        self.attached_c2s_packets.push_back(packet);
    }

    /// Takes the next queued injected packet for `direction`, FIFO.
    pub(crate) fn pop_attached(&mut self, direction: Direction) -> Option<Vec<u8>> {
        match direction {
            Direction::C2S => self.attached_c2s_packets.pop_front(),
            Direction::S2C => self.attached_s2c_packets.pop_front(),
        }
    }
}
