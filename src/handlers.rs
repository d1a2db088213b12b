//! Built-in packet handlers for the protocol-47 login pipeline.
//!
//! These implement the interceptions the proxy needs to stay in the
//! middle of a connection: rewriting the handshake target, capturing the
//! username, terminating the encryption handshake on each leg, and
//! keeping the client leg uncompressed.

use crate::{
    connection::ConnectionContext,
    crypt::{self, EncryptionContext, HandshakingContext},
    packet::{Direction, HandledFlag, PacketHandler, PacketHandlers},
    protocol::{ConnectionState, Decoder, Encoder},
};
use anyhow::{bail, Context};
use std::sync::Arc;

pub const PID_CH_HANDSHAKE: i32 = 0x0;
pub const PID_CL_REQUEST_LOGIN: i32 = 0x0;
pub const PID_CL_ENCRYPTION_RESPONSE: i32 = 0x1;
pub const PID_SL_REQUEST_ENCRYPTION: i32 = 0x1;
pub const PID_SL_LOGIN_SUCCESS: i32 = 0x2;
pub const PID_SL_ENABLE_COMPRESSION: i32 = 0x3;
pub const PID_SP_V47_SET_COMPRESSION_LEVEL: i32 = 0x46;

/// Builds a dispatch table with all default handlers registered.
pub fn default_handlers() -> PacketHandlers {
    let mut handlers = PacketHandlers::new();
    register_defaults(&mut handlers);
    handlers
}

pub fn register_defaults(handlers: &mut PacketHandlers) {
    handlers.set_handshake_handler(Arc::new(Handshake));

    handlers.register(
        Direction::C2S,
        ConnectionState::Login,
        Arc::new(RequestLogin),
    );
    handlers.register(
        Direction::C2S,
        ConnectionState::Login,
        Arc::new(EncryptionResponse),
    );

    handlers.register(
        Direction::S2C,
        ConnectionState::Login,
        Arc::new(RequestEncryption),
    );
    handlers.register(
        Direction::S2C,
        ConnectionState::Login,
        Arc::new(LoginSuccess),
    );
    handlers.register(
        Direction::S2C,
        ConnectionState::Login,
        Arc::new(EnableCompression),
    );

    handlers.register(
        Direction::S2C,
        ConnectionState::Play,
        Arc::new(V47SetCompressionLevel),
    );
}

/// Rewrites the handshake's target address and port to the configured
/// origin server and records the protocol version and requested state.
struct Handshake;

impl PacketHandler for Handshake {
    fn id(&self) -> i32 {
        PID_CH_HANDSHAKE
    }

    fn handle(
        &self,
        context: &mut ConnectionContext,
        input: &mut Decoder,
        transformed: &mut Vec<u8>,
    ) -> anyhow::Result<HandledFlag> {
        let version = input.read_var_int()?;
        context.set_protocol_version(version);
        input.skip_chunk()?;
        input.consume::<2>()?;
        let state_id = i32::from(input.read_u8()? as i8);
        let requested_state =
            ConnectionState::from_id(state_id).context("invalid next-state in handshake")?;

        context.set_state(requested_state);

        let mut encoder = Encoder::new(transformed);
        encoder.write_var_int(version);
        encoder.write_string(context.remote_host());
        encoder.write_u16(context.remote_port());
        encoder.write_u8(requested_state.id() as u8);

        Ok(HandledFlag::Transformed)
    }
}

/// Records the username from the login start packet.
struct RequestLogin;

impl PacketHandler for RequestLogin {
    fn id(&self) -> i32 {
        PID_CL_REQUEST_LOGIN
    }

    fn handle(
        &self,
        context: &mut ConnectionContext,
        input: &mut Decoder,
        _transformed: &mut Vec<u8>,
    ) -> anyhow::Result<HandledFlag> {
        let username = input.read_string()?.to_owned();
        tracing::info!("Client requested to login, username: {username}");
        context.set_player_username(username);
        Ok(HandledFlag::Passed)
    }
}

/// Intercepts the origin's encryption request, substituting the proxy's
/// own public key so the client handshakes with us instead.
struct RequestEncryption;

impl PacketHandler for RequestEncryption {
    fn id(&self) -> i32 {
        PID_SL_REQUEST_ENCRYPTION
    }

    fn handle(
        &self,
        context: &mut ConnectionContext,
        input: &mut Decoder,
        transformed: &mut Vec<u8>,
    ) -> anyhow::Result<HandledFlag> {
        let server_id = input.read_string()?.to_owned();
        let origin_public_key = crypt::decode_public_key(input.read_byte_array()?)?;
        let verify_token = input.read_byte_array()?.to_vec();

        let handshaking = HandshakingContext::new(server_id, origin_public_key, verify_token)?;

        let mut encoder = Encoder::new(transformed);
        encoder.write_string(&handshaking.server_id);
        encoder.write_byte_array(&crypt::encode_public_key(&handshaking.proxy_public_key)?);
        encoder.write_byte_array(&handshaking.verify_token);

        tracing::info!(
            "Server requested encryption, client username: {}",
            context.player_username().unwrap_or("<unknown>")
        );
        context.set_encryption(EncryptionContext::Handshaking(handshaking));

        Ok(HandledFlag::Transformed)
    }
}

/// Completes the encryption handshake on both legs: verifies the client
/// against the session service, joins the origin server with the
/// configured account, and installs the enabled cipher set.
struct EncryptionResponse;

impl PacketHandler for EncryptionResponse {
    fn id(&self) -> i32 {
        PID_CL_ENCRYPTION_RESPONSE
    }

    fn handle(
        &self,
        context: &mut ConnectionContext,
        input: &mut Decoder,
        transformed: &mut Vec<u8>,
    ) -> anyhow::Result<HandledFlag> {
        let (server_id, origin_public_key, verify_token, proxy_public_key, proxy_private_key) =
            match context.encryption() {
                EncryptionContext::Handshaking(handshaking) => (
                    handshaking.server_id.clone(),
                    handshaking.origin_public_key.clone(),
                    handshaking.verify_token.clone(),
                    handshaking.proxy_public_key.clone(),
                    handshaking.proxy_private_key.clone(),
                ),
                _ => bail!("encryption context is not in the handshaking phase"),
            };

        let username = context
            .player_username()
            .context("player username is not set")?
            .to_owned();
        if context.accounts().is_empty() {
            bail!("unable to enable encryption because no accounts were configured: {username}");
        }
        let profile = context
            .accounts()
            .get(&username)
            .cloned()
            .with_context(|| format!("no account profile found for username: {username}"))?;

        let encrypted_secret = input.read_byte_array()?;
        let encrypted_token = input.read_byte_array()?;

        let client_key: [u8; 16] = crypt::decrypt_rsa(&proxy_private_key, encrypted_secret)?
            .try_into()
            .ok()
            .context("client shared secret has invalid length")?;
        let token = crypt::decrypt_rsa(&proxy_private_key, encrypted_token)?;
        if token != verify_token {
            bail!("unable to authenticate the client (verify token check): {username}");
        }

        let client_address = context
            .client_address()
            .context("client address is not set")?
            .to_owned();
        let proxy_key_der = crypt::encode_public_key(&proxy_public_key)?;
        let client_hash = crypt::server_id_hash(&server_id, &client_key, &proxy_key_der);
        if !context
            .session()
            .has_joined(&username, &client_hash, &client_address)?
        {
            bail!("unable to authenticate the client (hasJoined check): {username}");
        }

        let server_key = crypt::generate_secret_key();
        let origin_key_der = crypt::encode_public_key(&origin_public_key)?;
        let origin_hash = crypt::server_id_hash(&server_id, &server_key, &origin_key_der);
        context.session().join(&profile, &origin_hash)?;

        let mut encoder = Encoder::new(transformed);
        encoder.write_byte_array(&crypt::encrypt_rsa(&origin_public_key, &server_key)?);
        encoder.write_byte_array(&crypt::encrypt_rsa(&origin_public_key, &verify_token)?);

        context.set_encryption(EncryptionContext::enabled(client_key, server_key));
        tracing::info!("Client authenticated, username: {username}");

        Ok(HandledFlag::Transformed)
    }
}

/// Advances the connection to the play state after login completes.
struct LoginSuccess;

impl PacketHandler for LoginSuccess {
    fn id(&self) -> i32 {
        PID_SL_LOGIN_SUCCESS
    }

    fn handle(
        &self,
        context: &mut ConnectionContext,
        _input: &mut Decoder,
        _transformed: &mut Vec<u8>,
    ) -> anyhow::Result<HandledFlag> {
        context.set_state(ConnectionState::Play);
        tracing::info!(
            "Client successfully logged in, username: {}",
            context.player_username().unwrap_or("<unknown>")
        );
        Ok(HandledFlag::Passed)
    }
}

/// Records the threshold from the origin's Set Compression packet and
/// blocks it, keeping the client leg uncompressed.
struct EnableCompression;

impl PacketHandler for EnableCompression {
    fn id(&self) -> i32 {
        PID_SL_ENABLE_COMPRESSION
    }

    fn handle(
        &self,
        context: &mut ConnectionContext,
        input: &mut Decoder,
        _transformed: &mut Vec<u8>,
    ) -> anyhow::Result<HandledFlag> {
        context.set_compression_threshold(input.read_var_int()?);
        Ok(HandledFlag::Blocked)
    }
}

/// Protocol 47 can also toggle compression with a play-state packet.
struct V47SetCompressionLevel;

impl PacketHandler for V47SetCompressionLevel {
    fn id(&self) -> i32 {
        PID_SP_V47_SET_COMPRESSION_LEVEL
    }

    fn handle(
        &self,
        context: &mut ConnectionContext,
        input: &mut Decoder,
        _transformed: &mut Vec<u8>,
    ) -> anyhow::Result<HandledFlag> {
        if context.protocol_version() == Some(47) {
            context.set_compression_threshold(input.read_var_int()?);
            return Ok(HandledFlag::Blocked);
        }
        Ok(HandledFlag::Passed)
    }
}
