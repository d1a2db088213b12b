//! Encryption state for a proxied connection.
//!
//! A connection starts out [`Disabled`](EncryptionContext::Disabled). When
//! the origin server requests encryption during login, the context moves to
//! `Handshaking`, which holds the origin's key material plus a freshly
//! generated RSA keypair presented to the client in the origin's place.
//! Once the client's response has been verified, the context becomes
//! `Enabled` and stays that way for the rest of the connection.
//!
//! Because the proxy terminates the client's handshake with its own
//! keypair, the client leg and the origin leg end up keyed independently,
//! so the enabled state carries four stream ciphers: encrypt/decrypt for
//! each direction.

use crate::packet::Direction;
use aes::{cipher::generic_array::GenericArray, Aes128};
use cfb8::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use rsa::{
    pkcs8::{spki, DecodePublicKey, EncodePublicKey},
    Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
};
use sha1::{Digest, Sha1};
use std::slice;

const RSA_KEY_BITS: usize = 1024;

/// Cryptographic failures are unrecoverable for the connection.
#[derive(Debug, thiserror::Error)]
pub enum CryptError {
    #[error("bad public key encoding: {0}")]
    KeyEncoding(#[from] spki::Error),
    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),
}

/// Per-connection encryption state.
pub enum EncryptionContext {
    Disabled,
    Handshaking(HandshakingContext),
    Enabled(EnabledContext),
}

impl EncryptionContext {
    pub fn is_enabled(&self) -> bool {
        matches!(self, EncryptionContext::Enabled(_))
    }

    pub fn enabled(client_key: [u8; 16], server_key: [u8; 16]) -> Self {
        EncryptionContext::Enabled(EnabledContext::new(client_key, server_key))
    }

    /// Ordering of the state machine: `Disabled` → `Handshaking` →
    /// `Enabled`, never backward.
    pub(crate) fn phase(&self) -> u8 {
        match self {
            EncryptionContext::Disabled => 0,
            EncryptionContext::Handshaking(_) => 1,
            EncryptionContext::Enabled(_) => 2,
        }
    }
}

/// Transient key material held between the origin's encryption request
/// and the client's encryption response.
pub struct HandshakingContext {
    pub server_id: String,
    pub origin_public_key: RsaPublicKey,
    pub verify_token: Vec<u8>,
    pub proxy_public_key: RsaPublicKey,
    pub proxy_private_key: RsaPrivateKey,
}

impl HandshakingContext {
    /// Begins the encryption handshake, generating the proxy's own
    /// keypair to present to the client.
    pub fn new(
        server_id: String,
        origin_public_key: RsaPublicKey,
        verify_token: Vec<u8>,
    ) -> Result<Self, CryptError> {
        let proxy_private_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)?;
        let proxy_public_key = RsaPublicKey::from(&proxy_private_key);
        Ok(Self {
            server_id,
            origin_public_key,
            verify_token,
            proxy_public_key,
            proxy_private_key,
        })
    }
}

type Encryptor = cfb8::Encryptor<Aes128>;
type Decryptor = cfb8::Decryptor<Aes128>;

/// Four independent AES-128/CFB-8 stream ciphers, one per
/// (direction × encrypt/decrypt). The IV is the key itself and the
/// running cipher state is never reset mid-connection.
pub struct EnabledContext {
    c2s_encryptor: Encryptor,
    c2s_decryptor: Decryptor,
    s2c_encryptor: Encryptor,
    s2c_decryptor: Decryptor,
}

impl EnabledContext {
    /// Builds the cipher set from the client-leg secret (shared with the
    /// client) and the origin-leg secret (shared with the origin server).
    /// Passing the same key twice yields a bit-transparent relay.
    pub fn new(client_key: [u8; 16], server_key: [u8; 16]) -> Self {
        Self {
            c2s_encryptor: Encryptor::new(&server_key.into(), &server_key.into()),
            c2s_decryptor: Decryptor::new(&client_key.into(), &client_key.into()),
            s2c_encryptor: Encryptor::new(&client_key.into(), &client_key.into()),
            s2c_decryptor: Decryptor::new(&server_key.into(), &server_key.into()),
        }
    }

    /// Encrypts `data` in place with the cipher for packets flowing in
    /// `direction`.
    pub fn encrypt(&mut self, direction: Direction, data: &mut [u8]) {
        let cipher = match direction {
            Direction::C2S => &mut self.c2s_encryptor,
            Direction::S2C => &mut self.s2c_encryptor,
        };
        for byte in data.iter_mut() {
            cipher.encrypt_block_mut(GenericArray::from_mut_slice(slice::from_mut(byte)));
        }
    }

    /// Decrypts `data` in place with the cipher for packets flowing in
    /// `direction`.
    pub fn decrypt(&mut self, direction: Direction, data: &mut [u8]) {
        let cipher = match direction {
            Direction::C2S => &mut self.c2s_decryptor,
            Direction::S2C => &mut self.s2c_decryptor,
        };
        for byte in data.iter_mut() {
            cipher.decrypt_block_mut(GenericArray::from_mut_slice(slice::from_mut(byte)));
        }
    }
}

/// Generates a fresh 128-bit AES secret.
pub fn generate_secret_key() -> [u8; 16] {
    let mut key = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Decodes an RSA public key from its SPKI DER encoding as carried by
/// the encryption request packet.
pub fn decode_public_key(der: &[u8]) -> Result<RsaPublicKey, CryptError> {
    Ok(RsaPublicKey::from_public_key_der(der)?)
}

/// Encodes an RSA public key to SPKI DER.
pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>, CryptError> {
    Ok(key.to_public_key_der()?.as_bytes().to_vec())
}

/// RSA-encrypts a small blob (shared secret or verify token).
pub fn encrypt_rsa(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, CryptError> {
    Ok(key.encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, data)?)
}

/// RSA-decrypts a small blob (shared secret or verify token).
pub fn decrypt_rsa(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptError> {
    Ok(key.decrypt(Pkcs1v15Encrypt, data)?)
}

/// Computes the server-id hash sent to the session service: SHA-1 over
/// the server-id string, the shared secret, and the public key DER,
/// rendered as Minecraft's signed two's-complement hex digest.
pub fn server_id_hash(server_id: &str, secret: &[u8], public_key_der: &[u8]) -> String {
    let mut sha = Sha1::new();
    sha.update(server_id.as_bytes());
    sha.update(secret);
    sha.update(public_key_der);
    minecraft_digest(sha.finalize().into())
}

fn minecraft_digest(mut hash: [u8; 20]) -> String {
    let negative = hash[0] & 0x80 != 0;
    if negative {
        let mut carry = true;
        for byte in hash.iter_mut().rev() {
            *byte = !*byte;
            if carry {
                let (value, overflow) = byte.overflowing_add(1);
                *byte = value;
                carry = overflow;
            }
        }
    }

    let mut hex: String = hash.iter().map(|byte| format!("{byte:02x}")).collect();
    hex = hex.trim_start_matches('0').to_string();
    if hex.is_empty() {
        hex.push('0');
    }
    if negative {
        format!("-{hex}")
    } else {
        hex
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_id_hash_known_answers() {
        assert_eq!(
            server_id_hash("Notch", &[], &[]),
            "4ed1f46bbe04bc756bcb17c0c7ce3e4632f06a48"
        );
        assert_eq!(
            server_id_hash("jeb_", &[], &[]),
            "-7c9d5b0044c130109a5d7b5fb5c317c02b4e28c1"
        );
        assert_eq!(
            server_id_hash("simon", &[], &[]),
            "88e16a1019277b15d58faf0541e11910eb756f6"
        );
    }

    #[test]
    fn cfb8_known_answer() {
        // openssl enc -aes-128-cfb8 -K 000102..0f -iv 000102..0f
        let key: [u8; 16] = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d,
            0x0e, 0x0f,
        ];
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let ciphertext = [
            0x7e, 0xbe, 0xb5, 0x6f, 0xf2, 0x3c, 0xfd, 0xb8, 0x92, 0x71, 0x91, 0x38, 0x15, 0xe6,
            0x4b, 0xb3, 0xb1, 0xb4, 0x23, 0xf7, 0xde, 0xc5, 0x11, 0xe2, 0xe2, 0xa2, 0x1f, 0xb7,
            0x55, 0x98, 0xc0, 0x92, 0xd6, 0x2d, 0x7d, 0x74, 0x19, 0xe1, 0xef, 0x72, 0xa0, 0x89,
            0xc1,
        ];

        let mut encrypted = plaintext.to_vec();
        EnabledContext::new(key, key).encrypt(Direction::C2S, &mut encrypted);
        assert_eq!(encrypted, ciphertext);

        let mut decrypted = ciphertext.to_vec();
        EnabledContext::new(key, key).decrypt(Direction::C2S, &mut decrypted);
        assert_eq!(&decrypted[..], &plaintext[..]);
    }

    #[test]
    fn cfb8_stream_state_persists_across_chunks() {
        let key = *b"0123456789abcdef";
        let plaintext = b"the quick brown fox jumps over the lazy dog";

        let mut one_shot = plaintext.to_vec();
        EnabledContext::new(key, key).encrypt(Direction::C2S, &mut one_shot);
        assert_ne!(&one_shot[..], &plaintext[..]);

        let mut chunked = plaintext.to_vec();
        let mut ctx = EnabledContext::new(key, key);
        let (head, tail) = chunked.split_at_mut(13);
        ctx.encrypt(Direction::C2S, head);
        ctx.encrypt(Direction::C2S, tail);
        assert_eq!(chunked, one_shot);

        let mut decrypted = one_shot.clone();
        let mut ctx = EnabledContext::new(key, key);
        let (head, tail) = decrypted.split_at_mut(29);
        ctx.decrypt(Direction::C2S, head);
        ctx.decrypt(Direction::C2S, tail);
        assert_eq!(&decrypted[..], &plaintext[..]);
    }

    #[test]
    fn legs_are_keyed_independently() {
        let client_key = [0x11; 16];
        let server_key = [0x22; 16];
        let plaintext = b"independent legs";

        // C2S traffic leaves the proxy under the origin-leg key.
        let mut toward_origin = plaintext.to_vec();
        EnabledContext::new(client_key, server_key)
            .encrypt(Direction::C2S, &mut toward_origin);

        let mut origin_view = toward_origin.clone();
        EnabledContext::new(server_key, server_key).decrypt(Direction::C2S, &mut origin_view);
        assert_eq!(&origin_view[..], &plaintext[..]);

        // Decrypting with the client-leg key instead must not work.
        let mut wrong = toward_origin;
        EnabledContext::new(client_key, client_key).decrypt(Direction::C2S, &mut wrong);
        assert_ne!(&wrong[..], &plaintext[..]);
    }

    #[test]
    fn rsa_roundtrip_through_der() {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS).unwrap();
        let public_key = RsaPublicKey::from(&private_key);

        let der = encode_public_key(&public_key).unwrap();
        let decoded = decode_public_key(&der).unwrap();
        assert_eq!(decoded, public_key);

        let secret = generate_secret_key();
        let encrypted = encrypt_rsa(&decoded, &secret).unwrap();
        assert_eq!(decrypt_rsa(&private_key, &encrypted).unwrap(), secret);
    }
}
