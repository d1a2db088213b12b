//! Account profiles and the session-service boundary.
//!
//! Validating a join against the third-party session service is an
//! external concern; this crate only defines the contract the encryption
//! handlers call through. Deployments install their own implementation.

use anyhow::Context;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A configured account the proxy can present to the origin server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub username: String,
    pub uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Boundary to the session service used during the encryption handshake.
///
/// `has_joined` checks that the connecting client announced the given
/// server hash; `join` announces the proxy's own join toward the origin
/// with the configured account.
pub trait SessionService: Send + Sync {
    fn has_joined(
        &self,
        username: &str,
        server_hash: &str,
        client_address: &str,
    ) -> anyhow::Result<bool>;

    fn join(&self, profile: &PlayerProfile, server_hash: &str) -> anyhow::Result<()>;
}

/// Default session service used when none is installed: refuses every
/// authentication attempt, so encrypted (online-mode) logins fail while
/// plaintext relaying is unaffected.
pub struct DenyAllSessions;

impl SessionService for DenyAllSessions {
    fn has_joined(
        &self,
        _username: &str,
        _server_hash: &str,
        _client_address: &str,
    ) -> anyhow::Result<bool> {
        Ok(false)
    }

    fn join(&self, _profile: &PlayerProfile, _server_hash: &str) -> anyhow::Result<()> {
        anyhow::bail!("no session service is configured")
    }
}

/// Reads the accounts file, a JSON map of username to profile.
pub fn load_accounts(path: &Path) -> anyhow::Result<AHashMap<String, PlayerProfile>> {
    let contents = fs_err::read_to_string(path)?;
    serde_json::from_str(&contents)
        .with_context(|| format!("malformed accounts file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounts_file_loads() {
        let dir = std::env::temp_dir().join("mitm-proxy-accounts-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("accounts.json");

        std::fs::write(
            &path,
            r#"{
                "Notch": {
                    "username": "Notch",
                    "uuid": "069a79f444e94726a5befca90e38aaf5",
                    "access_token": "token"
                },
                "jeb_": {
                    "username": "jeb_",
                    "uuid": "853c80ef3c3749fdaa49938b674adae6"
                }
            }"#,
        )
        .unwrap();

        let loaded = load_accounts(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded["Notch"].uuid, "069a79f444e94726a5befca90e38aaf5");
        assert_eq!(loaded["Notch"].access_token.as_deref(), Some("token"));
        assert_eq!(loaded["jeb_"].access_token, None);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn malformed_accounts_file_rejected() {
        let dir = std::env::temp_dir().join("mitm-proxy-accounts-test-bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("accounts.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(load_accounts(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
