//! Login credential checks
//!
//! The registry calls the authenticator while holding its lock, so
//! implementations must answer from memory.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::protocol::Credential;

/// Accept or reject a login attempt
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, name: &str, credential: Option<&Credential>) -> bool;
}

/// Admits everyone; used when no key table is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl Authenticator for AcceptAll {
    fn authenticate(&self, _name: &str, _credential: Option<&Credential>) -> bool {
        true
    }
}

/// Checks tokens against a table of per-user shared secrets
///
/// A keyed worker logs in under its token, so each credential admits
/// exactly one name.
#[derive(Debug, Clone)]
pub struct KeyedAuthenticator {
    keys: HashMap<u32, String>,
}

impl KeyedAuthenticator {
    pub fn new(keys: HashMap<u32, String>) -> Self {
        Self { keys }
    }
}

impl Authenticator for KeyedAuthenticator {
    fn authenticate(&self, name: &str, credential: Option<&Credential>) -> bool {
        let Some(credential) = credential else {
            return false;
        };
        match self.keys.get(&credential.user) {
            Some(key) => {
                let expected = login_token(credential.user, key, &credential.timestamp);
                expected == name && expected == credential.token
            }
            None => false,
        }
    }
}

/// Hex SHA-256 over `user (LE) || key || timestamp`
pub fn login_token(user: u32, key: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.to_le_bytes());
    hasher.update(key.as_bytes());
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

/// Mint a credential the way miners do: the timestamp is the unix time in hex
pub fn issue_credential(user: u32, key: &str, unix_secs: u64) -> Credential {
    let timestamp = format!("{:x}", unix_secs as u32);
    Credential {
        user,
        token: login_token(user, key, &timestamp),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed() -> KeyedAuthenticator {
        let mut keys = HashMap::new();
        keys.insert(1, "thekey".to_string());
        keys.insert(2, "anotherthekey".to_string());
        KeyedAuthenticator::new(keys)
    }

    #[test]
    fn test_valid_token_accepted() {
        let auth = keyed();
        let credential = issue_credential(1, "thekey", 1_700_000_000);
        assert!(auth.authenticate(&credential.token, Some(&credential)));
    }

    #[test]
    fn test_name_must_match_token() {
        let auth = keyed();
        let credential = issue_credential(1, "thekey", 1_700_000_000);
        assert!(!auth.authenticate("mallory", Some(&credential)));

        let mut swapped = credential.clone();
        swapped.token = "mallory".into();
        assert!(!auth.authenticate("mallory", Some(&swapped)));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let auth = keyed();
        let credential = issue_credential(2, "thekey", 1_700_000_000);
        assert!(!auth.authenticate(&credential.token, Some(&credential)));
    }

    #[test]
    fn test_unknown_user_and_missing_credential_rejected() {
        let auth = keyed();
        let credential = issue_credential(9, "thekey", 1_700_000_000);
        assert!(!auth.authenticate(&credential.token, Some(&credential)));
        assert!(!auth.authenticate("anon", None));
        assert!(AcceptAll.authenticate("anon", None));
    }

    #[test]
    fn test_token_depends_on_timestamp() {
        assert_ne!(login_token(1, "thekey", "a"), login_token(1, "thekey", "b"));
        assert_eq!(login_token(1, "thekey", "a").len(), 64);
    }
}
