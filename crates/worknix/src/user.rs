//! User accounts and password credentials.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::*;

/// Name of the superuser account.
pub const ROOT_USER: &str = "root";
/// Shell assigned to new accounts.
pub const DEFAULT_SHELL: &str = "/bin/bash";
/// First uid handed out to regular users.
pub const FIRST_USER_UID: u32 = 1000;

const SALT_LEN: usize = 16;

/// Compares two strings in constant time.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes()
        .iter()
        .zip(b.as_bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

/// Checks a username against `[a-z_][a-z0-9_-]*`.
pub fn validate_username(name: &str) -> Result<(), VfsError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_lowercase() || first == '_' => chars
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'),
        _ => false,
    };
    if !valid {
        return Err(VfsError::Validation(format!(
            "invalid username '{}': use lowercase letters, digits, '-' and '_'",
            name
        )));
    }
    Ok(())
}

fn digest(salt: &[u8], password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Salted SHA-256 password credential. The plaintext is never kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    salt: String,
    hash: String,
}

impl Credential {
    /// Derives a credential from a plaintext password with a fresh salt.
    pub fn derive(password: &str) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            salt: hex::encode(salt),
            hash: digest(&salt, password),
        }
    }

    /// Returns true if `password` produces this credential.
    pub fn verify(&self, password: &str) -> bool {
        match hex::decode(&self.salt) {
            Ok(salt) => constant_time_eq(&digest(&salt, password), &self.hash),
            Err(_) => false,
        }
    }
}

/// A user account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique login name
    pub username: String,
    credential: Credential,
    /// User ID
    pub uid: u32,
    /// Primary group ID
    pub gid: u32,
    /// Absolute home directory path
    pub home: String,
    /// Login shell
    pub shell: String,
}

impl User {
    /// Creates a user, deriving the credential from `password`.
    pub fn new(username: &str, password: &str, uid: u32, gid: u32, home: &str, shell: &str) -> Self {
        Self {
            username: username.to_string(),
            credential: Credential::derive(password),
            uid,
            gid,
            home: home.to_string(),
            shell: shell.to_string(),
        }
    }

    /// The superuser account with the given password.
    pub fn root(password: &str) -> Self {
        Self::new(ROOT_USER, password, 0, 0, crate::vfs::ROOT_HOME, DEFAULT_SHELL)
    }

    /// A regular account with home `/home/<username>`.
    pub fn regular(username: &str, password: &str, uid: u32, gid: u32) -> Self {
        Self::new(
            username,
            password,
            uid,
            gid,
            &format!("/home/{}", username),
            DEFAULT_SHELL,
        )
    }

    /// True for uid 0.
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    /// Checks a plaintext password against the stored credential.
    pub fn verify_password(&self, password: &str) -> bool {
        self.credential.verify(password)
    }

    /// Replaces the credential; identity fields are untouched.
    pub fn set_password(&mut self, password: &str) {
        self.credential = Credential::derive(password);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_cases() {
        assert!(constant_time_eq("hello", "hello"));
        assert!(!constant_time_eq("hello", "world"));
        assert!(!constant_time_eq("hello", "hello world"));
    }

    #[test]
    fn test_credential_verify() {
        let cred = Credential::derive("s3cret");
        assert!(cred.verify("s3cret"));
        assert!(!cred.verify("S3cret"));
        assert!(!cred.verify(""));
    }

    #[test]
    fn test_credential_is_salted() {
        let a = Credential::derive("same");
        let b = Credential::derive("same");
        assert_ne!(a, b);
        assert!(a.verify("same") && b.verify("same"));
    }

    #[test]
    fn test_credential_never_stores_plaintext() {
        let cred = Credential::derive("plaintext-pw");
        let encoded = serde_json::to_string(&cred).unwrap();
        assert!(!encoded.contains("plaintext-pw"));
    }

    #[test]
    fn test_corrupt_salt_never_verifies() {
        let cred = Credential {
            salt: "zz".to_string(),
            hash: String::new(),
        };
        assert!(!cred.verify(""));
    }

    #[test]
    fn test_validate_username() {
        for ok in ["alice", "_svc", "bob-2", "a_b"] {
            assert!(validate_username(ok).is_ok(), "{}", ok);
        }
        for bad in ["", "Alice", "1bob", "-x", "a b", "a/b", "ünï"] {
            match validate_username(bad) {
                Err(VfsError::Validation(_)) => {}
                other => panic!("expected Validation for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_root_user() {
        let root = User::root("root");
        assert!(root.is_root());
        assert_eq!(root.home, "/root");
        assert_eq!(root.shell, "/bin/bash");
        assert!(root.verify_password("root"));
    }

    #[test]
    fn test_set_password_keeps_identity() {
        let mut u = User::regular("alice", "old", 1000, 1000);
        u.set_password("new");
        assert!(u.verify_password("new"));
        assert!(!u.verify_password("old"));
        assert_eq!((u.uid, u.gid), (1000, 1000));
        assert_eq!(u.home, "/home/alice");
    }
}
