//! Access tokens for link-based (no-login) approval responses.
//!
//! A token is a capability: fresh random bytes per issuance, reusable until the
//! step it was issued for resolves. Only its digest is persisted.

use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

const TOKEN_BYTES: usize = 32;

#[derive(Clone, Debug)]
pub struct IssuedToken {
    token: SecretString,
    digest: String,
}

impl IssuedToken {
    pub fn generate() -> Self {
        let mut bytes = [0_u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
        let digest = digest_token(&token);
        Self { token: token.into(), digest }
    }

    pub fn expose(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

pub fn digest_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.trim().as_bytes());
    format!("sha256:{:x}", hasher.finalize())
}

/// Compares without short-circuiting on the first differing byte.
pub fn token_matches(candidate: &str, stored_digest: &str) -> bool {
    let computed = digest_token(candidate);
    let left = computed.as_bytes();
    let right = stored_digest.as_bytes();
    if left.len() != right.len() {
        return false;
    }
    left.iter().zip(right).fold(0_u8, |acc, (l, r)| acc | (l ^ r)) == 0
}

#[cfg(test)]
mod tests {
    use super::{digest_token, token_matches, IssuedToken};

    #[test]
    fn issued_tokens_are_fresh_per_issuance() {
        let first = IssuedToken::generate();
        let second = IssuedToken::generate();

        assert_eq!(first.expose().len(), 64);
        assert_ne!(first.expose(), second.expose());
        assert_ne!(first.digest(), second.digest());
    }

    #[test]
    fn digest_matches_only_its_own_token() {
        let issued = IssuedToken::generate();
        assert!(token_matches(issued.expose(), issued.digest()));
        assert!(!token_matches("not-the-token", issued.digest()));
        assert!(digest_token("abc").starts_with("sha256:"));
    }

    #[test]
    fn debug_output_does_not_leak_token() {
        let issued = IssuedToken::generate();
        let debug = format!("{issued:?}");
        assert!(!debug.contains(issued.expose()));
    }
}
