/*
    spotify-curator | Rust CLI tool to review playlists and prune unwanted tracks.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Proof-key (PKCE, RFC 7636) helpers for the authorization-code handshake.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Unreserved URL-safe alphabet used for verifiers and state tokens.
const ALPHANUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

pub const MIN_VERIFIER_LENGTH: usize = 43;
pub const MAX_VERIFIER_LENGTH: usize = 128;
pub const VERIFIER_LENGTH: usize = MAX_VERIFIER_LENGTH;

const STATE_LENGTH: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PkceError {
    #[error(
        "Code verifier length must be between {} and {}, got {0}",
        MIN_VERIFIER_LENGTH,
        MAX_VERIFIER_LENGTH
    )]
    InvalidLength(usize),
}

fn random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| ALPHANUM[rng.gen_range(0..ALPHANUM.len())] as char)
        .collect()
}

/// Generates a code verifier of `length` characters.
pub fn generate_verifier(length: usize) -> Result<String, PkceError> {
    if !(MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH).contains(&length) {
        return Err(PkceError::InvalidLength(length));
    }
    Ok(random_string(length))
}

/// S256 challenge: base64url (no padding) of the SHA-256 digest of the verifier.
pub fn derive_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Opaque anti-forgery token round-tripped through the authorization redirect.
pub fn generate_state() -> String {
    random_string(STATE_LENGTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_uses_unreserved_alphabet() {
        let verifier = generate_verifier(VERIFIER_LENGTH).unwrap();
        assert_eq!(verifier.len(), 128);
        assert!(verifier.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_verifier_length_bounds() {
        assert_eq!(generate_verifier(42), Err(PkceError::InvalidLength(42)));
        assert_eq!(generate_verifier(129), Err(PkceError::InvalidLength(129)));
        assert_eq!(generate_verifier(43).unwrap().len(), 43);
    }

    #[test]
    fn test_challenge_matches_rfc7636_vector() {
        // Appendix B of RFC 7636.
        let challenge = derive_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk");
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_challenge_is_deterministic_and_url_safe() {
        for length in MIN_VERIFIER_LENGTH..=MAX_VERIFIER_LENGTH {
            let verifier = generate_verifier(length).unwrap();
            let first = derive_challenge(&verifier);
            let second = derive_challenge(&verifier);

            assert_eq!(first, second);
            assert_eq!(first.len(), 43);
            assert!(!first.contains(&['+', '/', '='][..]));
        }
    }

    #[test]
    fn test_state_tokens_differ() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
