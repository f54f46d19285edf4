//! Seed Commitment
//!
//! The server seed is generated at battle creation and only its SHA-256 is
//! published. Revealing the seed after the battle lets anyone check it
//! against the commitment and replay every draw.

use std::fmt;

use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::hash::{hash_with_domain, sha256_hex};

use super::FairnessError;

/// Raw server seed length.
pub const SERVER_SEED_BYTES: usize = 32;

/// Domain separator for player client seeds.
const CLIENT_SEED_DOMAIN: &[u8] = b"CASE_BATTLE_CLIENT_SEED_V1";

/// Domain separator for bot client seeds.
const BOT_SEED_DOMAIN: &[u8] = b"CASE_BATTLE_BOT_SEED_V1";

type HmacSha256 = Hmac<Sha256>;

/// Server seed and its public commitment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSeed {
    /// Hex seed (secret until reveal).
    pub seed: String,
    /// Hex SHA-256 of `seed` (published).
    pub hash: String,
}

impl ServerSeed {
    /// Fresh seed from the OS CSPRNG.
    pub fn generate() -> Self {
        Self::generate_with(&mut OsRng)
    }

    /// Fresh seed from a caller-supplied CSPRNG.
    pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; SERVER_SEED_BYTES];
        rng.fill_bytes(&mut bytes);
        Self::from_seed(hex::encode(bytes))
    }

    /// Wrap an existing seed, computing its commitment.
    pub fn from_seed(seed: String) -> Self {
        let hash = commitment_for(&seed);
        Self { seed, hash }
    }

    /// Does the seed still match its commitment?
    pub fn verify(&self) -> bool {
        verify_commitment(&self.seed, &self.hash).is_ok()
    }
}

impl fmt::Debug for ServerSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSeed")
            .field("seed", &"<hidden>")
            .field("hash", &self.hash)
            .finish()
    }
}

/// Commitment published for `seed`.
pub fn commitment_for(seed: &str) -> String {
    sha256_hex(seed.as_bytes())
}

/// Check a revealed seed against a published commitment.
pub fn verify_commitment(seed: &str, hash: &str) -> Result<(), FairnessError> {
    if commitment_for(seed).eq_ignore_ascii_case(hash.trim()) {
        Ok(())
    } else {
        Err(FairnessError::CommitmentMismatch)
    }
}

/// Client seed for a seated player.
pub fn client_seed_for(user_id: i64) -> String {
    hex::encode(&hash_with_domain(CLIENT_SEED_DOMAIN, user_id.to_string().as_bytes())[..16])
}

/// Client seed for a seated bot.
pub fn bot_client_seed(bot_id: i64) -> String {
    hex::encode(&hash_with_domain(BOT_SEED_DOMAIN, bot_id.to_string().as_bytes())[..16])
}

/// Short opaque key required to join a private battle.
///
/// HMAC-SHA256 keyed by `secret` over `"{battle_id}:{created_at_unix}"`,
/// truncated to 8 bytes of hex.
pub fn private_join_key(secret: &str, battle_id: i64, created_at_unix: i64) -> Result<String, FairnessError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| FairnessError::JoinKey(e.to_string()))?;
    mac.update(format!("{battle_id}:{created_at_unix}").as_bytes());
    Ok(hex::encode(&mac.finalize().into_bytes()[..8]))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_generated_seed_shape() {
        let seed = ServerSeed::generate();
        assert_eq!(seed.seed.len(), SERVER_SEED_BYTES * 2);
        assert_eq!(seed.hash.len(), 64);
        assert!(seed.verify());
    }

    #[test]
    fn test_generation_is_random() {
        assert_ne!(ServerSeed::generate().seed, ServerSeed::generate().seed);
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let a = ServerSeed::generate_with(&mut ChaCha20Rng::seed_from_u64(7));
        let b = ServerSeed::generate_with(&mut ChaCha20Rng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_commitment_is_hash_of_hex_seed() {
        let seed = ServerSeed::from_seed("00ff".into());
        assert_eq!(seed.hash, sha256_hex(b"00ff"));
        assert!(verify_commitment("00ff", &seed.hash.to_uppercase()).is_ok());
        assert!(matches!(
            verify_commitment("00fe", &seed.hash),
            Err(FairnessError::CommitmentMismatch)
        ));
    }

    #[test]
    fn test_debug_hides_seed() {
        let seed = ServerSeed::from_seed("topsecret".into());
        let rendered = format!("{seed:?}");
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains(&seed.hash));
    }

    #[test]
    fn test_client_seeds() {
        assert_eq!(client_seed_for(42), client_seed_for(42));
        assert_ne!(client_seed_for(42), client_seed_for(43));
        assert_eq!(client_seed_for(42).len(), 32);
        assert_ne!(client_seed_for(7), bot_client_seed(7));
    }

    #[test]
    fn test_private_join_key() {
        let key = private_join_key("secret", 10, 1_700_000_000).unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(key, private_join_key("secret", 10, 1_700_000_000).unwrap());
        assert_ne!(key, private_join_key("other", 10, 1_700_000_000).unwrap());
        assert_ne!(key, private_join_key("secret", 11, 1_700_000_000).unwrap());
    }

    #[test]
    fn test_private_join_key_is_hmac_sha256() {
        // HMAC-SHA256("secret", "10:1700000000"), first 8 bytes
        assert_eq!(private_join_key("secret", 10, 1_700_000_000).unwrap(), "1ad853d21439a7ee");
        assert_eq!(private_join_key("", 10, 1_700_000_000).unwrap(), "b3f5146b11cd484e");
    }
}
