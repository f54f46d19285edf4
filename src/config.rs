//! Service Configuration
//!
//! Pacing, timeouts and secrets. Every value has a default and can be
//! overridden from the environment.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Battle engine configuration.
#[derive(Debug, Clone)]
pub struct BattleConfig {
    /// Pause before each round.
    pub round_delay: Duration,
    /// Pause before each round with the fast-spin option.
    pub fast_round_delay: Duration,
    /// Suspense before resolution, per case.
    pub resolve_delay_per_case: Duration,
    /// Time a rewarded battle stays visible before archival.
    pub archive_cooldown: Duration,
    /// Time a canceled battle stays visible.
    pub cancel_removal_delay: Duration,
    /// Per-call deadline for store and ledger.
    pub backend_timeout: Duration,
    /// Upper bound on rounds per battle.
    pub max_rounds: usize,
    /// Secret for private join keys.
    pub join_key_secret: String,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            round_delay: Duration::from_secs(3),
            fast_round_delay: Duration::from_millis(1500),
            resolve_delay_per_case: Duration::from_secs(1),
            archive_cooldown: Duration::from_secs(300),
            cancel_removal_delay: Duration::from_secs(5),
            backend_timeout: Duration::from_secs(5),
            max_rounds: 50,
            join_key_secret: String::new(),
        }
    }
}

impl BattleConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            round_delay: env_millis("BATTLE_ROUND_DELAY_MS", defaults.round_delay),
            fast_round_delay: env_millis("BATTLE_FAST_ROUND_DELAY_MS", defaults.fast_round_delay),
            resolve_delay_per_case: env_millis(
                "BATTLE_RESOLVE_DELAY_PER_CASE_MS",
                defaults.resolve_delay_per_case,
            ),
            archive_cooldown: env_parsed("BATTLE_ARCHIVE_COOLDOWN_SECS", defaults.archive_cooldown.as_secs())
                .map_or(defaults.archive_cooldown, Duration::from_secs),
            cancel_removal_delay: env_parsed(
                "BATTLE_CANCEL_REMOVAL_SECS",
                defaults.cancel_removal_delay.as_secs(),
            )
            .map_or(defaults.cancel_removal_delay, Duration::from_secs),
            backend_timeout: env_millis("BACKEND_TIMEOUT_MS", defaults.backend_timeout),
            max_rounds: env_parsed("BATTLE_MAX_ROUNDS", defaults.max_rounds).unwrap_or(defaults.max_rounds),
            join_key_secret: std::env::var("HMAC_SECRET").unwrap_or_else(|_| {
                warn!("HMAC_SECRET not set; private join keys use an empty secret");
                defaults.join_key_secret
            }),
        }
    }

    /// Zero pacing, for tests and demos driven by a virtual clock.
    pub fn instant() -> Self {
        Self {
            round_delay: Duration::ZERO,
            fast_round_delay: Duration::ZERO,
            resolve_delay_per_case: Duration::ZERO,
            archive_cooldown: Duration::ZERO,
            cancel_removal_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparsable {}={:?}", key, raw);
                Some(default)
            }
        },
        Err(_) => Some(default),
    }
}

fn env_millis(key: &str, default: Duration) -> Duration {
    let fallback = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_parsed(key, fallback).map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BattleConfig::default();
        assert_eq!(config.round_delay, Duration::from_secs(3));
        assert_eq!(config.archive_cooldown, Duration::from_secs(300));
        assert!(config.fast_round_delay < config.round_delay);
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("BATTLE_ROUND_DELAY_MS", "250");
        std::env::set_var("BATTLE_MAX_ROUNDS", "not-a-number");
        std::env::set_var("HMAC_SECRET", "s3cret");

        let config = BattleConfig::from_env();

        assert_eq!(config.round_delay, Duration::from_millis(250));
        assert_eq!(config.max_rounds, 50);
        assert_eq!(config.join_key_secret, "s3cret");

        std::env::remove_var("BATTLE_ROUND_DELAY_MS");
        std::env::remove_var("BATTLE_MAX_ROUNDS");
        std::env::remove_var("HMAC_SECRET");
    }

    #[test]
    fn test_instant_has_no_pacing() {
        let config = BattleConfig::instant();
        assert_eq!(config.round_delay, Duration::ZERO);
        assert_eq!(config.archive_cooldown, Duration::ZERO);
        assert_eq!(config.backend_timeout, Duration::from_secs(5));
    }
}
