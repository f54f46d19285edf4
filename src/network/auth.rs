//! Caller Identity
//!
//! Turns the opaque token on each request into a user ID, display name and
//! current balance. Tokens are JWTs issued elsewhere; this server only
//! validates them. Balances come from the ledger.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ledger::Ledger;
use crate::battle::model::UserId;
use crate::core::money::Money;

/// Token validation settings.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected `iss`; any issuer when unset.
    pub issuer: Option<String>,
    /// Expected `aud`; not checked when unset.
    pub audience: Option<String>,
    /// RS256 public key (PEM).
    pub public_key_pem: Option<String>,
    /// HS256 secret.
    pub secret: Option<String>,
    /// Accept expired tokens. Local testing only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Is a verification key present?
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims read from a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Numeric user ID, as a string.
    pub sub: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expiry (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at.
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// User ID carried in `sub`.
    pub fn user_id(&self) -> Result<UserId, AuthError> {
        match self.sub.trim().parse::<UserId>() {
            Ok(id) if id > 0 => Ok(id),
            _ => Err(AuthError::InvalidSubject(self.sub.clone())),
        }
    }
}

/// Identity errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No verification key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Not a JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// Past `exp`.
    #[error("token expired")]
    Expired,
    /// Wrong `iss`.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Wrong `aud`.
    #[error("invalid audience")]
    InvalidAudience,
    /// Claim absent.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// `sub` is not a user ID.
    #[error("subject {0:?} is not a user id")]
    InvalidSubject(String),
    /// Token not issued to anyone.
    #[error("unknown token")]
    UnknownToken,
    /// Balance lookup failed.
    #[error("profile unavailable: {0}")]
    ProfileUnavailable(String),
    /// Other decoding failure.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// User ID.
    pub user_id: UserId,
    /// Display name.
    pub display_name: String,
    /// Current balance.
    pub balance: Money,
}

/// Resolves request tokens to identities.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Identity behind `token`.
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError>;
}

// =============================================================================
// JWT
// =============================================================================

enum VerifyKey {
    Rsa(DecodingKey),
    Secret(DecodingKey),
}

/// Validates JWTs against a fixed key and rule set.
pub struct JwtValidator {
    key: VerifyKey,
    validation: Validation,
}

impl JwtValidator {
    /// Build from config. The key is parsed once.
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        let key = match (&config.public_key_pem, &config.secret) {
            (Some(pem), _) => VerifyKey::Rsa(
                DecodingKey::from_rsa_pem(pem.as_bytes())
                    .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?,
            ),
            (None, Some(secret)) => VerifyKey::Secret(DecodingKey::from_secret(secret.as_bytes())),
            (None, None) => return Err(AuthError::NotConfigured),
        };

        let mut validation = Validation::new(match key {
            VerifyKey::Rsa(_) => Algorithm::RS256,
            VerifyKey::Secret(_) => Algorithm::HS256,
        });
        validation.required_spec_claims = HashSet::new();
        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match config.audience {
            Some(ref audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if config.skip_expiry {
            validation.validate_exp = false;
        }

        Ok(Self { key, validation })
    }

    /// Verify `token` and return its claims.
    pub fn validate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let key = match &self.key {
            VerifyKey::Rsa(key) | VerifyKey::Secret(key) => key,
        };
        let claims = decode::<TokenClaims>(token, key, &self.validation)
            .map_err(map_jwt_error)?
            .claims;

        if claims.sub.is_empty() {
            return Err(AuthError::MissingClaim("sub".into()));
        }
        if self.validation.validate_exp && claims.exp > 0 {
            let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
            if now > claims.exp {
                return Err(AuthError::Expired);
            }
        }
        Ok(claims)
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

async fn balance_of(ledger: &dyn Ledger, user_id: UserId) -> Result<Money, AuthError> {
    ledger
        .balance(user_id)
        .await
        .map_err(|e| AuthError::ProfileUnavailable(e.to_string()))
}

/// JWT identity with balances from the ledger.
pub struct JwtIdentity {
    validator: JwtValidator,
    ledger: Arc<dyn Ledger>,
}

impl JwtIdentity {
    /// Resolver over `validator`.
    pub fn new(validator: JwtValidator, ledger: Arc<dyn Ledger>) -> Self {
        Self { validator, ledger }
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentity {
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        let claims = self.validator.validate(token)?;
        let user_id = claims.user_id()?;
        let balance = balance_of(self.ledger.as_ref(), user_id).await?;
        Ok(Identity {
            user_id,
            display_name: claims.name.unwrap_or_else(|| format!("user-{user_id}")),
            balance,
        })
    }
}

/// Fixed token table, for demos and tests.
pub struct StaticIdentity {
    tokens: BTreeMap<String, (UserId, String)>,
    ledger: Arc<dyn Ledger>,
}

impl StaticIdentity {
    /// Empty table.
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self { tokens: BTreeMap::new(), ledger }
    }

    /// Register a token.
    pub fn with_user(mut self, token: impl Into<String>, user_id: UserId, name: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), (user_id, name.into()));
        self
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentity {
    async fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        let (user_id, name) = self.tokens.get(token).cloned().ok_or(AuthError::UnknownToken)?;
        let balance = balance_of(self.ledger.as_ref(), user_id).await?;
        Ok(Identity { user_id, display_name: name, balance })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryLedger;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret-key-256-bits-long!!";

    fn sign(claims: &TokenClaims, secret: &str) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn claims_for(sub: &str) -> TokenClaims {
        let now = chrono::Utc::now().timestamp() as u64;
        TokenClaims {
            sub: sub.into(),
            name: Some("Alice".into()),
            exp: now + 3600,
            iat: now,
            iss: Some("test-issuer".into()),
            aud: Some(serde_json::json!("test-audience")),
        }
    }

    fn validator(config: AuthConfig) -> JwtValidator {
        JwtValidator::new(&AuthConfig { secret: Some(SECRET.into()), ..config }).unwrap()
    }

    #[test]
    fn test_valid_token() {
        let token = sign(&claims_for("42"), SECRET);
        let claims = validator(AuthConfig::default()).validate(&token).unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = claims_for("42");
        claims.exp = 1;
        let token = sign(&claims, SECRET);
        assert!(matches!(validator(AuthConfig::default()).validate(&token), Err(AuthError::Expired)));
    }

    #[test]
    fn test_skip_expiry() {
        let mut claims = claims_for("42");
        claims.exp = 1;
        let token = sign(&claims, SECRET);
        let lenient = validator(AuthConfig { skip_expiry: true, ..Default::default() });
        assert!(lenient.validate(&token).is_ok());
    }

    #[test]
    fn test_invalid_signature_rejected() {
        let token = sign(&claims_for("42"), "some-other-secret-entirely!!");
        assert!(matches!(
            validator(AuthConfig::default()).validate(&token),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_issuer_checked() {
        let token = sign(&claims_for("42"), SECRET);
        let strict = validator(AuthConfig { issuer: Some("elsewhere".into()), ..Default::default() });
        assert!(matches!(strict.validate(&token), Err(AuthError::InvalidIssuer)));
    }

    #[test]
    fn test_subject_must_be_user_id() {
        assert!(matches!(claims_for("alice").user_id(), Err(AuthError::InvalidSubject(_))));
        assert!(matches!(claims_for("0").user_id(), Err(AuthError::InvalidSubject(_))));
        assert!(matches!(
            validator(AuthConfig::default()).validate(&sign(&claims_for(""), SECRET)),
            Err(AuthError::MissingClaim(_))
        ));
    }

    #[test]
    fn test_not_configured() {
        assert!(matches!(JwtValidator::new(&AuthConfig::default()), Err(AuthError::NotConfigured)));
    }

    #[tokio::test]
    async fn test_jwt_identity_reads_balance() {
        let ledger = Arc::new(MemoryLedger::with_balances([(42, Money::from_units(9))]));
        let identity = JwtIdentity::new(validator(AuthConfig::default()), ledger);

        let who = identity.resolve(&sign(&claims_for("42"), SECRET)).await.unwrap();
        assert_eq!(who, Identity { user_id: 42, display_name: "Alice".into(), balance: Money::from_units(9) });

        let stranger = identity.resolve(&sign(&claims_for("7"), SECRET)).await;
        assert!(matches!(stranger, Err(AuthError::ProfileUnavailable(_))));
    }

    #[tokio::test]
    async fn test_static_identity() {
        let ledger = Arc::new(MemoryLedger::with_balances([(1, Money::from_units(5))]));
        let identity = StaticIdentity::new(ledger).with_user("tok-1", 1, "one");

        assert_eq!(identity.resolve("tok-1").await.unwrap().balance, Money::from_units(5));
        assert!(matches!(identity.resolve("nope").await, Err(AuthError::UnknownToken)));
    }
}
