use std::time::Duration;

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::ExposeSecret;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::claims::{ClaimUser, SessionClaim},
    config::{TokenConfig, MAX_TTL_MINUTES},
    error::AuthError,
};

/// Signs and verifies session tokens with the process-wide secret.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Option<Duration>,
}

impl TokenService {
    pub fn new(cfg: &TokenConfig) -> Self {
        let secret = cfg.secret.expose_secret().as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: cfg.issuer.clone(),
            // Out-of-range values are clamped so expiry arithmetic cannot overflow.
            ttl: cfg
                .ttl_minutes
                .map(|m| Duration::from_secs((m.clamp(1, MAX_TTL_MINUTES) as u64) * 60)),
        }
    }

    /// Builds the claim for a freshly authenticated account.
    pub fn claim_for(&self, user_id: Uuid) -> SessionClaim {
        let now = OffsetDateTime::now_utc();
        let exp = self
            .ttl
            .map(|ttl| (now + TimeDuration::seconds(ttl.as_secs() as i64)).unix_timestamp() as usize);
        SessionClaim {
            user: ClaimUser { id: user_id },
            iat: now.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            exp,
        }
    }

    pub fn issue(&self, claim: &SessionClaim) -> Result<String, AuthError> {
        let token = encode(&Header::new(Algorithm::HS256), claim, &self.encoding)
            .map_err(|e| AuthError::Internal(anyhow::anyhow!("sign token: {e}")))?;
        debug!(user_id = %claim.user.id, "token signed");
        Ok(token)
    }

    /// Shorthand for `issue(&claim_for(user_id))`.
    pub fn issue_for(&self, user_id: Uuid) -> Result<String, AuthError> {
        self.issue(&self.claim_for(user_id))
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaim, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        if self.ttl.is_some() {
            validation.set_required_spec_claims(&["exp", "iss"]);
        } else {
            validation.validate_exp = false;
            validation.set_required_spec_claims(&["iss"]);
        }
        let data = decode::<SessionClaim>(token, &self.decoding, &validation).map_err(|e| {
            warn!(error = %e, "token rejected");
            AuthError::InvalidToken
        })?;
        debug!(user_id = %data.claims.user.id, "token verified");
        Ok(data.claims)
    }
}
