use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity carried by a session token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimUser {
    pub id: Uuid,
}

/// JWT payload used for sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionClaim {
    pub user: ClaimUser, // authenticated account
    pub iat: usize,      // issued at (unix timestamp)
    pub iss: String,     // issuer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<usize>, // only present when a TTL is configured
}

impl SessionClaim {
    pub fn user_id(&self) -> Uuid {
        self.user.id
    }
}
