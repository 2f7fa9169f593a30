use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the directory.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRecord {
    pub id: Uuid,                   // unique user ID
    pub name: String,               // display name
    pub email: String,              // unique login email
    pub mobile: Option<String>,     // optional contact number
    #[serde(skip_serializing)]
    pub password_hash: String,      // Argon2 PHC string, not exposed in JSON
    pub created_at: OffsetDateTime, // creation timestamp
}

/// Values needed to create a record; the directory assigns nothing else.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub mobile: Option<String>,
    pub password_hash: String,
}

impl NewUser {
    pub fn into_record(self) -> UserRecord {
        UserRecord {
            id: Uuid::new_v4(),
            name: self.name,
            email: self.email,
            mobile: self.mobile,
            password_hash: self.password_hash,
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Public part of the user returned to the client.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<UserRecord> for PublicUser {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            mobile: user.mobile,
            created_at: user.created_at,
        }
    }
}
