use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, UserRecord};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Storage for user records. Implementations must enforce email
/// uniqueness themselves: `create` is the only authority on duplicates.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>>;
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<UserRecord>>;
    async fn create(&self, user: NewUser) -> Result<UserRecord, DirectoryError>;
    /// Returns `false` when no record has this id.
    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool>;
}

/// Postgres-backed directory over the `users` table.
#[derive(Clone)]
pub struct PgDirectory {
    db: PgPool,
}

impl PgDirectory {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountDirectory for PgDirectory {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, name, email, mobile, password_hash, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, name, email, mobile, password_hash, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .context("find user by id")?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        let res = sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO users (id, name, email, mobile, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, email, mobile, password_hash, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.mobile)
        .bind(&user.password_hash)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(record) => Ok(record),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(DirectoryError::DuplicateEmail)
            }
            Err(e) => Err(anyhow::Error::new(e).context("insert user").into()),
        }
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(r#"UPDATE users SET password_hash = $2 WHERE id = $1"#)
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await
            .context("update password hash")?;
        Ok(res.rows_affected() == 1)
    }
}
