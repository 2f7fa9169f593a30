use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;

use crate::auth::{
    jwt::TokenService,
    memory::MemoryDirectory,
    password::PasswordHasher,
    repo::{AccountDirectory, PgDirectory},
    services::CredentialService,
};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tokens: Arc<TokenService>,
    pub credentials: Arc<CredentialService>,
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let directory: Arc<dyn AccountDirectory> = match &config.database_url {
            Some(url) => {
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to database")?;
                sqlx::migrate!("./migrations")
                    .run(&db)
                    .await
                    .context("run migrations")?;
                Arc::new(PgDirectory::new(db))
            }
            None => {
                tracing::warn!("DATABASE_URL not set; accounts are kept in memory only");
                Arc::new(MemoryDirectory::new())
            }
        };
        Self::from_parts(Arc::new(config), directory)
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        directory: Arc<dyn AccountDirectory>,
    ) -> anyhow::Result<Self> {
        let tokens = Arc::new(TokenService::new(&config.token));
        let hasher = PasswordHasher::new(config.hash)?;
        let credentials = Arc::new(CredentialService::new(directory, hasher, tokens.clone()));
        Ok(Self {
            config,
            tokens,
            credentials,
        })
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{HashConfig, TokenConfig};
        use secrecy::SecretString;

        let config = Arc::new(AppConfig {
            database_url: None,
            host: "127.0.0.1".into(),
            port: 0,
            token: TokenConfig {
                secret: SecretString::from("test-secret".to_string()),
                issuer: "test-issuer".into(),
                ttl_minutes: None,
            },
            hash: HashConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
        });
        Self::from_parts(config, Arc::new(MemoryDirectory::new())).expect("fake state")
    }
}
