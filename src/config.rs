use anyhow::{bail, Context};
use secrecy::SecretString;

/// Longest accepted token lifetime: one year.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug)]
pub struct TokenConfig {
    pub secret: SecretString,
    pub issuer: String,
    /// `None` issues tokens without an `exp` claim.
    pub ttl_minutes: Option<i64>,
}

/// Argon2 cost parameters. Stored hashes carry their own parameters, so
/// changing these only affects hashes created afterwards.
#[derive(Debug, Clone, Copy)]
pub struct HashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub token: TokenConfig,
    pub hash: HashConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let token = TokenConfig {
            secret: SecretString::from(
                std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            ),
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "authdesk".into()),
            ttl_minutes: parse_ttl_minutes(std::env::var("JWT_TTL_MINUTES").ok())?,
        };
        let defaults = HashConfig::default();
        let hash = HashConfig {
            memory_kib: env_cost("HASH_MEMORY_KIB", defaults.memory_kib)?,
            iterations: env_cost("HASH_ITERATIONS", defaults.iterations)?,
            parallelism: env_cost("HASH_PARALLELISM", defaults.parallelism)?,
        };
        argon2::Params::new(hash.memory_kib, hash.iterations, hash.parallelism, None)
            .map_err(|e| anyhow::anyhow!("HASH_* settings rejected by argon2: {e}"))?;
        let port = std::env::var("APP_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse::<u16>()
            .context("APP_PORT must be a port number")?;

        Ok(Self {
            database_url,
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            token,
            hash,
        })
    }
}

/// Unset means no expiry; anything else must be a whole number of minutes
/// in `1..=MAX_TTL_MINUTES`.
fn parse_ttl_minutes(raw: Option<String>) -> anyhow::Result<Option<i64>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let minutes = raw
        .trim()
        .parse::<i64>()
        .with_context(|| format!("JWT_TTL_MINUTES must be a number of minutes, got {raw:?}"))?;
    if !(1..=MAX_TTL_MINUTES).contains(&minutes) {
        bail!("JWT_TTL_MINUTES must be between 1 and {MAX_TTL_MINUTES}, got {minutes}");
    }
    Ok(Some(minutes))
}

fn env_cost(key: &str, default: u32) -> anyhow::Result<u32> {
    let Some(raw) = std::env::var(key).ok() else {
        return Ok(default);
    };
    let value = raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("{key} must be a positive integer, got {raw:?}"))?;
    if value == 0 {
        bail!("{key} must be a positive integer, got 0");
    }
    Ok(value)
}
