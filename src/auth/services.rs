use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest},
        jwt::TokenService,
        password::PasswordHasher,
        repo::{AccountDirectory, DirectoryError},
        repo_types::{NewUser, PublicUser, UserRecord},
    },
    error::AuthError,
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex =
            Regex::new(r"^[-A-Za-z0-9_.]+@([-A-Za-z0-9_]+\.)+[-A-Za-z0-9_]{2,4}$").expect("email regex compiles");
    }
    EMAIL_RE.is_match(email)
}

/// Collects every failed check before reporting.
#[derive(Default)]
struct Violations(Vec<String>);

impl Violations {
    fn check(&mut self, ok: bool, message: &str) {
        if !ok {
            self.0.push(message.to_string());
        }
    }

    fn finish(self) -> Result<(), AuthError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Validation(self.0))
        }
    }
}

/// Register, login, current-user and password operations over a directory.
pub struct CredentialService {
    directory: Arc<dyn AccountDirectory>,
    hasher: PasswordHasher,
    tokens: Arc<TokenService>,
}

impl CredentialService {
    pub fn new(
        directory: Arc<dyn AccountDirectory>,
        hasher: PasswordHasher,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            directory,
            hasher,
            tokens,
        }
    }

    #[instrument(skip(self, req), fields(email = %req.email.trim()))]
    pub async fn register(&self, req: RegisterRequest) -> Result<AuthResponse, AuthError> {
        let name = req.name.trim().to_string();
        let email = req.email.trim().to_string();

        let mut v = Violations::default();
        v.check(
            req.password.chars().count() >= MIN_PASSWORD_LEN,
            "Password must contain 8 characters",
        );
        v.check(is_valid_email(&email), "Please enter a valid email");
        v.check(!name.is_empty(), "Enter your name");
        v.finish()?;

        if self.directory.find_by_email(&email).await?.is_some() {
            warn!("email already registered");
            return Err(AuthError::DuplicateEmail);
        }

        let password_hash = self.hasher.hash_blocking(req.password).await?;
        let user = self
            .directory
            .create(NewUser {
                name,
                email,
                mobile: req.mobile.filter(|m| !m.trim().is_empty()),
                password_hash,
            })
            .await
            .map_err(|e| match e {
                DirectoryError::DuplicateEmail => {
                    warn!("email registered concurrently");
                    AuthError::DuplicateEmail
                }
                DirectoryError::Unexpected(e) => AuthError::Internal(e),
            })?;

        let auth_token = self.tokens.issue_for(user.id)?;
        info!(user_id = %user.id, "user registered");
        Ok(AuthResponse {
            auth_token,
            user: user.into(),
        })
    }

    #[instrument(skip(self, req), fields(email = %req.email.trim()))]
    pub async fn login(&self, req: LoginRequest) -> Result<AuthResponse, AuthError> {
        let email = req.email.trim().to_string();

        let mut v = Violations::default();
        v.check(is_valid_email(&email), "Please enter a valid email");
        v.check(!req.password.is_empty(), "Password cannot be blank");
        v.finish()?;

        let user = match self.directory.find_by_email(&email).await? {
            Some(u) => u,
            None => {
                warn!("login unknown email");
                return Err(AuthError::NotFound("Email is not registered"));
            }
        };

        if !self.check_password(req.password, &user).await? {
            warn!(user_id = %user.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        let auth_token = self.tokens.issue_for(user.id)?;
        info!(user_id = %user.id, "user logged in");
        Ok(AuthResponse {
            auth_token,
            user: user.into(),
        })
    }

    #[instrument(skip(self))]
    pub async fn current_user(&self, user_id: Uuid) -> Result<PublicUser, AuthError> {
        match self.directory.find_by_id(user_id).await? {
            Some(user) => Ok(user.into()),
            None => {
                warn!("token refers to a missing user");
                Err(AuthError::NotFound("User not found"))
            }
        }
    }

    /// The target is always the caller's own record. An email hint, when
    /// given, must name that record; otherwise the change is `NotFound`.
    #[instrument(skip(self, req))]
    pub async fn change_password(
        &self,
        user_id: Uuid,
        req: ChangePasswordRequest,
    ) -> Result<(), AuthError> {
        let mut v = Violations::default();
        v.check(!req.current_password.is_empty(), "Current password is required");
        v.check(
            req.new_password.chars().count() >= MIN_PASSWORD_LEN,
            "New password length must be at least 8",
        );
        v.finish()?;

        let user = self
            .directory
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::NotFound("User not found"))?;

        let hint = req
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());
        if let Some(email) = hint {
            if email != user.email {
                warn!("email hint does not match the caller");
                return Err(AuthError::NotFound("User not found"));
            }
        }

        if !self.check_password(req.current_password, &user).await? {
            warn!("current password mismatch");
            return Err(AuthError::IncorrectPassword);
        }

        self.store_new_password(user.id, req.new_password).await?;
        info!("password changed");
        Ok(())
    }

    /// Resets by email alone; knowing the address is the only proof asked for.
    #[instrument(skip(self, req), fields(email = %req.email.trim()))]
    pub async fn reset_password(&self, req: ResetPasswordRequest) -> Result<(), AuthError> {
        let email = req.email.trim().to_string();

        let mut v = Violations::default();
        v.check(
            req.new_password.chars().count() >= MIN_PASSWORD_LEN,
            "New password length must be at least 8",
        );
        v.check(!email.is_empty(), "Email is required");
        v.finish()?;

        let user = self
            .directory
            .find_by_email(&email)
            .await?
            .ok_or(AuthError::NotFound("User not found"))?;

        self.store_new_password(user.id, req.new_password).await?;
        info!(user_id = %user.id, "password reset");
        Ok(())
    }

    async fn check_password(&self, plain: String, user: &UserRecord) -> Result<bool, AuthError> {
        Ok(self
            .hasher
            .verify_blocking(plain, user.password_hash.clone())
            .await?)
    }

    async fn store_new_password(&self, user_id: Uuid, plain: String) -> Result<(), AuthError> {
        let hash = self.hasher.hash_blocking(plain).await?;
        if !self.directory.update_password(user_id, &hash).await? {
            return Err(AuthError::NotFound("User not found"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::memory::MemoryDirectory,
        config::{HashConfig, TokenConfig},
    };
    use secrecy::SecretString;

    struct Fixture {
        dir: Arc<MemoryDirectory>,
        tokens: Arc<TokenService>,
        svc: Arc<CredentialService>,
    }

    fn test_tokens() -> Arc<TokenService> {
        Arc::new(TokenService::new(&TokenConfig {
            secret: SecretString::from("test-secret".to_string()),
            issuer: "test".into(),
            ttl_minutes: None,
        }))
    }

    fn cheap_hasher() -> PasswordHasher {
        PasswordHasher::new(HashConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap()
    }

    fn service_over(dir: Arc<dyn AccountDirectory>) -> CredentialService {
        CredentialService::new(dir, cheap_hasher(), test_tokens())
    }

    fn fixture() -> Fixture {
        let dir = Arc::new(MemoryDirectory::new());
        let tokens = test_tokens();
        let svc = Arc::new(CredentialService::new(dir.clone(), cheap_hasher(), tokens.clone()));
        Fixture { dir, tokens, svc }
    }

    fn register_req(name: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            mobile: None,
        }
    }

    fn login_req(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn email_pattern() {
        assert!(is_valid_email("alice@x.com"));
        assert!(is_valid_email("first.last-1@mail.example.org"));
        assert!(!is_valid_email("alice"));
        assert!(!is_valid_email("alice@x"));
        assert!(!is_valid_email("alice@@x.com"));
        assert!(!is_valid_email("al ice@x.com"));
        assert!(!is_valid_email("ünï@x.com"));
        assert!(!is_valid_email("alice@exämple.com"));
        assert!(is_valid_email("under_score@x.co"));
    }

    #[tokio::test]
    async fn register_enforces_password_length() {
        let f = fixture();
        let err = f
            .svc
            .register(register_req("Alice", "alice@x.com", "1234567"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert!(f
            .svc
            .register(register_req("Alice", "alice@x.com", "12345678"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn register_reports_every_violation() {
        let f = fixture();
        match f.svc.register(register_req("  ", "bad", "short")).await {
            Err(AuthError::Validation(v)) => assert_eq!(v.len(), 3),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(f.dir.len().await, 0);
    }

    #[tokio::test]
    async fn register_twice_is_duplicate() {
        let f = fixture();
        f.svc
            .register(register_req("Alice", "alice@x.com", "longpass1"))
            .await
            .unwrap();
        let err = f
            .svc
            .register(register_req("Alice Again", "alice@x.com", "longpass2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateEmail));
        assert_eq!(f.dir.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registrations_admit_one() {
        let f = fixture();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let svc = f.svc.clone();
                tokio::spawn(async move {
                    svc.register(register_req("Racer", "race@x.com", &format!("longpass{i}")))
                        .await
                })
            })
            .collect();
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(e, AuthError::DuplicateEmail), "{e:?}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(f.dir.len().await, 1);
    }

    #[tokio::test]
    async fn login_distinguishes_failures() {
        let f = fixture();
        f.svc
            .register(register_req("Alice", "alice@x.com", "longpass1"))
            .await
            .unwrap();
        let wrong = f.svc.login(login_req("alice@x.com", "wrongpass")).await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
        let unknown = f.svc.login(login_req("bob@x.com", "longpass1")).await;
        assert!(matches!(unknown, Err(AuthError::NotFound(_))));
        let blank = f.svc.login(login_req("alice@x.com", "")).await;
        assert!(matches!(blank, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn register_login_fetch_end_to_end() {
        let f = fixture();
        let reg = f
            .svc
            .register(register_req("Alice", "alice@x.com", "longpass1"))
            .await
            .unwrap();
        let login = f.svc.login(login_req("alice@x.com", "longpass1")).await.unwrap();

        let a = f.tokens.verify(&reg.auth_token).unwrap();
        let b = f.tokens.verify(&login.auth_token).unwrap();
        assert_eq!(a.user_id(), b.user_id());

        let me = f.svc.current_user(b.user_id()).await.unwrap();
        assert_eq!(me.name, "Alice");
        assert_eq!(me.email, "alice@x.com");
        let json = serde_json::to_value(&me).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn current_user_for_missing_id() {
        let f = fixture();
        let err = f.svc.current_user(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
    }

    #[tokio::test]
    async fn change_password_swaps_credentials() {
        let f = fixture();
        let reg = f
            .svc
            .register(register_req("Alice", "alice@x.com", "longpass1"))
            .await
            .unwrap();
        f.svc
            .change_password(
                reg.user.id,
                ChangePasswordRequest {
                    current_password: "longpass1".into(),
                    new_password: "newpass99".into(),
                    email: None,
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            f.svc.login(login_req("alice@x.com", "longpass1")).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(f.svc.login(login_req("alice@x.com", "newpass99")).await.is_ok());
    }

    #[tokio::test]
    async fn change_password_requires_current_password() {
        let f = fixture();
        let reg = f
            .svc
            .register(register_req("Alice", "alice@x.com", "longpass1"))
            .await
            .unwrap();
        let err = f
            .svc
            .change_password(
                reg.user.id,
                ChangePasswordRequest {
                    current_password: "not-it-at-all".into(),
                    new_password: "newpass99".into(),
                    email: Some("alice@x.com".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::IncorrectPassword));

        let short = f
            .svc
            .change_password(
                reg.user.id,
                ChangePasswordRequest {
                    current_password: "longpass1".into(),
                    new_password: "short".into(),
                    email: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(short, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn change_password_rejects_other_accounts_email() {
        let f = fixture();
        f.svc
            .register(register_req("Alice", "alice@x.com", "longpass1"))
            .await
            .unwrap();
        let bob = f
            .svc
            .register(register_req("Bob", "bob@x.com", "bobspass1"))
            .await
            .unwrap();

        // Bob names Alice's email: nothing changes for either account.
        let err = f
            .svc
            .change_password(
                bob.user.id,
                ChangePasswordRequest {
                    current_password: "bobspass1".into(),
                    new_password: "bobsnew99".into(),
                    email: Some("alice@x.com".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
        assert!(f.svc.login(login_req("alice@x.com", "longpass1")).await.is_ok());
        assert!(f.svc.login(login_req("bob@x.com", "bobspass1")).await.is_ok());

        // Naming his own email works.
        f.svc
            .change_password(
                bob.user.id,
                ChangePasswordRequest {
                    current_password: "bobspass1".into(),
                    new_password: "bobsnew99".into(),
                    email: Some(" bob@x.com ".into()),
                },
            )
            .await
            .unwrap();
        assert!(f.svc.login(login_req("bob@x.com", "bobsnew99")).await.is_ok());

        // A caller whose record is gone cannot reach another account by email.
        let err = f
            .svc
            .change_password(
                Uuid::new_v4(),
                ChangePasswordRequest {
                    current_password: "longpass1".into(),
                    new_password: "hijacked1".into(),
                    email: Some("alice@x.com".into()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound(_)));
        assert!(f.svc.login(login_req("alice@x.com", "longpass1")).await.is_ok());
    }

    #[derive(Clone, Copy)]
    enum Fault {
        LookupFails,
        CreateFails,
        // Lookups miss, so the service always reaches `create`.
        LookupMisses,
    }

    /// Wraps a memory directory and injects one kind of failure.
    struct FaultyDirectory {
        inner: MemoryDirectory,
        fault: Fault,
    }

    #[async_trait::async_trait]
    impl AccountDirectory for FaultyDirectory {
        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<UserRecord>> {
            match self.fault {
                Fault::LookupFails => anyhow::bail!("connection reset by 10.0.0.3"),
                Fault::LookupMisses => Ok(None),
                Fault::CreateFails => self.inner.find_by_email(email).await,
            }
        }

        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<UserRecord>> {
            match self.fault {
                Fault::LookupFails => anyhow::bail!("connection reset by 10.0.0.3"),
                _ => self.inner.find_by_id(id).await,
            }
        }

        async fn create(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
            match self.fault {
                Fault::CreateFails => Err(anyhow::anyhow!("disk full").into()),
                _ => self.inner.create(user).await,
            }
        }

        async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<bool> {
            self.inner.update_password(id, password_hash).await
        }
    }

    fn faulty(fault: Fault) -> (Arc<FaultyDirectory>, CredentialService) {
        let dir = Arc::new(FaultyDirectory {
            inner: MemoryDirectory::new(),
            fault,
        });
        (dir.clone(), service_over(dir))
    }

    async fn seed_alice(dir: &FaultyDirectory) -> UserRecord {
        let hash = cheap_hasher().hash("longpass1").unwrap();
        dir.inner
            .create(NewUser {
                name: "Alice".into(),
                email: "alice@x.com".into(),
                mobile: None,
                password_hash: hash,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn storage_failure_on_create_is_internal_and_writes_nothing() {
        let (dir, svc) = faulty(Fault::CreateFails);
        let err = svc
            .register(register_req("Alice", "alice@x.com", "longpass1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert_eq!(dir.inner.len().await, 0);
    }

    #[tokio::test]
    async fn storage_failure_on_lookup_is_internal() {
        let (dir, svc) = faulty(Fault::LookupFails);
        let alice = seed_alice(&dir).await;

        let err = svc
            .register(register_req("Bob", "bob@x.com", "longpass1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert_eq!(dir.inner.len().await, 1);

        let err = svc.login(login_req("alice@x.com", "longpass1")).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));

        let err = svc.current_user(alice.id).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));

        let err = svc
            .change_password(
                alice.id,
                ChangePasswordRequest {
                    current_password: "longpass1".into(),
                    new_password: "newpass99".into(),
                    email: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        let stored = dir.inner.find_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, alice.password_hash);
    }

    #[tokio::test]
    async fn duplicate_caught_only_by_directory_is_duplicate_email() {
        let (dir, svc) = faulty(Fault::LookupMisses);
        let alice = seed_alice(&dir).await;

        let err = svc
            .register(register_req("Alice Again", "alice@x.com", "longpass2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicateEmail));
        assert_eq!(dir.inner.len().await, 1);
        let stored = dir.inner.find_by_email("alice@x.com").await.unwrap().unwrap();
        assert_eq!(stored.id, alice.id);
        assert_eq!(stored.name, "Alice");
    }

    #[tokio::test]
    async fn reset_password_by_email() {
        let f = fixture();
        f.svc
            .register(register_req("Alice", "alice@x.com", "longpass1"))
            .await
            .unwrap();
        f.svc
            .reset_password(ResetPasswordRequest {
                email: "alice@x.com".into(),
                new_password: "resetpass1".into(),
            })
            .await
            .unwrap();
        assert!(f.svc.login(login_req("alice@x.com", "resetpass1")).await.is_ok());

        let missing = f
            .svc
            .reset_password(ResetPasswordRequest {
                email: "nobody@x.com".into(),
                new_password: "resetpass1".into(),
            })
            .await;
        assert!(matches!(missing, Err(AuthError::NotFound(_))));

        match f
            .svc
            .reset_password(ResetPasswordRequest {
                email: "".into(),
                new_password: "short".into(),
            })
            .await
        {
            Err(AuthError::Validation(v)) => assert_eq!(v.len(), 2),
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
