//! Administrator credentials and login sessions.
//!
//! The credential record stores the password as an Argon2id PHC string
//! behind an explicit `scheme` tag. Records written by older versions as a
//! bare `{username, password}` pair are upgraded to the tagged form the
//! first time they are read.
//!
//! Hashing and verification run on the blocking thread pool.

use std::fmt;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config_store::ConfigDocument;
use crate::error::AuthError;
use crate::keys;
use crate::persist;
use crate::site::StoreContext;

/// How long a locked-out login stays locked.
pub const LOCKOUT_MS: i64 = 15 * 60 * 1000;

/// The encoded password, tagged with its scheme.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum Secret {
    /// PHC string produced by Argon2id.
    Argon2id { hash: String },
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Argon2id { .. } => f.write_str("Argon2id { hash: <redacted> }"),
        }
    }
}

/// Stored administrator credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub username: String,
    pub secret: Secret,
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCredentials {
    Tagged(CredentialRecord),
    Legacy { username: String, password: String },
}

/// A logged-in administrator session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSession {
    pub token: uuid::Uuid,
    pub username: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Limits applied by [`CredentialStore::login`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginPolicy {
    /// Consecutive failures before the login locks.
    pub max_attempts: u32,
    /// Session lifetime in minutes.
    pub session_timeout_minutes: u32,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self::from(&ConfigDocument::default())
    }
}

impl From<&ConfigDocument> for LoginPolicy {
    fn from(config: &ConfigDocument) -> Self {
        Self {
            max_attempts: config.max_login_attempts.max(1),
            session_timeout_minutes: config.session_timeout,
        }
    }
}

/// Check proposed credentials. All violated rules are reported.
///
/// # Errors
///
/// [`AuthError::Invalid`] listing every violated rule.
pub fn validate_credentials(username: &str, password: &str) -> Result<(), AuthError> {
    let username = username.trim();
    let mut errors = Vec::new();

    if username.chars().count() < 3 {
        errors.push("username must be at least 3 characters".to_owned());
    }
    if password.chars().count() < 6 {
        errors.push("password must be at least 6 characters".to_owned());
    }
    if !username.is_empty()
        && !username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        errors.push("username may only contain letters, digits, and underscores".to_owned());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(AuthError::Invalid { errors })
    }
}

async fn hash_password(password: &str) -> Result<Secret, AuthError> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| Secret::Argon2id {
                hash: hash.to_string(),
            })
            .map_err(|e| AuthError::Hashing {
                reason: e.to_string(),
            })
    })
    .await
    .map_err(|e| AuthError::Hashing {
        reason: format!("hashing task failed: {e}"),
    })?
}

async fn verify_password(password: &str, secret: &Secret) -> Result<bool, AuthError> {
    let password = password.to_owned();
    let Secret::Argon2id { hash } = secret.clone();
    tokio::task::spawn_blocking(move || {
        let parsed = PasswordHash::new(&hash).map_err(|e| AuthError::Hashing {
            reason: format!("stored hash is invalid: {e}"),
        })?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    })
    .await
    .map_err(|e| AuthError::Hashing {
        reason: format!("verification task failed: {e}"),
    })?
}

/// Credential record and session of a site.
pub struct CredentialStore {
    ctx: StoreContext,
    /// Serializes read-modify-write cycles on the record.
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Open the store, upgrading a legacy record if one is found.
    pub async fn open(ctx: StoreContext) -> Self {
        let store = Self {
            ctx,
            write_lock: Mutex::new(()),
        };
        if let Err(e) = store.load().await {
            warn!(error = %e, "credential record could not be loaded");
        }
        store
    }

    /// Whether a credential record exists.
    ///
    /// # Errors
    ///
    /// See [`CredentialStore::login`].
    pub async fn is_configured(&self) -> Result<bool, AuthError> {
        Ok(self.load().await?.is_some())
    }

    /// Username of the configured administrator.
    ///
    /// # Errors
    ///
    /// See [`CredentialStore::login`].
    pub async fn username(&self) -> Result<Option<String>, AuthError> {
        Ok(self.load().await?.map(|r| r.username))
    }

    /// Create the first credential record.
    ///
    /// # Errors
    ///
    /// [`AuthError::AlreadyConfigured`] if a record exists,
    /// [`AuthError::Invalid`] if the credentials break the rules.
    pub async fn bootstrap(&self, username: &str, password: &str) -> Result<(), AuthError> {
        validate_credentials(username, password)?;
        let _guard = self.write_lock.lock().await;
        if self.load().await?.is_some() {
            return Err(AuthError::AlreadyConfigured);
        }

        let record = CredentialRecord {
            username: username.trim().to_owned(),
            secret: hash_password(password).await?,
            failed_attempts: 0,
            locked_until: None,
        };
        self.save(&record).await?;
        info!(username = %record.username, "administrator credentials created");
        Ok(())
    }

    /// Check credentials and open a session.
    ///
    /// # Errors
    ///
    /// [`AuthError::CredentialMismatch`] for a wrong username or password,
    /// [`AuthError::LockedOut`] once `policy.max_attempts` consecutive
    /// attempts have failed, [`AuthError::NotConfigured`] if there is no
    /// record.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        policy: LoginPolicy,
    ) -> Result<AdminSession, AuthError> {
        let _guard = self.write_lock.lock().await;
        let mut record = self.load().await?.ok_or(AuthError::NotConfigured)?;
        let now = self.ctx.clock.now_ms();

        if let Some(until) = record.locked_until {
            if now < until {
                return Err(AuthError::LockedOut {
                    attempts: record.failed_attempts,
                });
            }
            record.locked_until = None;
            record.failed_attempts = 0;
        }

        let matches =
            username.trim() == record.username && verify_password(password, &record.secret).await?;
        if !matches {
            record.failed_attempts = record.failed_attempts.saturating_add(1);
            let attempts = record.failed_attempts;
            if attempts >= policy.max_attempts {
                record.locked_until = Some(now.saturating_add(LOCKOUT_MS));
                self.save(&record).await?;
                warn!(attempts, "administrator login locked");
                return Err(AuthError::LockedOut { attempts });
            }
            self.save(&record).await?;
            warn!(attempts, "administrator login failed");
            return Err(AuthError::CredentialMismatch {
                reason: "invalid username or password".to_owned(),
            });
        }

        if record.failed_attempts > 0 {
            record.failed_attempts = 0;
            self.save(&record).await?;
        }

        let session = AdminSession {
            token: uuid::Uuid::new_v4(),
            username: record.username,
            issued_at: now,
            expires_at: now.saturating_add(i64::from(policy.session_timeout_minutes) * 60_000),
        };
        let bytes = persist::encode(keys::SESSION, &session)?;
        persist::put_with_recovery(&*self.ctx.storage, keys::SESSION, bytes, || None).await?;
        info!(username = %session.username, "administrator logged in");
        Ok(session)
    }

    /// The current session, if one exists and has not expired.
    pub async fn session(&self) -> Option<AdminSession> {
        let value = persist::load_value(&*self.ctx.storage, keys::SESSION).await?;
        let session: AdminSession = serde_json::from_value(value).ok()?;
        (session.expires_at > self.ctx.clock.now_ms()).then_some(session)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.session().await.is_some()
    }

    /// End the current session.
    ///
    /// # Errors
    ///
    /// [`AuthError::Store`] if the session cannot be removed.
    pub async fn logout(&self) -> Result<(), AuthError> {
        self.ctx.storage.delete(keys::SESSION).await?;
        info!("administrator logged out");
        Ok(())
    }

    /// Replace the credentials after verifying the current password. Ends
    /// the current session.
    ///
    /// # Errors
    ///
    /// [`AuthError::CredentialMismatch`] if the current password is wrong or
    /// the confirmation differs; [`AuthError::Invalid`] if the new
    /// credentials break the rules.
    pub async fn update_credentials(
        &self,
        current_password: &str,
        new_username: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock().await;
        let record = self.load().await?.ok_or(AuthError::NotConfigured)?;

        if !verify_password(current_password, &record.secret).await? {
            return Err(AuthError::CredentialMismatch {
                reason: "current password is incorrect".to_owned(),
            });
        }
        if new_password != confirm_password {
            return Err(AuthError::CredentialMismatch {
                reason: "new passwords do not match".to_owned(),
            });
        }
        validate_credentials(new_username, new_password)?;

        let updated = CredentialRecord {
            username: new_username.trim().to_owned(),
            secret: hash_password(new_password).await?,
            failed_attempts: 0,
            locked_until: None,
        };
        self.save(&updated).await?;
        info!(username = %updated.username, "administrator credentials updated");
        self.logout().await
    }

    async fn load(&self) -> Result<Option<CredentialRecord>, AuthError> {
        let Some(value) = persist::load_value(&*self.ctx.storage, keys::CREDENTIALS).await else {
            return Ok(None);
        };
        match serde_json::from_value::<StoredCredentials>(value) {
            Ok(StoredCredentials::Tagged(record)) => Ok(Some(record)),
            Ok(StoredCredentials::Legacy { username, password }) => {
                let record = CredentialRecord {
                    username,
                    secret: hash_password(&password).await?,
                    failed_attempts: 0,
                    locked_until: None,
                };
                self.save(&record).await?;
                info!(username = %record.username, "legacy credentials upgraded to argon2id");
                Ok(Some(record))
            }
            Err(e) => {
                warn!(error = %e, "stored credentials are malformed, ignoring them");
                Ok(None)
            }
        }
    }

    async fn save(&self, record: &CredentialRecord) -> Result<(), AuthError> {
        let bytes = persist::encode(keys::CREDENTIALS, record)?;
        persist::put_with_recovery(&*self.ctx.storage, keys::CREDENTIALS, bytes, || None).await?;
        Ok(())
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("instance", &self.ctx.instance)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use pagekeeper_storage::{MemoryBackend, StorageBackend};
    use std::sync::Arc;

    struct Fixture {
        clock: Arc<ManualClock>,
        storage: Arc<MemoryBackend>,
        store: CredentialStore,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let storage = Arc::new(MemoryBackend::new());
        let store = CredentialStore::open(StoreContext::new(storage.clone(), clock.clone())).await;
        Fixture {
            clock,
            storage,
            store,
        }
    }

    async fn configured() -> Fixture {
        let f = fixture().await;
        f.store.bootstrap("admin", "s3cret!").await.unwrap();
        f
    }

    #[test]
    fn validation_reports_every_rule() {
        assert!(validate_credentials("admin_1", "123456").is_ok());

        let AuthError::Invalid { errors } = validate_credentials("a-", "123").unwrap_err() else {
            unreachable!("validation returns Invalid");
        };
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn validation_trims_username() {
        assert!(validate_credentials("  admin  ", "123456").is_ok());
        assert!(validate_credentials("  ab  ", "123456").is_err());
    }

    #[tokio::test]
    async fn record_is_tagged_and_hashed() {
        let f = configured().await;
        let raw = f.storage.get(keys::CREDENTIALS).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();

        assert_eq!(value["username"], "admin");
        assert_eq!(value["secret"]["scheme"], "argon2id");
        assert!(value["secret"]["hash"].as_str().unwrap().starts_with("$argon2id$"));
        assert!(!String::from_utf8_lossy(&raw).contains("s3cret!"));
    }

    #[tokio::test]
    async fn bootstrap_only_once() {
        let f = configured().await;
        let err = f.store.bootstrap("other", "password").await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyConfigured));
    }

    #[tokio::test]
    async fn login_opens_a_session() {
        let f = configured().await;
        let session = f
            .store
            .login("admin", "s3cret!", LoginPolicy::default())
            .await
            .unwrap();
        assert_eq!(session.expires_at - session.issued_at, 60 * 60_000);
        assert!(f.store.is_authenticated().await);

        f.store.logout().await.unwrap();
        assert!(!f.store.is_authenticated().await);
    }

    #[tokio::test]
    async fn session_expires() {
        let f = configured().await;
        let policy = LoginPolicy {
            max_attempts: 5,
            session_timeout_minutes: 1,
        };
        f.store.login("admin", "s3cret!", policy).await.unwrap();
        f.clock.advance(60_001);
        assert!(!f.store.is_authenticated().await);
    }

    #[tokio::test]
    async fn wrong_password_is_a_mismatch() {
        let f = configured().await;
        let err = f
            .store
            .login("admin", "wrong", LoginPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CredentialMismatch { .. }));
        assert!(!f.store.is_authenticated().await);
    }

    #[tokio::test]
    async fn repeated_failures_lock_the_login() {
        let f = configured().await;
        let policy = LoginPolicy {
            max_attempts: 3,
            session_timeout_minutes: 60,
        };
        for _ in 0..2 {
            let err = f.store.login("admin", "nope", policy).await.unwrap_err();
            assert!(matches!(err, AuthError::CredentialMismatch { .. }));
        }
        let err = f.store.login("admin", "nope", policy).await.unwrap_err();
        assert!(matches!(err, AuthError::LockedOut { attempts: 3 }));

        // Even the right password is refused while locked.
        let err = f.store.login("admin", "s3cret!", policy).await.unwrap_err();
        assert!(matches!(err, AuthError::LockedOut { .. }));

        f.clock.advance(LOCKOUT_MS);
        f.store.login("admin", "s3cret!", policy).await.unwrap();
    }

    #[tokio::test]
    async fn legacy_record_is_upgraded() {
        let clock = Arc::new(ManualClock::new(0));
        let storage = Arc::new(MemoryBackend::new());
        storage
            .put(keys::CREDENTIALS, br#"{"username": "admin", "password": "legacy1"}"#)
            .await
            .unwrap();

        let store = CredentialStore::open(StoreContext::new(storage.clone(), clock)).await;
        let raw = storage.get(keys::CREDENTIALS).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["secret"]["scheme"], "argon2id");
        assert!(value.get("password").is_none());

        store
            .login("admin", "legacy1", LoginPolicy::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn update_credentials_checks_current_and_confirmation() {
        let f = configured().await;
        f.store
            .login("admin", "s3cret!", LoginPolicy::default())
            .await
            .unwrap();

        let err = f
            .store
            .update_credentials("bad", "root", "newpass", "newpass")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CredentialMismatch { .. }));

        let err = f
            .store
            .update_credentials("s3cret!", "root", "newpass", "other")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CredentialMismatch { .. }));

        let err = f
            .store
            .update_credentials("s3cret!", "r!", "newpass", "newpass")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Invalid { .. }));

        f.store
            .update_credentials("s3cret!", "root", "newpass", "newpass")
            .await
            .unwrap();
        assert!(!f.store.is_authenticated().await);
        assert_eq!(f.store.username().await.unwrap().as_deref(), Some("root"));
        f.store
            .login("root", "newpass", LoginPolicy::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn login_without_record_is_not_configured() {
        let f = fixture().await;
        let err = f
            .store
            .login("admin", "whatever", LoginPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotConfigured));
        assert!(!f.store.is_configured().await.unwrap());
    }
}
