use super::model::{PersonalAccessToken, Session, User};
use super::store::{PatStore, SessionStore, UserStore};
use crate::security::{IntrusionDetector, LockService};
use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const SESSION_LIFETIME: Duration = Duration::hours(24);
const JWT_LIFETIME: Duration = Duration::hours(24);
const PAT_PREFIX: &str = "pat_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub token: String,
    pub session: Session,
    pub must_change_password: bool,
    pub lock_warning: Option<String>,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("system is locked")]
    SystemLocked,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("user is inactive")]
    InactiveUser,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("token signing failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Login, JWT validation, and personal-access-token validation. Feeds
/// failures into [`IntrusionDetector`] and refuses logins while the
/// system is locked.
pub struct AuthService {
    jwt_secret: String,
    issuer: String,
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    pats: Arc<dyn PatStore>,
    pub(crate) lock: Arc<LockService>,
    intrusion: Arc<IntrusionDetector>,
}

impl AuthService {
    pub fn new(
        jwt_secret: impl Into<String>,
        issuer: impl Into<String>,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        pats: Arc<dyn PatStore>,
        lock: Arc<LockService>,
        intrusion: Arc<IntrusionDetector>,
    ) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            issuer: issuer.into(),
            users,
            sessions,
            pats,
            lock,
            intrusion,
        }
    }

    pub async fn login(&self, username: &str, password: &str, ip: IpAddr) -> AuthResult<LoginOutcome> {
        if self.lock.is_system_locked() {
            return Err(AuthError::SystemLocked);
        }

        let user = match self.users.find_by_username(username).await {
            Some(u) => u,
            None => {
                self.intrusion.increment_failed_attempt(ip, "login_failure", Some(username));
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !user.active {
            return Err(AuthError::InactiveUser);
        }

        if !self.verify_password(&user.password_hash, password) {
            self.intrusion.increment_failed_attempt(ip, "login_failure", Some(username));
            return Err(AuthError::InvalidCredentials);
        }

        self.intrusion.reset_attempts(ip);

        let token = self.mint_jwt(&user)?;
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            token: token.clone(),
            created_at: now,
            expires_at: now + SESSION_LIFETIME,
        };
        self.sessions.create_or_replace(session.clone()).await;

        let lock_warning = if !self.lock.is_system_locked() {
            None
        } else {
            Some("system lock pending".to_string())
        };

        Ok(LoginOutcome {
            must_change_password: user.must_change_password,
            user,
            token,
            session,
            lock_warning,
        })
    }

    fn mint_jwt(&self, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now();
        let claims = Claims {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role.clone(),
            iat: now.timestamp(),
            exp: (now + JWT_LIFETIME).timestamp(),
            iss: self.issuer.clone(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
    }

    /// Parses and verifies a JWT's signature and expiry. Feeds
    /// `invalid_jwt` into the intrusion detector on failure.
    pub fn validate_jwt(&self, token: &str, ip: IpAddr) -> AuthResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.clone()]);
        match decode::<Claims>(token, &DecodingKey::from_secret(self.jwt_secret.as_bytes()), &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => {
                self.intrusion.increment_failed_attempt(ip, "invalid_jwt", None);
                Err(AuthError::Jwt(e))
            }
        }
    }

    /// Strips the `pat_` prefix, hashes the remainder, looks it up,
    /// rejects if expired, and bumps `last_used_at`.
    pub async fn validate_token(&self, presented: &str, ip: IpAddr) -> AuthResult<PersonalAccessToken> {
        let Some(plain) = presented.strip_prefix(PAT_PREFIX) else {
            self.intrusion.increment_failed_attempt(ip, "invalid_token", None);
            return Err(AuthError::InvalidToken);
        };
        let hash = hex::encode(Sha256::digest(plain.as_bytes()));
        let Some(pat) = self.pats.find_by_hash(&hash).await else {
            self.intrusion.increment_failed_attempt(ip, "invalid_token", None);
            return Err(AuthError::InvalidToken);
        };
        if pat.is_expired(Utc::now()) {
            self.intrusion.increment_failed_attempt(ip, "invalid_token", None);
            return Err(AuthError::InvalidToken);
        }
        let now = Utc::now();
        self.pats.touch_last_used(pat.id, now).await;
        Ok(pat)
    }

    fn verify_password(&self, stored_hash: &str, candidate: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        Argon2::default().verify_password(candidate.as_bytes(), &parsed).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{InMemoryPatStore, InMemorySessionStore, InMemoryUserStore};
    use crate::security::{IntrusionThresholds, LockService};
    use argon2::password_hash::{PasswordHasher, SaltString};
    use rand::rngs::OsRng;

    fn hash_of(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default().hash_password(password.as_bytes(), &salt).unwrap().to_string()
    }

    fn service_with_user(username: &str, password: &str, active: bool) -> (AuthService, Uuid) {
        let users = Arc::new(InMemoryUserStore::new());
        let id = Uuid::new_v4();
        users.insert(User {
            id,
            username: username.to_string(),
            password_hash: hash_of(password),
            role: "admin".to_string(),
            active,
            must_change_password: false,
        });
        let sessions = Arc::new(InMemorySessionStore::new());
        let pats = Arc::new(InMemoryPatStore::new());
        let lock = Arc::new(LockService::new(hash_of("admin-pw")));
        let intrusion = Arc::new(IntrusionDetector::new(IntrusionThresholds::default(), lock.clone()));
        (
            AuthService::new("top-secret", "accel", users, sessions, pats, lock, intrusion),
            id,
        )
    }

    #[tokio::test]
    async fn login_succeeds_then_validates_jwt() {
        let (svc, id) = service_with_user("alice", "hunter2", true);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let outcome = svc.login("alice", "hunter2", ip).await.unwrap();
        assert_eq!(outcome.user.id, id);

        let claims = svc.validate_jwt(&outcome.token, ip).unwrap();
        assert_eq!(claims.user_id, id);
        assert_eq!(claims.username, "alice");
    }

    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let (svc, _) = service_with_user("bob", "correct", true);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(matches!(
            svc.login("bob", "wrong", ip).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn inactive_user_is_rejected() {
        let (svc, _) = service_with_user("carol", "pw", false);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(matches!(
            svc.login("carol", "pw", ip).await,
            Err(AuthError::InactiveUser)
        ));
    }

    #[tokio::test]
    async fn login_refused_while_locked() {
        let (svc, _) = service_with_user("dave", "pw", true);
        svc.lock.lock_system("manual test", "10.0.0.1".parse().unwrap());
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(matches!(svc.login("dave", "pw", ip).await, Err(AuthError::SystemLocked)));
    }
}
