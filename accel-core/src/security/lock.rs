use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::net::IpAddr;
use thiserror::Error;
use tracing::warn;

/// Default cooldown before a rule-triggered lock lazily auto-unlocks.
const AUTO_UNLOCK_AFTER: Duration = Duration::minutes(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockKind {
    RuleTriggered,
    BypassAttempt,
}

/// Snapshot of the lock state machine. `Unlocked` is represented as
/// `locked: false` with every other field `None`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LockState {
    pub locked: bool,
    pub kind: Option<LockKind>,
    pub reason: Option<String>,
    pub at: Option<DateTime<Utc>>,
    pub by_ip: Option<IpAddr>,
    pub by_user: Option<String>,
    pub unlock_at: Option<DateTime<Utc>>,
    pub require_manual: bool,
}

impl LockState {
    fn unlocked() -> Self {
        Self {
            locked: false,
            kind: None,
            reason: None,
            at: None,
            by_ip: None,
            by_user: None,
            unlock_at: None,
            require_manual: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("system is locked and requires manual unlock by an administrator")]
    ManualUnlockRequired,
    #[error("invalid administrator password")]
    WrongPassword,
}

/// Holds the `LockState` and arbitrates lock/unlock transitions. The lazy
/// auto-unlock upgrade is race-safe: readers check under a shared lock and
/// only re-validate and mutate under the exclusive lock.
pub struct LockService {
    state: RwLock<LockState>,
    admin_password_hash: String,
}

impl LockService {
    pub fn new(admin_password_hash: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(LockState::unlocked()),
            admin_password_hash: admin_password_hash.into(),
        }
    }

    /// `Unlocked -> Locked{kind=RuleTriggered, require_manual=false}`.
    pub fn lock_system(&self, reason: &str, ip: IpAddr) {
        let now = Utc::now();
        let mut st = self.state.write();
        *st = LockState {
            locked: true,
            kind: Some(LockKind::RuleTriggered),
            reason: Some(reason.to_string()),
            at: Some(now),
            by_ip: Some(ip),
            by_user: None,
            unlock_at: Some(now + AUTO_UNLOCK_AFTER),
            require_manual: false,
        };
        warn!(%ip, reason, "system locked");
    }

    /// `Unlocked -> Locked{kind=BypassAttempt, require_manual=true}`. No
    /// `unlock_at` is set: this lock only clears via a manual admin action
    /// outside this service (e.g. a deploy-time reset).
    pub fn lock_system_by_bypass(&self, ip: IpAddr, user: Option<String>) {
        let now = Utc::now();
        let mut st = self.state.write();
        *st = LockState {
            locked: true,
            kind: Some(LockKind::BypassAttempt),
            reason: Some("bypass attempt detected".to_string()),
            at: Some(now),
            by_ip: Some(ip),
            by_user: user,
            unlock_at: None,
            require_manual: true,
        };
        warn!(%ip, "system locked due to bypass attempt");
    }

    /// A read that applies the lazy auto-unlock upgrade if due.
    pub fn is_system_locked(&self) -> bool {
        self.state().locked
    }

    /// Returns the current state, first applying the lazy auto-unlock
    /// upgrade (re-validated under the exclusive lock) if it is due.
    pub fn state(&self) -> LockState {
        {
            let st = self.state.read();
            if !self.auto_unlock_due(&st) {
                return st.clone();
            }
        }
        let mut st = self.state.write();
        if self.auto_unlock_due(&st) {
            *st = LockState::unlocked();
        }
        st.clone()
    }

    fn auto_unlock_due(&self, st: &LockState) -> bool {
        st.locked
            && !st.require_manual
            && st.unlock_at.is_some_and(|t| Utc::now() > t)
    }

    /// `Locked -> Unlocked` iff `require_manual == false` and the password
    /// validates against the configured admin hash.
    pub fn unlock_system(&self, admin_password: &str) -> Result<(), LockError> {
        // Apply any pending auto-unlock first so a stale `Locked` snapshot
        // doesn't reject a password check that would otherwise succeed.
        let current = self.state();
        if !current.locked {
            return Ok(());
        }
        if current.require_manual {
            return Err(LockError::ManualUnlockRequired);
        }
        self.verify_admin_password(admin_password)?;
        *self.state.write() = LockState::unlocked();
        Ok(())
    }

    fn verify_admin_password(&self, candidate: &str) -> Result<(), LockError> {
        let parsed = PasswordHash::new(&self.admin_password_hash).map_err(|_| LockError::WrongPassword)?;
        Argon2::default()
            .verify_password(candidate.as_bytes(), &parsed)
            .map_err(|_| LockError::WrongPassword)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{PasswordHasher, SaltString};
    use rand::rngs::OsRng;

    fn hash_of(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string()
    }

    #[test]
    fn starts_unlocked() {
        let svc = LockService::new(hash_of("admin"));
        assert!(!svc.is_system_locked());
    }

    #[test]
    fn rule_triggered_lock_accepts_correct_password() {
        let svc = LockService::new(hash_of("s3cret"));
        svc.lock_system("too many failures", "10.0.0.1".parse().unwrap());
        assert!(svc.is_system_locked());
        assert!(matches!(svc.unlock_system("wrong"), Err(LockError::WrongPassword)));
        svc.unlock_system("s3cret").unwrap();
        assert!(!svc.is_system_locked());
    }

    #[test]
    fn bypass_lock_rejects_manual_unlock() {
        let svc = LockService::new(hash_of("s3cret"));
        svc.lock_system_by_bypass("10.0.0.7".parse().unwrap(), None);
        let st = svc.state();
        assert_eq!(st.kind, Some(LockKind::BypassAttempt));
        assert!(st.require_manual);
        assert!(matches!(
            svc.unlock_system("s3cret"),
            Err(LockError::ManualUnlockRequired)
        ));
    }
}
