use super::lock::LockService;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Escalation thresholds. `direct_url_access` and `forged_jwt` bypass
/// these entirely and lock on the first occurrence.
#[derive(Debug, Clone)]
pub struct IntrusionThresholds {
    pub max_login_attempts: u32,
    pub max_token_attempts: u32,
    pub max_api_attempts: u32,
}

impl Default for IntrusionThresholds {
    fn default() -> Self {
        Self {
            max_login_attempts: 5,
            max_token_attempts: 10,
            max_api_attempts: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub count: u32,
    pub last_attempt: DateTime<Utc>,
    pub by_code: HashMap<String, u32>,
}

impl AttemptRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            last_attempt: now,
            by_code: HashMap::new(),
        }
    }
}

/// Per-IP failed-attempt tracking with progressive delay and escalation
/// into [`LockService`].
pub struct IntrusionDetector {
    attempts: DashMap<IpAddr, AttemptRecord>,
    thresholds: IntrusionThresholds,
    lock: Arc<LockService>,
}

impl IntrusionDetector {
    pub fn new(thresholds: IntrusionThresholds, lock: Arc<LockService>) -> Self {
        Self {
            attempts: DashMap::new(),
            thresholds,
            lock,
        }
    }

    /// Bumps the counters for `ip`, returns the delay the caller should
    /// sleep before accepting the next attempt, and escalates to a system
    /// lock if a threshold was crossed.
    pub fn increment_failed_attempt(&self, ip: IpAddr, code: &str, user: Option<&str>) -> Duration {
        let now = Utc::now();
        let (total, code_count) = {
            let mut entry = self.attempts.entry(ip).or_insert_with(|| AttemptRecord::new(now));
            entry.count += 1;
            entry.last_attempt = now;
            let code_count = entry.by_code.entry(code.to_string()).or_insert(0);
            *code_count += 1;
            (entry.count, *code_count)
        };

        match code {
            "direct_url_access" | "forged_jwt" => {
                self.lock.lock_system_by_bypass(ip, user.map(str::to_string));
            }
            "invalid_jwt" | "invalid_token" => {
                if code_count >= self.thresholds.max_token_attempts {
                    self.lock.lock_system(&format!("{code} threshold exceeded"), ip);
                }
            }
            "login_failure" => {
                if code_count >= self.thresholds.max_login_attempts {
                    self.lock.lock_system("login failure threshold exceeded", ip);
                }
            }
            _ => {
                if total >= self.thresholds.max_api_attempts {
                    self.lock.lock_system("general API abuse threshold exceeded", ip);
                }
            }
        }

        self.progressive_delay(total)
    }

    /// `d(count) = min(30s, 1s * 2^(count-1))`.
    pub fn get_progressive_delay(&self, ip: IpAddr) -> Duration {
        let count = self.attempts.get(&ip).map(|r| r.count).unwrap_or(0);
        self.progressive_delay(count)
    }

    fn progressive_delay(&self, count: u32) -> Duration {
        if count == 0 {
            return Duration::ZERO;
        }
        let scaled = 1u64.checked_shl(count - 1).unwrap_or(u64::MAX);
        Duration::from_secs(scaled.min(30))
    }

    /// Called on a successful login; clears the IP's counters so future
    /// delays reset to zero.
    pub fn reset_attempts(&self, ip: IpAddr) {
        self.attempts.remove(&ip);
    }

    /// Idempotent: drops any record whose `last_attempt` is older than
    /// `max_age`.
    pub fn cleanup_old_attempts(&self, max_age: ChronoDuration) {
        let cutoff = Utc::now() - max_age;
        self.attempts.retain(|_, record| record.last_attempt >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argon2::password_hash::{PasswordHasher, SaltString};
    use rand::rngs::OsRng;

    fn lock_service() -> Arc<LockService> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2::Argon2::default()
            .hash_password(b"admin", &salt)
            .unwrap()
            .to_string();
        Arc::new(LockService::new(hash))
    }

    #[test]
    fn progressive_delay_matches_scenario() {
        let detector = IntrusionDetector::new(IntrusionThresholds::default(), lock_service());
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let expected = [1u64, 2, 4, 8, 16, 30];
        for exp in expected {
            let delay = detector.increment_failed_attempt(ip, "login_failure", None);
            assert_eq!(delay.as_secs(), exp);
        }
    }

    #[test]
    fn reset_attempts_zeroes_future_delay() {
        let detector = IntrusionDetector::new(IntrusionThresholds::default(), lock_service());
        let ip: IpAddr = "10.0.0.9".parse().unwrap();
        detector.increment_failed_attempt(ip, "login_failure", None);
        detector.reset_attempts(ip);
        assert_eq!(detector.get_progressive_delay(ip), Duration::ZERO);
    }

    #[test]
    fn direct_url_access_locks_on_first_event() {
        let lock = lock_service();
        let detector = IntrusionDetector::new(IntrusionThresholds::default(), lock.clone());
        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        detector.increment_failed_attempt(ip, "direct_url_access", None);
        let state = lock.state();
        assert!(state.locked);
        assert!(state.require_manual);
        assert!(matches!(state.kind, Some(crate::security::LockKind::BypassAttempt)));
    }

    #[test]
    fn login_failure_locks_after_threshold() {
        let lock = lock_service();
        let detector = IntrusionDetector::new(IntrusionThresholds::default(), lock.clone());
        let ip: IpAddr = "10.0.0.8".parse().unwrap();
        for _ in 0..4 {
            detector.increment_failed_attempt(ip, "login_failure", None);
        }
        assert!(!lock.is_system_locked());
        detector.increment_failed_attempt(ip, "login_failure", None);
        assert!(lock.is_system_locked());
    }
}
