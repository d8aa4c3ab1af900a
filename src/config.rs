//! Session configuration.
//!
//! Defaults reproduce the stock sample: provider role on the
//! `/sample/hellomessage` profile, unsecured sends.

use crate::protocol::PROFILE_ID;
use crate::types::AgentRole;
use std::time::Duration;

/// How registration is retried after a rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl RetryPolicy {
    /// Retry forever with no delay between attempts.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1,
        }
    }

    /// Delay before attempt `attempt + 1`, given `attempt` attempts so far.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let factor = self.multiplier.max(1).saturating_pow(exp);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub profile_id: String,
    pub role: AgentRole,
    /// Request transport-level encryption on sends.
    pub secure: bool,
    pub retry: RetryPolicy,
    /// Treat a duplicate-registration result as success instead of retrying.
    pub duplicate_is_registered: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile_id: PROFILE_ID.to_string(),
            role: AgentRole::Provider,
            secure: false,
            retry: RetryPolicy::default(),
            duplicate_is_registered: false,
        }
    }
}

impl SessionConfig {
    /// Apply `MEXLINK_*` environment overrides. Only called by hosts that opt in.
    ///
    /// - `MEXLINK_PROFILE_ID`: profile path
    /// - `MEXLINK_SECURE`: `1`/`true` for secured sends
    /// - `MEXLINK_REGISTER_ATTEMPTS`: attempt cap, `0` for unbounded
    /// - `MEXLINK_REGISTER_BACKOFF_MS`: initial backoff
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(profile) = std::env::var("MEXLINK_PROFILE_ID") {
            if !profile.trim().is_empty() {
                self.profile_id = profile.trim().to_string();
            }
        }
        self.secure = read_env_bool("MEXLINK_SECURE", self.secure);

        let attempts = read_env_u32(
            "MEXLINK_REGISTER_ATTEMPTS",
            self.retry.max_attempts.unwrap_or(0),
        );
        self.retry.max_attempts = if attempts == 0 { None } else { Some(attempts) };

        let backoff_ms = read_env_u32(
            "MEXLINK_REGISTER_BACKOFF_MS",
            self.retry.initial_backoff.as_millis().min(u32::MAX as u128) as u32,
        );
        self.retry.initial_backoff = Duration::from_millis(backoff_ms as u64);
        if self.retry.max_backoff < self.retry.initial_backoff {
            self.retry.max_backoff = self.retry.initial_backoff;
        }
        self
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim().to_ascii_lowercase();
            match v.as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    log::warn!("Invalid {}='{}', using default {}", name, v, default);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

fn read_env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(v) => match v.trim().parse::<u32>() {
            Ok(n) => n,
            Err(_) => {
                log::warn!("Invalid {}='{}', using default {}", name, v, default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(30), Duration::from_secs(5));
    }

    #[test]
    fn test_unbounded_never_exhausts() {
        let policy = RetryPolicy::unbounded();
        assert!(!policy.exhausted(u32::MAX));
        assert_eq!(policy.backoff(5), Duration::ZERO);
    }

    #[test]
    fn test_bounded_exhausts_at_cap() {
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.profile_id, "/sample/hellomessage");
        assert_eq!(config.role, AgentRole::Provider);
        assert!(!config.secure);
        assert!(!config.duplicate_is_registered);
    }
}
