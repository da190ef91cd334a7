use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::MAX_OTP_TTL_SECS;

pub const OTP_MIN: u32 = 100_000;
pub const OTP_MAX: u32 = 999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OtpError {
    #[error("No OTP found for this email.")]
    NotFound,
    #[error("OTP expired. Please request a new one.")]
    Expired,
    #[error("Invalid OTP.")]
    Mismatch,
}

impl OtpError {
    pub fn code(self) -> &'static str {
        match self {
            OtpError::NotFound => "ERR_OTP_NOT_FOUND",
            OtpError::Expired => "ERR_OTP_EXPIRED",
            OtpError::Mismatch => "ERR_OTP_MISMATCH",
        }
    }

    pub fn outcome(self) -> &'static str {
        match self {
            OtpError::NotFound => "not_found",
            OtpError::Expired => "expired",
            OtpError::Mismatch => "mismatch",
        }
    }
}

struct PendingCode {
    code: String,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct OtpRegistry {
    inner: Arc<Mutex<HashMap<String, PendingCode>>>,
    ttl: Duration,
}

impl OtpRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            ttl: ttl.min(Duration::from_secs(MAX_OTP_TTL_SECS)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mints a fresh code for `contact`, replacing any pending one.
    pub fn issue(&self, contact: &str) -> String {
        let code = rand::rng().random_range(OTP_MIN..=OTP_MAX).to_string();
        let now = Instant::now();

        let mut inner = self.lock();
        inner.retain(|_, pending| pending.expires_at > now);
        inner.insert(
            contact.to_string(),
            PendingCode {
                code: code.clone(),
                expires_at: now + self.ttl,
            },
        );

        code
    }

    /// Consumes the pending code on an exact match. A wrong guess leaves it in place.
    pub fn verify(&self, contact: &str, candidate: &str) -> Result<(), OtpError> {
        let now = Instant::now();
        let mut inner = self.lock();

        let Some(pending) = inner.get(contact) else {
            return Err(OtpError::NotFound);
        };

        if now > pending.expires_at {
            inner.remove(contact);
            return Err(OtpError::Expired);
        }

        if pending.code != candidate.trim() {
            return Err(OtpError::Mismatch);
        }

        inner.remove(contact);
        Ok(())
    }

    /// Withdraws `code` for `contact` unless it has since been replaced or consumed.
    pub fn revoke(&self, contact: &str, code: &str) -> bool {
        let mut inner = self.lock();
        if inner.get(contact).is_some_and(|pending| pending.code == code) {
            inner.remove(contact);
            return true;
        }
        false
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCode>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn issued_codes_are_six_digits_without_leading_zero() {
        let registry = OtpRegistry::new(Duration::from_secs(60));
        for _ in 0..200 {
            let code = registry.issue("a@example.com");
            assert_eq!(code.len(), 6);
            assert!(!code.starts_with('0'));
            let value: u32 = code.parse().expect("code is numeric");
            assert!((OTP_MIN..=OTP_MAX).contains(&value));
        }
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn oversized_ttl_is_capped_instead_of_overflowing() {
        let registry = OtpRegistry::new(Duration::MAX);
        assert_eq!(registry.ttl(), Duration::from_secs(MAX_OTP_TTL_SECS));

        let code = registry.issue("a@example.com");
        assert_eq!(registry.verify("a@example.com", &code), Ok(()));
    }

    #[test]
    fn code_is_single_use() {
        let registry = OtpRegistry::new(Duration::from_secs(60));
        let code = registry.issue("a@example.com");
        assert_eq!(registry.verify("a@example.com", &code), Ok(()));
        assert_eq!(
            registry.verify("a@example.com", &code),
            Err(OtpError::NotFound)
        );
    }

    #[test]
    fn mismatch_keeps_the_pending_code() {
        let registry = OtpRegistry::new(Duration::from_secs(60));
        let code = registry.issue("a@example.com");
        let wrong = if code == "123456" { "654321" } else { "123456" };

        assert_eq!(
            registry.verify("a@example.com", wrong),
            Err(OtpError::Mismatch)
        );
        assert_eq!(registry.verify("a@example.com", &code), Ok(()));
    }

    #[test]
    fn reissue_replaces_the_previous_code() {
        let registry = OtpRegistry::new(Duration::from_secs(60));
        let first = registry.issue("a@example.com");
        let mut second = registry.issue("a@example.com");
        while second == first {
            second = registry.issue("a@example.com");
        }

        assert_eq!(
            registry.verify("a@example.com", &first),
            Err(OtpError::Mismatch)
        );
        assert_eq!(registry.verify("a@example.com", &second), Ok(()));
    }

    #[test]
    fn expired_code_is_reported_then_evicted() {
        let registry = OtpRegistry::new(Duration::from_millis(5));
        let code = registry.issue("a@example.com");
        thread::sleep(Duration::from_millis(20));

        assert_eq!(
            registry.verify("a@example.com", &code),
            Err(OtpError::Expired)
        );
        assert_eq!(
            registry.verify("a@example.com", &code),
            Err(OtpError::NotFound)
        );
    }

    #[test]
    fn issue_evicts_other_expired_entries() {
        let registry = OtpRegistry::new(Duration::from_millis(5));
        registry.issue("stale@example.com");
        thread::sleep(Duration::from_millis(20));
        registry.issue("fresh@example.com");
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn revoke_only_removes_the_matching_code() {
        let registry = OtpRegistry::new(Duration::from_secs(60));
        let code = registry.issue("a@example.com");
        let other = if code == "111111" { "222222" } else { "111111" };

        assert!(!registry.revoke("a@example.com", other));
        assert_eq!(registry.pending_count(), 1);
        assert!(registry.revoke("a@example.com", &code));
        assert_eq!(
            registry.verify("a@example.com", &code),
            Err(OtpError::NotFound)
        );
    }

    #[test]
    fn concurrent_verification_consumes_once() {
        let registry = OtpRegistry::new(Duration::from_secs(60));
        let code = registry.issue("a@example.com");

        let handles = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let code = code.clone();
                thread::spawn(move || registry.verify("a@example.com", &code).is_ok())
            })
            .collect::<Vec<_>>();

        let successes = handles
            .into_iter()
            .map(|h| h.join().expect("thread should join"))
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }
}
