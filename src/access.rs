//! # Access Gate Module
//!
//! Decides, before any privileged action runs, whether the acting user may
//! proceed, must be refused, or must first go through the PIN flow.
//!
//! The decision is pure; `bot::dialogue_manager` applies it around actions.

use chrono::{DateTime, Duration, Utc};

use crate::credentials::CredentialStore;
use crate::session::ChatSession;

/// Clearance required to invoke an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clearance {
    Any,
    User,
    Admin,
}

/// Outcome of evaluating one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    /// Insufficient clearance; answer with the configured refusal
    Deny,
    /// Blocked users are refused everything
    DenyBlocked,
    /// PIN checks are on and the user never registered one
    RegisterPin,
    /// The last successful PIN entry is older than the interval
    VerifyPin,
}

/// Clearance and PIN-freshness policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessGate {
    pin_interval: Option<Duration>,
}

impl AccessGate {
    /// `pin_minutes == 0` disables PIN checks
    pub fn new(pin_minutes: u32) -> Self {
        let pin_interval = (pin_minutes > 0).then(|| Duration::minutes(i64::from(pin_minutes)));
        Self { pin_interval }
    }

    /// Judge a request by `username`, whose session carries the PIN freshness
    pub fn evaluate(
        &self,
        store: &CredentialStore,
        username: &str,
        session: &ChatSession,
        level: Clearance,
        now: DateTime<Utc>,
    ) -> Verdict {
        if store.is_blocked(username) {
            return Verdict::DenyBlocked;
        }

        if let Some(interval) = self.pin_interval {
            if store.is_user(username) {
                if store.pin_hash(username).is_none() {
                    return Verdict::RegisterPin;
                }
                if now - session.last_verified_at > interval {
                    return Verdict::VerifyPin;
                }
            }
        }

        let allowed = match level {
            Clearance::Any => true,
            Clearance::User => store.is_user(username),
            Clearance::Admin => store.is_admin(username),
        };
        if allowed {
            Verdict::Allow
        } else {
            Verdict::Deny
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn store() -> CredentialStore {
        let mut pins = BTreeMap::new();
        pins.insert("bob".to_string(), "hash".to_string());
        pins.insert("alice".to_string(), "hash".to_string());
        CredentialStore::new(
            vec!["bob".to_string()],
            vec!["alice".to_string(), "nopin".to_string()],
            vec!["carol".to_string()],
            vec!["mallory".to_string()],
            pins,
        )
    }

    fn session(name: &str, verified_minutes_ago: i64) -> ChatSession {
        let mut session = ChatSession::new(1, 1, name);
        session.last_verified_at = Utc::now() - Duration::minutes(verified_minutes_ago);
        session
    }

    fn check(gate: &AccessGate, store: &CredentialStore, name: &str, minutes_ago: i64, level: Clearance) -> Verdict {
        gate.evaluate(store, name, &session(name, minutes_ago), level, Utc::now())
    }

    #[test]
    fn test_levels_without_pin() {
        let gate = AccessGate::new(0);
        let store = store();
        assert_eq!(check(&gate, &store, "dave", 0, Clearance::Any), Verdict::Allow);
        assert_eq!(check(&gate, &store, "dave", 0, Clearance::User), Verdict::Deny);
        assert_eq!(check(&gate, &store, "carol", 0, Clearance::User), Verdict::Deny);
        assert_eq!(check(&gate, &store, "alice", 0, Clearance::User), Verdict::Allow);
        assert_eq!(check(&gate, &store, "alice", 0, Clearance::Admin), Verdict::Deny);
        assert_eq!(check(&gate, &store, "bob", 0, Clearance::Admin), Verdict::Allow);
        assert_eq!(check(&gate, &store, "bob", 0, Clearance::User), Verdict::Allow);
    }

    #[test]
    fn test_blocked_always_denied() {
        let store = store();
        for gate in [AccessGate::new(0), AccessGate::new(15)] {
            for level in [Clearance::Any, Clearance::User, Clearance::Admin] {
                assert_eq!(check(&gate, &store, "mallory", 0, level), Verdict::DenyBlocked);
            }
        }
    }

    #[test]
    fn test_stale_pin_redirects() {
        let gate = AccessGate::new(15);
        let store = store();
        assert_eq!(check(&gate, &store, "alice", 20, Clearance::User), Verdict::VerifyPin);
        assert_eq!(check(&gate, &store, "alice", 20, Clearance::Any), Verdict::VerifyPin);
        assert_eq!(check(&gate, &store, "alice", 5, Clearance::User), Verdict::Allow);
    }

    #[test]
    fn test_missing_pin_redirects_to_registration() {
        let gate = AccessGate::new(15);
        let store = store();
        assert_eq!(check(&gate, &store, "nopin", 0, Clearance::User), Verdict::RegisterPin);
    }

    #[test]
    fn test_pin_not_applied_to_non_users() {
        let gate = AccessGate::new(15);
        let store = store();
        let fresh = ChatSession::new(1, 1, "dave");
        assert_eq!(gate.evaluate(&store, "dave", &fresh, Clearance::Any, Utc::now()), Verdict::Allow);
        assert_eq!(gate.evaluate(&store, "dave", &fresh, Clearance::User, Utc::now()), Verdict::Deny);
    }

    #[test]
    fn test_judges_the_named_user_not_the_session_owner() {
        let gate = AccessGate::new(0);
        let store = store();
        let admin_session = session("bob", 0);
        assert_eq!(
            gate.evaluate(&store, "mallory", &admin_session, Clearance::Admin, Utc::now()),
            Verdict::DenyBlocked
        );
        assert_eq!(
            gate.evaluate(&store, "alice", &admin_session, Clearance::Admin, Utc::now()),
            Verdict::Deny
        );
    }
}
