//! # Localization Tests
//!
//! Checks that every message the bot sends resolves in the embedded catalog
//! and that arguments are substituted without isolation marks.

use ionwatcher::localization::LocalizationManager;

#[cfg(test)]
mod tests {
    use super::*;

    const PLAIN_KEYS: &[&str] = &[
        "default-start",
        "default-kill",
        "default-tick",
        "default-untick",
        "default-negate",
        "blocked-notice",
        "no-username",
        "unknown-command",
        "queue-empty",
        "kill-warning",
        "log-missing",
        "untick-idle",
        "menu-admin",
        "menu-choose",
        "menu-pin",
        "button-administration",
        "button-exit",
        "button-back",
        "button-join",
        "button-block",
        "button-start-ticking",
        "button-stop-ticking",
        "button-view-queue",
        "button-download-log",
        "button-kill",
        "button-monitor",
        "pin-choose",
        "pin-enter",
        "pin-not-entering",
        "pin-invalid-digit",
        "pin-confirm",
        "pin-saved",
        "pin-mismatch",
        "pin-verified",
        "pin-locked",
        "run-no-analysis",
        "run-no-library",
        "run-pdf-not-ready",
        "run-at-last-monitoring",
    ];

    #[test]
    fn test_plain_messages_resolve() {
        let manager = LocalizationManager::new();
        for key in PLAIN_KEYS {
            let message = manager.get_message(key, None);
            assert!(!message.starts_with("Missing"), "{key}: {message}");
            assert!(!message.is_empty(), "{key}");
        }
    }

    #[test]
    fn test_arguments_are_not_isolated() {
        let manager = LocalizationManager::new();
        let message = manager.get_message_with_args("goodbye", &[("name", "Alice".into())]);
        assert_eq!(message, "Goodbye, Alice. Type /start to restart.");
        assert!(!message.contains('\u{2068}'));
    }

    #[test]
    fn test_numbers_are_formatted_plainly() {
        let manager = LocalizationManager::new();
        assert_eq!(
            manager.get_message_with_args("monitor-found", &[("count", 12u64.into())]),
            "I have found 12 runs:"
        );
        assert_eq!(
            manager.get_message_with_args("tick-uptime", &[("days", 3i64.into()), ("hms", "01:02:03".into())]),
            "Bot uptime: 3 days 01:02:03"
        );
    }

    #[test]
    fn test_persist_failure_message_carries_error() {
        let manager = LocalizationManager::new();
        let message = manager.get_message_with_args("persist-failed", &[("error", "disk full".into())]);
        assert!(message.contains("(disk full)"));
    }
}
