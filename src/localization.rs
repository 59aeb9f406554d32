use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use std::sync::LazyLock;
use tracing::error;
use unic_langid::LanguageIdentifier;

/// English catalog compiled into the binary
const EN_MAIN: &str = include_str!("../locales/en/main.ftl");

/// Message catalog for the bot's built-in texts
pub struct LocalizationManager {
    bundle: FluentBundle<FluentResource>,
}

impl LocalizationManager {
    /// Create a new localization manager from the embedded catalog
    pub fn new() -> Self {
        let locale: LanguageIdentifier = "en".parse().unwrap_or_default();
        let mut bundle = FluentBundle::new_concurrent(vec![locale]);
        // Telegram renders the isolation marks as stray characters
        bundle.set_use_isolating(false);

        let resource = match FluentResource::try_new(EN_MAIN.to_string()) {
            Ok(resource) => resource,
            Err((resource, errors)) => {
                error!(?errors, "Errors while parsing the message catalog");
                resource
            }
        };
        if let Err(errors) = bundle.add_resource(resource) {
            error!(?errors, "Errors while loading the message catalog");
        }

        Self { bundle }
    }

    /// Get a localized message
    pub fn get_message(&self, key: &str, args: Option<&FluentArgs>) -> String {
        let msg = match self.bundle.get_message(key) {
            Some(msg) => msg,
            None => return format!("Missing translation: {}", key),
        };

        let pattern = match msg.value() {
            Some(pattern) => pattern,
            None => return format!("Missing value for key: {}", key),
        };

        let mut errors = vec![];
        let value = self.bundle.format_pattern(pattern, args, &mut errors);
        if !errors.is_empty() {
            error!(key, ?errors, "Errors while formatting message");
        }
        value.into_owned()
    }

    /// Get a localized message with named arguments
    pub fn get_message_with_args(&self, key: &str, args: &[(&str, FluentValue)]) -> String {
        let mut fluent_args = FluentArgs::new();
        for (name, value) in args {
            fluent_args.set(*name, value.clone());
        }
        self.get_message(key, Some(&fluent_args))
    }
}

impl Default for LocalizationManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Global localization instance; the catalog is immutable
static LOCALIZATION_MANAGER: LazyLock<LocalizationManager> = LazyLock::new(LocalizationManager::new);

/// Convenience function to get a localized message
pub fn t(key: &str) -> String {
    LOCALIZATION_MANAGER.get_message(key, None)
}

/// Convenience function to get a localized message with arguments
pub fn t_args(key: &str, args: &[(&str, FluentValue)]) -> String {
    LOCALIZATION_MANAGER.get_message_with_args(key, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_message_existing_key() {
        assert_eq!(t("pin-choose"), "Please choose a 4-digit PIN.");
    }

    #[test]
    fn test_get_message_nonexistent_key() {
        assert!(t("nonexistent-key").starts_with("Missing translation:"));
    }

    #[test]
    fn test_get_message_with_args() {
        let message = t_args("queue-added", &[("username", "alice".into())]);
        assert_eq!(message, "You have been added to the queue, alice.");
    }

    #[test]
    fn test_ordinal_attempts() {
        let first = t_args("pin-wrong", &[("attempt", 1u8.into())]);
        let second = t_args("pin-wrong", &[("attempt", 2u8.into())]);
        assert!(first.contains("This was your first try."));
        assert!(second.contains("This was your second try."));
        assert!(first.contains('\n'));
    }

    #[test]
    fn test_multiline_listing() {
        let message = t_args("queue-listing", &[("names", "@carol\n@dave".into())]);
        assert_eq!(message, "The following users are in the queue:\n@carol\n@dave");
    }

    #[test]
    fn test_bracketed_message() {
        let message = t_args("run-no-image", &[("description", "bead density".into())]);
        assert_eq!(message, "[no bead density image]");
    }
}
