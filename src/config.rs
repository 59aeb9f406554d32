//! # Configuration Module
//!
//! Loading, validation and atomic persistence of the sectioned TOML
//! configuration file holding the bot token, membership sets, PIN hashes,
//! custom messages and instrument definitions.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::bot::action::{Callback, InstrumentCommand};
use crate::credentials::CredentialStore;
use crate::errors::ConfigError;

// Constants for file locations
pub const DEFAULT_CONFIG_FILE: &str = "IonWatcher.toml";
pub const DEFAULT_LOG_FILE: &str = "IonWatcher.log";
pub const DOWNLOADS_MAIN_DIR: &str = "download";

/// Telegram rejects inline button data longer than this many bytes
pub const MAX_CALLBACK_DATA: usize = 64;

/// Password placeholder meaning "read it from the environment"
pub const ASK_PASSWORD: &str = "ASK";

const FILE_HEADER: &str = "# Configurations file for IonWatcher Bot\n\
# Membership lists and [comm.pins] are rewritten by the bot; edit while it is stopped.\n\n";

static URL_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("scheme pattern is valid"));

/// Telegram connection settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bot token from @BotFather; `TELEGRAM_BOT_TOKEN` takes precedence
    #[serde(default)]
    pub token: String,
}

/// Membership sets and PIN policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommConfig {
    /// Ask for the PIN every X minutes (0 skips PIN checks)
    #[serde(default)]
    pub pin: u32,
    #[serde(default)]
    pub admins: Vec<String>,
    /// Trusted users, admins not repeated
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub queue: Vec<String>,
    #[serde(default)]
    pub blocked: Vec<String>,
    /// username -> SHA-256 hex of the PIN
    #[serde(default)]
    pub pins: BTreeMap<String, String>,
}

/// Optional overrides for messages admins like to customise
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Messages {
    /// Greeting for unknown users on /start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub untick: Option<String>,
    /// Reply to unauthorized commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negate: Option<String>,
}

/// Supported dashboard flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Ion,
}

/// One instrument dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InstrumentKind,
    pub server: String,
    #[serde(default)]
    pub user: String,
    /// Blank for none, `ASK` to read `<ID>_PASSWORD` from the environment
    #[serde(default)]
    pub pass: String,
}

impl InstrumentConfig {
    /// Resolve the password, looking up the environment for `ASK`
    pub fn resolve_password(&self, instrument_id: &str) -> Result<String, ConfigError> {
        if !self.pass.eq_ignore_ascii_case(ASK_PASSWORD) {
            return Ok(self.pass.clone());
        }
        let var = format!("{}_PASSWORD", instrument_id.to_uppercase());
        std::env::var(&var).map_err(|_| {
            ConfigError::Invalid(format!(
                "password for instrument '{}' set to {} but {} is not set",
                instrument_id, ASK_PASSWORD, var
            ))
        })
    }

    /// Download directory for this instrument's images and reports
    pub fn download_dir(&self, instrument_id: &str) -> PathBuf {
        Path::new(DOWNLOADS_MAIN_DIR).join(instrument_id)
    }
}

/// Whole configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub comm: CommConfig,
    #[serde(default)]
    pub messages: Messages,
    #[serde(default, rename = "instrument")]
    pub instruments: BTreeMap<String, InstrumentConfig>,
}

impl BotConfig {
    /// Read, parse and validate the configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Reading configurations file");
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        warn_unknown_keys(content);
        let mut config: BotConfig = toml::from_str(content)?;
        config.normalize()?;
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) -> Result<(), ConfigError> {
        for (id, instrument) in self.instruments.iter_mut() {
            instrument.server = format_server_address(&instrument.server)?;
            info!(instrument = %id, name = %instrument.name, server = %instrument.server, "Equipment config found");
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.comm.admins.iter().all(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid("[comm] admins must list at least one administrator".into()));
        }
        if self.instruments.is_empty() {
            return Err(ConfigError::Invalid("no [instrument.<ID>] section found".into()));
        }
        for (id, instrument) in &self.instruments {
            if id.contains(':') {
                return Err(ConfigError::Invalid(format!("instrument id '{}' must not contain ':'", id)));
            }
            let longest = Callback::Instrument {
                id: id.clone(),
                command: InstrumentCommand::Run(u64::MAX),
            }
            .encode();
            if longest.len() > MAX_CALLBACK_DATA {
                return Err(ConfigError::Invalid(format!(
                    "instrument id '{}' is too long: button data would take {} bytes, Telegram allows {}",
                    id,
                    longest.len(),
                    MAX_CALLBACK_DATA
                )));
            }
            if instrument.name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("instrument '{}' has no name", id)));
            }
        }
        Ok(())
    }

    /// Membership sets and PIN hashes as a credential store
    pub fn credentials(&self) -> CredentialStore {
        CredentialStore::new(
            self.comm.admins.iter().cloned(),
            self.comm.users.iter().cloned(),
            self.comm.queue.iter().cloned(),
            self.comm.blocked.iter().cloned(),
            self.comm.pins.clone(),
        )
    }

    /// Copy of this configuration carrying the given credentials
    pub fn with_credentials(&self, store: &CredentialStore) -> Self {
        let mut config = self.clone();
        config.comm.admins = store.admins().map(str::to_string).collect();
        config.comm.users = store.plain_users().map(str::to_string).collect();
        config.comm.queue = store.queue().map(str::to_string).collect();
        config.comm.blocked = store.blocked().map(str::to_string).collect();
        config.comm.pins = store.pins().clone();
        config
    }

    /// Rewrite the configuration file atomically.
    ///
    /// The content goes to a temporary file next to `path` which then
    /// replaces it, so a crash never leaves a truncated file behind.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let body = toml::to_string_pretty(self)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut temp_file = NamedTempFile::new_in(&dir).map_err(io_err)?;
        temp_file.write_all(FILE_HEADER.as_bytes()).map_err(io_err)?;
        temp_file.write_all(body.as_bytes()).map_err(io_err)?;
        temp_file.as_file().sync_all().map_err(io_err)?;
        temp_file.persist(path).map_err(|e| ConfigError::Persist {
            path: path.to_path_buf(),
            source: e.error,
        })?;

        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }
}

/// Normalise a server address: add `http://` when the scheme is missing and a
/// trailing `/` so API paths can be appended.
pub fn format_server_address(server: &str) -> Result<String, ConfigError> {
    let trimmed = server.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid("instrument server address is empty".into()));
    }
    let mut address = if URL_SCHEME.is_match(trimmed) {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed.trim_start_matches('/'))
    };
    if !address.ends_with('/') {
        address.push('/');
    }
    reqwest::Url::parse(&address)
        .map_err(|e| ConfigError::Invalid(format!("server address '{}' is not valid: {}", server, e)))?;
    Ok(address)
}

/// Keys the bot does not understand are reported but tolerated
fn warn_unknown_keys(content: &str) {
    const KNOWN: &[(&str, &[&str])] = &[
        ("network", &["token"]),
        ("comm", &["pin", "admins", "users", "queue", "blocked", "pins"]),
        ("messages", &["start", "kill", "tick", "untick", "negate"]),
    ];
    let Ok(table) = content.parse::<toml::Table>() else {
        return;
    };
    for (section, value) in &table {
        if section == "instrument" {
            continue;
        }
        match KNOWN.iter().find(|(name, _)| name == section) {
            None => warn!(section = %section, "Configuration section not understood"),
            Some((_, keys)) => {
                if let Some(entries) = value.as_table() {
                    for key in entries.keys().filter(|key| !keys.contains(&key.as_str())) {
                        warn!(section = %section, key = %key, "Configuration data not understood");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
[network]
token = "123:abc"

[comm]
pin = 15
admins = ["bob"]
users = ["alice"]
queue = ["carol"]

[comm.pins]
bob = "03ac674216f3e15c761ee1a5e255f067953623c8b388b4459e13f978d7c846f4"

[messages]
negate = "Nope."

[instrument.INSTRUMENT_01]
name = "Proton"
type = "ion"
server = "ion.example.org"
user = "ionadmin"
pass = "secret"
"#;

    #[test]
    fn test_parse_sample() {
        let config = BotConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.comm.pin, 15);
        assert_eq!(config.messages.negate.as_deref(), Some("Nope."));
        assert_eq!(config.messages.start, None);
        let instrument = &config.instruments["INSTRUMENT_01"];
        assert_eq!(instrument.kind, InstrumentKind::Ion);
        assert_eq!(instrument.server, "http://ion.example.org/");
    }

    #[test]
    fn test_missing_admins_rejected() {
        let content = SAMPLE.replace("admins = [\"bob\"]", "admins = []");
        assert!(matches!(BotConfig::parse(&content), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_instruments_rejected() {
        let content = SAMPLE.split("[instrument.").next().unwrap().to_string();
        assert!(matches!(BotConfig::parse(&content), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_long_instrument_id_rejected() {
        // "Cmd_" + id + ":Run_" + 20 digits must fit in 64 bytes
        let fits = "I".repeat(35);
        let content = SAMPLE.replace("INSTRUMENT_01", &fits);
        assert!(BotConfig::parse(&content).is_ok());

        let too_long = "I".repeat(36);
        let content = SAMPLE.replace("INSTRUMENT_01", &too_long);
        match BotConfig::parse(&content) {
            Err(ConfigError::Invalid(message)) => assert!(message.contains("too long"), "{message}"),
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_format_server_address() {
        assert_eq!(format_server_address("ion.local").unwrap(), "http://ion.local/");
        assert_eq!(format_server_address("https://ion.local").unwrap(), "https://ion.local/");
        assert_eq!(format_server_address("http://10.0.0.5:8080/").unwrap(), "http://10.0.0.5:8080/");
        assert!(format_server_address("  ").is_err());
    }

    #[test]
    fn test_credentials_written_back() {
        let config = BotConfig::parse(SAMPLE).unwrap();
        let mut store = config.credentials();
        store.approve("carol");
        store.set_pin_hash("carol", "feed".to_string());
        let updated = config.with_credentials(&store);
        assert_eq!(updated.comm.admins, vec!["bob"]);
        assert_eq!(updated.comm.users, vec!["alice", "carol"]);
        assert!(updated.comm.queue.is_empty());
        assert_eq!(updated.comm.pins["carol"], "feed");
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("IonWatcher.toml");
        let config = BotConfig::parse(SAMPLE).unwrap();
        config.save(&path).unwrap();

        let reloaded = BotConfig::load(&path).unwrap();
        assert_eq!(reloaded, config);
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# Configurations file for IonWatcher Bot"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = BotConfig::load(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_ask_password_from_environment() {
        let mut instrument = BotConfig::parse(SAMPLE).unwrap().instruments["INSTRUMENT_01"].clone();
        instrument.pass = "ask".to_string();
        assert!(instrument.resolve_password("INSTRUMENT_TEST_MISSING").is_err());
        instrument.pass = "plain".to_string();
        assert_eq!(instrument.resolve_password("INSTRUMENT_01").unwrap(), "plain");
    }
}
