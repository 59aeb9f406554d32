//! # Error Types Module
//!
//! Structured error types for configuration persistence and dashboard access.
//! Application-level code wraps these in `anyhow` with added context.

use std::path::PathBuf;

/// Errors raised while loading, validating or saving the configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Reading or writing the file failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for the expected layout
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// The in-memory configuration could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// The file parsed but its content is unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    /// The temporary file could not replace the target
    #[error("Could not replace {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by an instrument dashboard client
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// The server could not be reached or the request failed in transit
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),
    /// The server answered with a non-success status
    #[error("Server answered with status {0}")]
    Status(u16),
    /// The response body did not match the expected JSON shape
    #[error("Decode error: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_formatting() {
        let invalid = ConfigError::Invalid("no admins".to_string());
        assert_eq!(format!("{}", invalid), "Invalid configuration: no admins");

        let status = DashboardError::Status(401);
        assert_eq!(format!("{}", status), "Server answered with status 401");
    }
}
