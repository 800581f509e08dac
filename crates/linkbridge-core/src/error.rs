//! Bridge error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Configuration replica unreadable: {path}")]
    ReplicaCorrupt { path: PathBuf },

    #[error("Both configuration replicas are unusable")]
    ConfigUnavailable,

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    // ─────────────────────────────────────────────────────────────
    // Process Control Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to spawn process: {reason}")]
    ProcessSpawn { reason: String },

    #[error("Process '{name}' still alive after {timeout_ms} ms")]
    KillTimeout { name: String, timeout_ms: u64 },

    #[error("Process '{name}' did not appear within {timeout_ms} ms")]
    StartTimeout { name: String, timeout_ms: u64 },

    #[error("Shell command failed ({code:?}): {command}")]
    Command { command: String, code: Option<i32> },

    // ─────────────────────────────────────────────────────────────
    // Control Socket Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Control socket {path}: {message}")]
    ControlSocket { path: PathBuf, message: String },

    #[error("Control socket request '{command}' timed out")]
    ControlTimeout { command: String },

    #[error("Unexpected control reply to '{command}': {reply}")]
    ControlReply { command: String, reply: String },

    // ─────────────────────────────────────────────────────────────
    // Wire Protocol Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ─────────────────────────────────────────────────────────────
    // Hardware Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Hardware error: {message}")]
    Hardware { message: String },

    // ─────────────────────────────────────────────────────────────
    // Runtime Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Subsystem '{name}' failed: {message}")]
    Subsystem { name: String, message: String },
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn control_socket(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ControlSocket {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn control_reply(command: impl Into<String>, reply: impl Into<String>) -> Self {
        Self::ControlReply {
            command: command.into(),
            reply: reply.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn hardware(message: impl Into<String>) -> Self {
        Self::Hardware {
            message: message.into(),
        }
    }

    pub fn subsystem(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subsystem {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Check if this error leaves the network in a state that only a
    /// device reboot can clean up
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigUnavailable
                | Error::ProcessSpawn { .. }
                | Error::KillTimeout { .. }
                | Error::StartTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::KillTimeout {
            name: "hostapd".into(),
            timeout_ms: 10_000,
        };
        assert_eq!(
            err.to_string(),
            "Process 'hostapd' still alive after 10000 ms"
        );

        let err = Error::control_socket("/var/run/wpa_supplicant/wlan0", "connection refused");
        assert!(err.to_string().contains("/var/run/wpa_supplicant/wlan0"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_process_control_errors_are_fatal() {
        assert!(Error::ConfigUnavailable.is_fatal());
        assert!(Error::StartTimeout {
            name: "wpa_supplicant".into(),
            timeout_ms: 10_000
        }
        .is_fatal());
        assert!(Error::ProcessSpawn {
            reason: "no such file".into()
        }
        .is_fatal());
        assert!(!Error::protocol("bad magic").is_fatal());
    }
}
