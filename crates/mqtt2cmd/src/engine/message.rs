//! Inbound command messages
//!
//! Commands arrive on an entity's command topic as JSON:
//! `{"command": "ON" | "OFF" | "toggle" | "SET", "value": "<string>"}`.
//! Bus messages are untrusted input; every problem is reported as a
//! [`DispatchError`] for the caller to log, never a panic.

use std::str::FromStr;

use serde::Deserialize;
use strum::Display;
use strum::EnumString;

use super::entity::EntityClass;

/// Command verbs, matched case-insensitively
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Verb {
    #[strum(serialize = "ON")]
    On,
    #[strum(serialize = "OFF")]
    Off,
    #[strum(serialize = "toggle")]
    Toggle,
    #[strum(serialize = "SET")]
    Set,
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    On,
    Off,
    Toggle,
    Set(Option<String>),
}

impl Command {
    pub fn verb(&self) -> Verb {
        match self {
            Command::On => Verb::On,
            Command::Off => Verb::Off,
            Command::Toggle => Verb::Toggle,
            Command::Set(_) => Verb::Set,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommandPayload {
    command: String,
    #[serde(default)]
    value: Option<String>,
}

/// Reasons an inbound message is dropped
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid JSON payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid command: {0:?}")]
    InvalidCommand(String),

    #[error("{verb} is not supported by {class}")]
    Unsupported { verb: Verb, class: EntityClass },

    #[error("{verb} is not configured for this entity")]
    NotConfigured { verb: Verb },

    #[error("{verb} requires a value")]
    MissingValue { verb: Verb },

    #[error("invalid value {value:?}: {reason}")]
    InvalidValue { value: String, reason: String },
}

impl Command {
    /// Parse a raw command payload
    pub fn parse(payload: &[u8]) -> Result<Self, DispatchError> {
        let payload: CommandPayload = serde_json::from_slice(payload)?;
        let verb = Verb::from_str(&payload.command)
            .map_err(|_| DispatchError::InvalidCommand(payload.command.clone()))?;

        Ok(match verb {
            Verb::On => Command::On,
            Verb::Off => Command::Off,
            Verb::Toggle => Command::Toggle,
            Verb::Set => Command::Set(payload.value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse(br#"{"command":"ON"}"#).unwrap(), Command::On);
        assert_eq!(Command::parse(br#"{"command":"OFF"}"#).unwrap(), Command::Off);
        assert_eq!(
            Command::parse(br#"{"command":"toggle"}"#).unwrap(),
            Command::Toggle
        );
        assert_eq!(
            Command::parse(br#"{"command":"SET","value":"0x11"}"#).unwrap(),
            Command::Set(Some("0x11".to_string()))
        );
        assert_eq!(
            Command::parse(br#"{"command":"SET"}"#).unwrap(),
            Command::Set(None)
        );
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(Command::parse(br#"{"command":"on"}"#).unwrap(), Command::On);
        assert_eq!(
            Command::parse(br#"{"command":"TOGGLE"}"#).unwrap(),
            Command::Toggle
        );
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let command = Command::parse(br#"{"switch":"lamp1","command":"OFF"}"#).unwrap();
        assert_eq!(command, Command::Off);
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            Command::parse(b"not json"),
            Err(DispatchError::Malformed(_))
        ));
        assert!(matches!(
            Command::parse(br#"{"value":"1"}"#),
            Err(DispatchError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_unknown_command() {
        let err = Command::parse(br#"{"command":"explode"}"#).unwrap_err();
        assert_eq!(err.to_string(), "invalid command: \"explode\"");
    }

    #[test]
    fn test_verb_display() {
        assert_eq!(Command::Toggle.verb().to_string(), "toggle");
        assert_eq!(Command::Set(None).verb().to_string(), "SET");
    }
}
