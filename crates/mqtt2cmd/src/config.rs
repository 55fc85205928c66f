//! Configuration file parsing and structures.
//!
//! mqtt2cmd uses a single TOML file: global settings, `[logging]`, `[mqtt]`,
//! and one `[[switches]]` / `[[displays]]` table per entity.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::engine::has_placeholder;
use crate::engine::AvailabilityEncoding;
use crate::engine::DisplayCommands;
use crate::engine::EngineOptions;
use crate::engine::Entity;
use crate::engine::SwitchCommands;
use crate::mqtt::MqttConfig;

/// Characters that would change the meaning of a topic built from a name
const RESERVED_NAME_CHARS: [char; 3] = ['/', '+', '#'];

fn default_app_id() -> String {
    "mqtt2cmd".to_string()
}

fn default_refresh_period() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    30
}

/// Top-level configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Prefix of every topic
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Seconds between refresh passes
    #[serde(default = "default_refresh_period")]
    pub refresh_period: u64,

    /// Seconds a shell command may run before it is killed
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,

    /// Milliseconds to wait after toggle/SET before re-querying the state
    #[serde(default)]
    pub toggle_settle: u64,

    /// Encoding of the application availability topic
    #[serde(default)]
    pub availability_encoding: AvailabilityEncoding,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub mqtt: MqttConfig,

    #[serde(default)]
    pub switches: Vec<SwitchConfig>,

    #[serde(default)]
    pub displays: Vec<DisplayConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("invalid log level '{}'", s)),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Log to this file instead of stderr
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Per-target levels, e.g. `rumqttc = "warn"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Filter applying `level` by default and `overrides` per target
    pub fn targets(&self) -> Targets {
        self.overrides
            .iter()
            .fold(Targets::new().with_default(self.level), |targets, (target, level)| {
                targets.with_target(target.clone(), *level)
            })
    }
}

/// `[[switches]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchConfig {
    pub name: String,
    pub turn_on: String,
    pub turn_off: String,
    #[serde(default)]
    pub toggle: Option<String>,
    #[serde(default)]
    pub set_value: Option<String>,
    pub get_state: String,

    /// Seconds between state queries; 0 only queries while unknown
    #[serde(default)]
    pub refresh: u64,

    #[serde(default)]
    pub availability_encoding: Option<AvailabilityEncoding>,
}

/// `[[displays]]` entry
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    pub name: String,
    pub set_value: String,
    pub get_value: String,

    /// Seconds between value queries; 0 only queries while unknown
    #[serde(default)]
    pub refresh: u64,

    #[serde(default)]
    pub availability_encoding: Option<AvailabilityEncoding>,
}

impl Config {
    /// Load, complete from the environment and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let mut config: Config = contents.parse()?;
        config
            .mqtt
            .apply_env_fallbacks(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Check every entity, reporting all problems at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        let names = self
            .switches
            .iter()
            .map(|s| ("switch", s.name.as_str()))
            .chain(self.displays.iter().map(|d| ("display", d.name.as_str())));
        for (kind, name) in names {
            if name.is_empty() {
                problems.push(format!("{} with an empty name", kind));
            } else if name.contains(RESERVED_NAME_CHARS) {
                problems.push(format!(
                    "{} '{}': name must not contain '/', '+' or '#'",
                    kind, name
                ));
            }
            if !seen.insert(name) {
                problems.push(format!("{} '{}': duplicate name", kind, name));
            }
        }

        for switch in &self.switches {
            let commands = [
                ("turn_on", Some(&switch.turn_on)),
                ("turn_off", Some(&switch.turn_off)),
                ("toggle", switch.toggle.as_ref()),
                ("set_value", switch.set_value.as_ref()),
                ("get_state", Some(&switch.get_state)),
            ];
            for (field, command) in commands {
                if command.is_some_and(|c| c.trim().is_empty()) {
                    problems.push(format!("switch '{}': {} is empty", switch.name, field));
                }
            }
            if let Some(template) = &switch.set_value {
                if !template.trim().is_empty() && !has_placeholder(template) {
                    problems.push(format!(
                        "switch '{}': set_value has no value placeholder",
                        switch.name
                    ));
                }
            }
        }

        for display in &self.displays {
            if display.get_value.trim().is_empty() {
                problems.push(format!("display '{}': get_value is empty", display.name));
            }
            if !has_placeholder(&display.set_value) {
                problems.push(format!(
                    "display '{}': set_value has no value placeholder",
                    display.name
                ));
            }
        }

        if let Err(e) = self.mqtt.broker_address() {
            problems.push(format!("mqtt: {}", e));
        }
        if self.refresh_period == 0 {
            problems.push("refresh_period must be greater than zero".to_string());
        }
        if self.command_timeout == 0 {
            problems.push("command_timeout must be greater than zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }

    /// The entity registry, switches first, in file order
    pub fn entities(&self) -> Vec<Entity> {
        let switches = self.switches.iter().map(|s| {
            let entity = Entity::switch(
                s.name.clone(),
                Duration::from_secs(s.refresh),
                SwitchCommands {
                    turn_on: s.turn_on.clone(),
                    turn_off: s.turn_off.clone(),
                    toggle: s.toggle.clone(),
                    set_value: s.set_value.clone(),
                    get_state: s.get_state.clone(),
                },
            );
            match s.availability_encoding {
                Some(encoding) => entity.with_availability(encoding),
                None => entity,
            }
        });

        let displays = self.displays.iter().map(|d| {
            let entity = Entity::display(
                d.name.clone(),
                Duration::from_secs(d.refresh),
                DisplayCommands {
                    set_value: d.set_value.clone(),
                    get_value: d.get_value.clone(),
                },
            );
            match d.availability_encoding {
                Some(encoding) => entity.with_availability(encoding),
                None => entity,
            }
        });

        switches.chain(displays).collect()
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            app_availability: self.availability_encoding,
            settle_delay: Duration::from_millis(self.toggle_settle),
        }
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::engine::EntityKind;

    const FULL: &str = r#"
        app_id = "home"
        refresh_period = 5
        toggle_settle = 250

        [logging]
        level = "debug"

        [logging.overrides]
        rumqttc = "warn"

        [mqtt]
        broker = "tcp://localhost:1883"
        username = "mqtt2cmd"

        [[switches]]
        name = "lamp1"
        turn_on = "lamp on"
        turn_off = "lamp off"
        toggle = "lamp toggle"
        get_state = "lamp query"
        refresh = 60

        [[displays]]
        name = "monitor"
        set_value = "ddcutil setvcp 0x60 {value}"
        get_value = "ddcutil getvcp 0x60"
        availability_encoding = "online-offline"
    "#;

    fn problems(toml: &str) -> Vec<String> {
        let config: Config = toml.parse().unwrap();
        match config.validate() {
            Err(ConfigError::Validation(problems)) => problems,
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = "".parse().unwrap();

        assert_eq!(config.app_id, "mqtt2cmd");
        assert_eq!(config.refresh_period(), Duration::from_secs(10));
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.mqtt.port, 1883);
        assert!(config.entities().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let config: Config = FULL.parse().unwrap();
        config.validate().unwrap();

        assert_eq!(config.app_id, "home");
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.overrides["rumqttc"], LogLevel::Warn);
        assert_eq!(config.mqtt.username.as_deref(), Some("mqtt2cmd"));
        assert_eq!(
            config.engine_options().settle_delay,
            Duration::from_millis(250)
        );

        let entities = config.entities();
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].name, "lamp1");
        assert_eq!(entities[0].refresh_interval, Duration::from_secs(60));
        assert_eq!(entities[0].availability, AvailabilityEncoding::OnlineOffline);
        assert!(matches!(
            &entities[0].kind,
            EntityKind::Switch(SwitchCommands { toggle: Some(t), set_value: None, .. }) if t == "lamp toggle"
        ));
        assert_eq!(entities[1].name, "monitor");
        assert_eq!(entities[1].refresh_interval, Duration::ZERO);
        assert_eq!(entities[1].availability, AvailabilityEncoding::OnlineOffline);
    }

    #[test]
    fn test_example_config_is_valid() {
        let config: Config = include_str!("../mqtt2cmd.example.toml").parse().unwrap();
        config.validate().unwrap();

        let entities = config.entities();
        assert_eq!(entities.len(), 3);
        assert_eq!(entities[1].availability, AvailabilityEncoding::Numeric);
        assert_eq!(entities[2].availability, AvailabilityEncoding::Numeric);
    }

    #[test]
    fn test_display_defaults_to_numeric_availability() {
        let config: Config = r#"
            [[displays]]
            name = "monitor"
            set_value = "setvcp %s"
            get_value = "getvcp"
        "#
        .parse()
        .unwrap();

        assert_eq!(
            config.entities()[0].availability,
            AvailabilityEncoding::Numeric
        );
    }

    #[test]
    fn test_validate_names() {
        let problems = problems(
            r#"
            [[switches]]
            name = "lamp/1"
            turn_on = "a"
            turn_off = "b"
            get_state = "c"

            [[switches]]
            name = ""
            turn_on = "a"
            turn_off = "b"
            get_state = "c"

            [[displays]]
            name = "lamp/1"
            set_value = "set {value}"
            get_value = "get"
        "#,
        );

        assert_eq!(
            problems,
            vec![
                "switch 'lamp/1': name must not contain '/', '+' or '#'",
                "switch with an empty name",
                "display 'lamp/1': name must not contain '/', '+' or '#'",
                "display 'lamp/1': duplicate name",
            ]
        );
    }

    #[test]
    fn test_validate_commands_and_templates() {
        let problems = problems(
            r#"
            [[switches]]
            name = "fan"
            turn_on = " "
            turn_off = "fan off"
            set_value = "fan speed"
            get_state = "fan query"

            [[displays]]
            name = "monitor"
            set_value = "ddcutil setvcp 0x60"
            get_value = "ddcutil getvcp 0x60"
        "#,
        );

        assert_eq!(
            problems,
            vec![
                "switch 'fan': turn_on is empty",
                "switch 'fan': set_value has no value placeholder",
                "display 'monitor': set_value has no value placeholder",
            ]
        );
    }

    #[test]
    fn test_validate_zero_periods() {
        let problems = problems(
            r#"
            refresh_period = 0
            command_timeout = 0
        "#,
        );

        assert_eq!(
            problems,
            vec![
                "refresh_period must be greater than zero",
                "command_timeout must be greater than zero",
            ]
        );
    }

    #[test]
    fn test_validate_broker() {
        let problems = problems(
            r#"
            [mqtt]
            broker = "ssl://broker.lan:8883"
        "#,
        );

        assert_eq!(problems, vec!["mqtt: unsupported broker scheme 'ssl'"]);
    }

    #[test]
    fn test_validation_error_lists_every_problem() {
        let err = ConfigError::Validation(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(
            err.to_string(),
            "Invalid configuration:\n  - first\n  - second"
        );
    }

    #[test]
    fn test_unknown_availability_encoding_is_rejected() {
        let result: Result<Config, _> = r#"availability_encoding = "yes-no""#.parse();
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.entities().len(), 2);
    }

    #[test]
    fn test_from_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Io(p, _) if p == path));
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_logging_targets() {
        let config: Config = FULL.parse().unwrap();
        let targets = config.logging.targets();

        assert!(targets.would_enable("mqtt2cmd::engine", &tracing::Level::DEBUG));
        assert!(!targets.would_enable("rumqttc::eventloop", &tracing::Level::INFO));
        assert!(targets.would_enable("rumqttc::eventloop", &tracing::Level::WARN));
    }
}
