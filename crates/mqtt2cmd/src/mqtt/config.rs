use serde::Deserialize;

/// Broker used when neither the configuration nor the environment names one
pub const DEFAULT_BROKER: &str = "tcp://localhost:1883";

/// Environment variable consulted when no broker is configured
pub const BROKER_ENV: &str = "MQTT_BROKER";

/// Environment variable consulted when no username is configured
pub const USERNAME_ENV: &str = "MQTT_USERNAME";

/// Environment variable consulted when no password is configured
pub const PASSWORD_ENV: &str = "MQTT_PASSWORD";

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

/// Configuration for the MQTT connection
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// MQTT broker: `host`, `host:port` or `tcp://host:port`
    #[serde(default)]
    pub broker: String,

    /// MQTT broker port, used when `broker` does not carry one
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional username for authentication
    pub username: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,

    /// Seconds to wait for the broker to accept the initial connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: default_port(),
            username: None,
            password: None,
            keep_alive: default_keep_alive(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

impl Config {
    /// Fill unset connection settings from the environment
    pub fn apply_env_fallbacks(&mut self, env: impl Fn(&str) -> Option<String>) {
        if self.broker.is_empty() {
            if let Some(broker) = env(BROKER_ENV) {
                self.broker = broker;
            }
        }
        if self.username.as_deref().is_none_or(str::is_empty) {
            self.username = env(USERNAME_ENV).or(self.username.take());
        }
        if self.password.as_deref().is_none_or(str::is_empty) {
            self.password = env(PASSWORD_ENV).or(self.password.take());
        }
    }

    /// Split `broker` into host and port, defaulting to [`DEFAULT_BROKER`]
    pub fn broker_address(&self) -> Result<(String, u16), String> {
        let broker = match self.broker.trim() {
            "" => DEFAULT_BROKER,
            broker => broker,
        };
        let address = match broker.split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some((scheme, _)) => return Err(format!("unsupported broker scheme '{}'", scheme)),
            None => broker,
        };

        let (host, port) = match address.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| format!("invalid broker port '{}': {}", port, e))?;
                (host, port)
            }
            None => (address, self.port),
        };

        if host.is_empty() {
            return Err(format!("missing host in broker '{}'", broker));
        }
        Ok((host.to_string(), port))
    }

    /// Username and password, if both are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn broker(broker: &str) -> Config {
        Config {
            broker: broker.to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_broker_address_forms() {
        assert_eq!(
            broker("localhost").broker_address().unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert_eq!(
            broker("mqtt.lan:1884").broker_address().unwrap(),
            ("mqtt.lan".to_string(), 1884)
        );
        assert_eq!(
            broker("tcp://10.0.0.2:1885").broker_address().unwrap(),
            ("10.0.0.2".to_string(), 1885)
        );
    }

    #[test]
    fn test_broker_address_defaults_to_localhost() {
        assert_eq!(
            Config::default().broker_address().unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert_eq!(
            broker("  ").broker_address().unwrap(),
            ("localhost".to_string(), 1883)
        );
    }

    #[test]
    fn test_broker_address_errors() {
        assert!(broker("tcp://:1883").broker_address().is_err());
        assert!(broker("ssl://host:8883").broker_address().is_err());
        assert!(broker("tcp://host:http").broker_address().is_err());
    }

    #[test]
    fn test_env_fallbacks_fill_missing_values() {
        let env: HashMap<&str, &str> = [
            (BROKER_ENV, "tcp://env-broker:1883"),
            (USERNAME_ENV, "env-user"),
            (PASSWORD_ENV, "env-pass"),
        ]
        .into_iter()
        .collect();

        let mut config = Config {
            username: Some(String::new()),
            ..Config::default()
        };
        config.apply_env_fallbacks(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.broker, "tcp://env-broker:1883");
        assert_eq!(config.credentials(), Some(("env-user", "env-pass")));
    }

    #[test]
    fn test_env_fallbacks_keep_configured_values() {
        let mut config = Config {
            broker: "localhost".to_string(),
            username: Some("file-user".to_string()),
            password: None,
            ..Config::default()
        };
        config.apply_env_fallbacks(|_| None);

        assert_eq!(config.broker, "localhost");
        assert_eq!(config.username.as_deref(), Some("file-user"));
        assert_eq!(config.credentials(), None);
    }
}
