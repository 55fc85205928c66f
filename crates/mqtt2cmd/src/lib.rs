pub mod config;
pub mod engine;
pub mod executor;
pub mod mqtt;

pub use config::Config;
pub use config::ConfigError;
pub use config::LogLevel;
pub use engine::Engine;
pub use engine::EngineOptions;
pub use engine::Entity;
pub use executor::CommandExecutor;
pub use executor::ShellExecutor;
pub use mqtt::MqttClient;
pub use mqtt::RumqttcClient;
