mod client;
mod config;

#[cfg(test)]
pub use client::MockMqttClient;
pub use client::BusEvent;
pub use client::BusEvents;
pub use client::ConnectOptions;
pub use client::LastWill;
pub use client::MqttClient;
pub use client::MqttError;
pub use client::MqttMessage;
pub use client::RumqttcClient;
pub use config::Config as MqttConfig;
