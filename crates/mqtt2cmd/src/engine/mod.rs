mod engine;
mod entity;
mod message;
mod state;
mod topics;

pub use engine::Engine;
pub use engine::EngineOptions;
pub use entity::has_placeholder;
pub use entity::render_template;
pub use entity::AvailabilityEncoding;
pub use entity::DisplayCommands;
pub use entity::Entity;
pub use entity::EntityClass;
pub use entity::EntityKind;
pub use entity::StateValue;
pub use entity::SwitchCommands;
pub use message::Command;
pub use message::DispatchError;
pub use message::Verb;
pub use state::RuntimeState;
pub use topics::Topics;
