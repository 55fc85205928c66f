//! MQTT topic layout
//!
//! ```text
//! <app_id>/available                          application availability
//! <app_id>/<class>/<name>                     entity state
//! <app_id>/<class>/<name>/set                 entity commands
//! <app_id>/<class>/<name>/available           entity availability
//! ```

use super::entity::Entity;

/// Topic builder for one application id
#[derive(Debug, Clone)]
pub struct Topics {
    app_id: String,
}

impl Topics {
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Topic inbound commands for `entity` arrive on
    pub fn command(&self, entity: &Entity) -> String {
        format!("{}/set", self.state(entity))
    }

    /// Topic the observed state of `entity` is published to
    pub fn state(&self, entity: &Entity) -> String {
        format!("{}/{}/{}", self.app_id, entity.class(), entity.name)
    }

    /// Topic the availability of `entity` is published to
    pub fn availability(&self, entity: &Entity) -> String {
        format!("{}/available", self.state(entity))
    }

    /// Topic carrying the availability of the whole process (and its last will)
    pub fn app_availability(&self) -> String {
        format!("{}/available", self.app_id)
    }
}
