//! Entity abstraction for mqtt2cmd
//!
//! An entity is a named unit controlled through shell commands. Switches are
//! plain on/off devices; displays expose a single VCP value (typically the
//! input source) that can be read and written.

use std::time::Duration;

use serde::Deserialize;
use strum::Display;

use crate::executor::CommandError;
use crate::executor::CommandExecutor;

/// Payload published for a switch that is on
pub const ON_PAYLOAD: &str = "ON";

/// Payload published for a switch that is off
pub const OFF_PAYLOAD: &str = "OFF";

/// Placeholders accepted in `set_value` templates. The first one found is
/// replaced by the value.
const PLACEHOLDERS: [&str; 3] = ["{value}", "%s", "%d"];

/// Topic segment an entity lives under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EntityClass {
    #[strum(serialize = "switches")]
    Switch,
    #[strum(serialize = "displays")]
    Display,
}

/// Wire encoding of availability payloads
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AvailabilityEncoding {
    /// `"online"` / `"offline"`
    #[default]
    OnlineOffline,
    /// `"1"` / `"0"`
    Numeric,
}

impl AvailabilityEncoding {
    pub fn payload(self, available: bool) -> &'static str {
        match (self, available) {
            (AvailabilityEncoding::OnlineOffline, true) => "online",
            (AvailabilityEncoding::OnlineOffline, false) => "offline",
            (AvailabilityEncoding::Numeric, true) => "1",
            (AvailabilityEncoding::Numeric, false) => "0",
        }
    }
}

/// Observed state of an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateValue {
    Switch(bool),
    Display(String),
}

impl StateValue {
    pub fn payload(&self) -> &str {
        match self {
            StateValue::Switch(true) => ON_PAYLOAD,
            StateValue::Switch(false) => OFF_PAYLOAD,
            StateValue::Display(value) => value,
        }
    }
}

/// Commands controlling a switch
#[derive(Debug, Clone)]
pub struct SwitchCommands {
    pub turn_on: String,
    pub turn_off: String,
    pub toggle: Option<String>,
    /// Template consuming one integer value
    pub set_value: Option<String>,
    /// Exit status 0 means on, exit status 1 means off
    pub get_state: String,
}

/// VCP command pair controlling a display
#[derive(Debug, Clone)]
pub struct DisplayCommands {
    /// Template consuming one raw string value
    pub set_value: String,
    pub get_value: String,
}

#[derive(Debug, Clone)]
pub enum EntityKind {
    Switch(SwitchCommands),
    Display(DisplayCommands),
}

/// A configured, immutable entity
#[derive(Debug, Clone)]
pub struct Entity {
    /// Name used verbatim in topics
    pub name: String,

    /// How often to re-query the state; zero only queries while unknown
    pub refresh_interval: Duration,

    pub availability: AvailabilityEncoding,

    pub kind: EntityKind,
}

impl Entity {
    /// Create a switch with the default availability encoding for switches
    pub fn switch(
        name: impl Into<String>,
        refresh_interval: Duration,
        commands: SwitchCommands,
    ) -> Self {
        Self {
            name: name.into(),
            refresh_interval,
            availability: AvailabilityEncoding::OnlineOffline,
            kind: EntityKind::Switch(commands),
        }
    }

    /// Create a display with the default availability encoding for displays
    pub fn display(
        name: impl Into<String>,
        refresh_interval: Duration,
        commands: DisplayCommands,
    ) -> Self {
        Self {
            name: name.into(),
            refresh_interval,
            availability: AvailabilityEncoding::Numeric,
            kind: EntityKind::Display(commands),
        }
    }

    pub fn with_availability(mut self, availability: AvailabilityEncoding) -> Self {
        self.availability = availability;
        self
    }

    pub fn class(&self) -> EntityClass {
        match self.kind {
            EntityKind::Switch(_) => EntityClass::Switch,
            EntityKind::Display(_) => EntityClass::Display,
        }
    }

    /// Query the current state of the entity
    pub async fn poll(&self, executor: &dyn CommandExecutor) -> Result<StateValue, CommandError> {
        match &self.kind {
            EntityKind::Switch(commands) => match executor.run(&commands.get_state).await {
                Ok(_) => Ok(StateValue::Switch(true)),
                Err(e) if e.exit_code() == Some(1) => Ok(StateValue::Switch(false)),
                Err(e) => Err(e),
            },
            EntityKind::Display(commands) => {
                let output = executor.run(&commands.get_value).await?;
                Ok(StateValue::Display(output.trim_end().to_string()))
            }
        }
    }
}

/// Substitute `value` for the first placeholder in `template`
///
/// A template without a placeholder is returned unchanged.
pub fn render_template(template: &str, value: &str) -> String {
    let first = PLACEHOLDERS
        .iter()
        .filter_map(|p| template.find(p).map(|idx| (idx, p.len())))
        .min_by_key(|(idx, _)| *idx);

    match first {
        Some((idx, len)) => {
            let mut rendered = String::with_capacity(template.len() + value.len());
            rendered.push_str(&template[..idx]);
            rendered.push_str(value);
            rendered.push_str(&template[idx + len..]);
            rendered
        }
        None => template.to_string(),
    }
}

/// Whether `template` contains a value placeholder
pub fn has_placeholder(template: &str) -> bool {
    PLACEHOLDERS.iter().any(|p| template.contains(p))
}
