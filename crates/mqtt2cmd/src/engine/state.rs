use tokio::time::Instant;

use super::entity::Entity;
use super::entity::StateValue;

/// Last published view of one entity.
///
/// `None` means nothing has been published yet, so the next observation is
/// published unconditionally.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeState {
    /// State value last published to the state topic
    pub state: Option<StateValue>,

    /// Availability last published to the availability topic
    pub available: Option<bool>,

    /// When the state was last queried, successfully or not
    pub last_refresh: Option<Instant>,
}

impl RuntimeState {
    /// Whether a scheduled refresh should query `entity` at `now`
    pub fn refresh_due(&self, entity: &Entity, now: Instant) -> bool {
        if self.state.is_none() || self.available.is_none() {
            return true;
        }
        if entity.refresh_interval.is_zero() {
            return false;
        }
        match self.last_refresh {
            Some(last) => now >= last + entity.refresh_interval,
            None => true,
        }
    }

    /// Whether publishing `state` would change what subscribers see
    pub fn state_changed(&self, state: &StateValue) -> bool {
        self.state.as_ref() != Some(state)
    }

    /// Whether publishing `available` would change what subscribers see
    pub fn availability_changed(&self, available: bool) -> bool {
        self.available != Some(available)
    }
}
