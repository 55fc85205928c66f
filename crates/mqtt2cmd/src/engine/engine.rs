use std::num::ParseIntError;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::entity::render_template;
use super::entity::AvailabilityEncoding;
use super::entity::Entity;
use super::entity::EntityKind;
use super::entity::StateValue;
use super::message::Command;
use super::message::DispatchError;
use super::message::Verb;
use super::state::RuntimeState;
use super::topics::Topics;
use crate::executor::CommandExecutor;
use crate::mqtt::BusEvent;
use crate::mqtt::BusEvents;
use crate::mqtt::ConnectOptions;
use crate::mqtt::LastWill;
use crate::mqtt::MqttClient;
use crate::mqtt::MqttError;
use crate::mqtt::MqttMessage;

/// Tunables that are not part of any single entity
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Encoding of the application availability topic and last will
    pub app_availability: AvailabilityEncoding,

    /// Pause between a toggle/SET command and the state query confirming it
    pub settle_delay: Duration,
}

/// An entity with its topics and the last state published for it
struct TrackedEntity {
    entity: Entity,
    command_topic: String,
    state_topic: String,
    availability_topic: String,

    /// Held for a whole poll or command, so refresh and dispatch never
    /// interleave on one entity
    runtime: Mutex<RuntimeState>,
}

/// mqtt2cmd engine
///
/// Keeps the bus in sync with the configured entities: polls their state,
/// publishes changes (retained, only when something changed), executes
/// inbound commands, and restores subscriptions after reconnects.
pub struct Engine<C: MqttClient, X: CommandExecutor> {
    topics: Topics,
    entities: Vec<TrackedEntity>,
    client: Arc<Mutex<C>>,
    executor: X,
    options: EngineOptions,
}

impl<C: MqttClient, X: CommandExecutor> Engine<C, X> {
    /// Create a new Engine instance for a fixed set of entities
    pub fn new(
        app_id: impl Into<String>,
        entities: Vec<Entity>,
        client: C,
        executor: X,
        options: EngineOptions,
    ) -> Self {
        let topics = Topics::new(app_id);
        let entities = entities
            .into_iter()
            .map(|entity| TrackedEntity {
                command_topic: topics.command(&entity),
                state_topic: topics.state(&entity),
                availability_topic: topics.availability(&entity),
                entity,
                runtime: Mutex::new(RuntimeState::default()),
            })
            .collect();

        Self {
            topics,
            entities,
            client: Arc::new(Mutex::new(client)),
            executor,
            options,
        }
    }

    /// Connect to the broker
    ///
    /// Registers a retained "unavailable" last will on the application
    /// availability topic. The returned events must be fed to [`Engine::run`],
    /// which performs the on-connect work for this and every later session.
    pub async fn connect(&self) -> Result<BusEvents, MqttError> {
        let options = ConnectOptions {
            client_id: client_id(self.topics.app_id()),
            last_will: LastWill {
                topic: self.topics.app_availability(),
                payload: self.options.app_availability.payload(false).to_string(),
            },
        };

        info!(client_id = %options.client_id, "Connecting to MQTT broker");
        let events = self.client.lock().await.connect(&options).await?;
        info!("Connected to MQTT broker");
        Ok(events)
    }

    /// Process bus events until the client's event stream ends
    pub async fn run(&self, mut events: BusEvents) {
        info!("Engine starting");

        while let Some(event) = events.recv().await {
            match event {
                BusEvent::Connected => self.on_connect().await,
                BusEvent::Message(msg) => self.handle_message(&msg).await,
            }
        }

        info!("Engine shutting down");
    }

    /// Announce availability and (re)subscribe every command topic
    ///
    /// Runs after every successful connect. Availability is re-announced
    /// unconditionally since the retained value may be stale; entity state is
    /// not, so an unchanged entity is not re-published.
    pub async fn on_connect(&self) {
        self.publish_app_availability(true).await;

        let mut client = self.client.lock().await;
        for tracked in &self.entities {
            debug!(topic = %tracked.command_topic, "Subscribing");
            if let Err(e) = client.subscribe(&tracked.command_topic).await {
                error!(entity = %tracked.entity.name, "Cannot subscribe: {}", e);
            }
        }
    }

    /// Query every entity that is due and publish what changed
    pub async fn refresh(&self) {
        for tracked in &self.entities {
            let mut runtime = tracked.runtime.lock().await;
            if runtime.refresh_due(&tracked.entity, Instant::now()) {
                self.poll(tracked, &mut runtime).await;
            }
        }
    }

    /// Execute a raw command payload against the entity named `name`
    ///
    /// Invalid input is logged and dropped.
    pub async fn dispatch(&self, name: &str, payload: &[u8]) {
        let Some(tracked) = self.entities.iter().find(|t| t.entity.name == name) else {
            warn!(entity = name, "Command for unknown entity");
            return;
        };
        self.dispatch_to(tracked, payload).await;
    }

    /// Publish "unavailable" and leave the broker cleanly
    pub async fn shutdown(&self) {
        self.publish_app_availability(false).await;
        if let Err(e) = self.client.lock().await.disconnect().await {
            warn!("Error disconnecting from MQTT broker: {}", e);
        }
    }

    async fn handle_message(&self, msg: &MqttMessage) {
        match self.entities.iter().find(|t| t.command_topic == msg.topic) {
            Some(tracked) => self.dispatch_to(tracked, &msg.payload).await,
            None => debug!(topic = %msg.topic, "Ignoring message on unknown topic"),
        }
    }

    async fn dispatch_to(&self, tracked: &TrackedEntity, payload: &[u8]) {
        let name = &tracked.entity.name;
        info!(
            entity = %name,
            payload = %String::from_utf8_lossy(payload),
            "Received command"
        );

        let command = match Command::parse(payload) {
            Ok(command) => command,
            Err(e) => {
                error!(entity = %name, "Dropping command: {}", e);
                return;
            }
        };

        let mut runtime = tracked.runtime.lock().await;
        if let Err(e) = self.execute(tracked, &mut runtime, command).await {
            error!(entity = %name, "Dropping command: {}", e);
        }
    }

    async fn execute(
        &self,
        tracked: &TrackedEntity,
        runtime: &mut RuntimeState,
        command: Command,
    ) -> Result<(), DispatchError> {
        match (&tracked.entity.kind, command) {
            (EntityKind::Switch(commands), Command::On) => {
                self.switch(tracked, runtime, &commands.turn_on, true).await;
            }
            (EntityKind::Switch(commands), Command::Off) => {
                self.switch(tracked, runtime, &commands.turn_off, false).await;
            }
            (EntityKind::Switch(commands), Command::Toggle) => {
                let toggle = commands
                    .toggle
                    .as_deref()
                    .ok_or(DispatchError::NotConfigured { verb: Verb::Toggle })?;
                self.run_and_confirm(tracked, runtime, toggle).await;
            }
            (EntityKind::Switch(commands), Command::Set(value)) => {
                let value = value.ok_or(DispatchError::MissingValue { verb: Verb::Set })?;
                let number: i64 = value.trim().parse().map_err(|e: ParseIntError| {
                    DispatchError::InvalidValue {
                        value: value.clone(),
                        reason: format!("must be an integer ({})", e),
                    }
                })?;
                let template = commands
                    .set_value
                    .as_deref()
                    .ok_or(DispatchError::NotConfigured { verb: Verb::Set })?;
                let command = render_template(template, &number.to_string());
                self.run_and_confirm(tracked, runtime, &command).await;
            }
            (EntityKind::Display(commands), Command::Set(value)) => {
                let value = value.ok_or(DispatchError::MissingValue { verb: Verb::Set })?;
                let command = render_template(&commands.set_value, &value);
                self.run_and_confirm(tracked, runtime, &command).await;
            }
            (EntityKind::Display(_), command) => {
                return Err(DispatchError::Unsupported {
                    verb: command.verb(),
                    class: tracked.entity.class(),
                });
            }
        }
        Ok(())
    }

    /// Run an on/off command; its outcome is known without re-querying
    async fn switch(
        &self,
        tracked: &TrackedEntity,
        runtime: &mut RuntimeState,
        command: &str,
        on: bool,
    ) {
        match self.executor.run(command).await {
            Ok(output) => {
                debug!(entity = %tracked.entity.name, output = %output, "Executed switch command successfully");
                self.publish_state(tracked, runtime, StateValue::Switch(on)).await;
                self.publish_availability(tracked, runtime, true).await;
            }
            Err(e) => {
                error!(
                    entity = %tracked.entity.name,
                    output = e.output(),
                    "Error running switch command: {}", e
                );
                self.publish_availability(tracked, runtime, false).await;
            }
        }
    }

    /// Run a command whose outcome is device-defined, then query the result
    async fn run_and_confirm(&self, tracked: &TrackedEntity, runtime: &mut RuntimeState, command: &str) {
        match self.executor.run(command).await {
            Ok(output) => {
                debug!(entity = %tracked.entity.name, output = %output, "Executed command successfully");
                if !self.options.settle_delay.is_zero() {
                    tokio::time::sleep(self.options.settle_delay).await;
                }
                self.poll(tracked, runtime).await;
            }
            Err(e) => {
                error!(
                    entity = %tracked.entity.name,
                    output = e.output(),
                    "Error running command: {}", e
                );
                self.publish_availability(tracked, runtime, false).await;
            }
        }
    }

    /// Query the entity and publish state and availability
    ///
    /// A failed query only marks the entity unavailable; the last state stays.
    async fn poll(&self, tracked: &TrackedEntity, runtime: &mut RuntimeState) {
        runtime.last_refresh = Some(Instant::now());

        match tracked.entity.poll(&self.executor).await {
            Ok(state) => {
                self.publish_state(tracked, runtime, state).await;
                self.publish_availability(tracked, runtime, true).await;
            }
            Err(e) => {
                error!(
                    entity = %tracked.entity.name,
                    output = e.output(),
                    "Error running state query command: {}", e
                );
                self.publish_availability(tracked, runtime, false).await;
            }
        }
    }

    async fn publish_state(
        &self,
        tracked: &TrackedEntity,
        runtime: &mut RuntimeState,
        state: StateValue,
    ) {
        if !runtime.state_changed(&state) {
            return;
        }

        let topic = &tracked.state_topic;
        let result = self
            .client
            .lock()
            .await
            .publish(topic, state.payload().as_bytes(), true)
            .await;

        match result {
            Ok(()) => {
                debug!(entity = %tracked.entity.name, topic = %topic, state = state.payload(), "Published state");
                runtime.state = Some(state);
            }
            Err(e) => error!(entity = %tracked.entity.name, "Error publishing state: {}", e),
        }
    }

    async fn publish_availability(
        &self,
        tracked: &TrackedEntity,
        runtime: &mut RuntimeState,
        available: bool,
    ) {
        if !runtime.availability_changed(available) {
            return;
        }

        let topic = &tracked.availability_topic;
        let payload = tracked.entity.availability.payload(available);
        let result = self
            .client
            .lock()
            .await
            .publish(topic, payload.as_bytes(), true)
            .await;

        match result {
            Ok(()) => {
                debug!(entity = %tracked.entity.name, topic = %topic, available, "Published availability");
                runtime.available = Some(available);
            }
            Err(e) => error!(entity = %tracked.entity.name, "Error publishing availability: {}", e),
        }
    }

    async fn publish_app_availability(&self, available: bool) {
        let topic = self.topics.app_availability();
        let payload = self.options.app_availability.payload(available);
        let result = self
            .client
            .lock()
            .await
            .publish(&topic, payload.as_bytes(), true)
            .await;

        match result {
            Ok(()) => debug!(topic = %topic, available, "Published application availability"),
            Err(e) => error!("Error publishing application availability: {}", e),
        }
    }
}

/// Client identity: the application id plus a random per-process suffix
fn client_id(app_id: &str) -> String {
    format!("{}-{:016x}", app_id, rand::random::<u64>())
}
