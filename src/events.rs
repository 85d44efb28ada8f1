//! Domain events emitted by flag state transitions, and the publisher they are forwarded to.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Environment, FlagId, RolloutStrategy};

/// Record of a flag state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainEvent {
    /// Unique id of this event.
    pub event_id: Uuid,
    /// The flag that changed.
    pub flag_id: FlagId,
    /// Name of the flag at the time of the event.
    pub flag_name: String,
    /// When the transition happened.
    pub occurred_at: DateTime<Utc>,
    /// What happened.
    #[serde(flatten)]
    pub kind: DomainEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all_fields = "camelCase")]
pub enum DomainEventKind {
    #[serde(rename = "FeatureFlagCreated")]
    Created { environment: Environment },
    #[serde(rename = "FeatureFlagEnabled")]
    Enabled,
    #[serde(rename = "FeatureFlagDisabled")]
    Disabled,
    #[serde(rename = "FeatureFlagStrategyUpdated")]
    StrategyUpdated {
        old_strategy: RolloutStrategy,
        new_strategy: RolloutStrategy,
    },
}

impl DomainEvent {
    pub(crate) fn new(flag_id: &FlagId, flag_name: &str, kind: DomainEventKind) -> Self {
        DomainEvent {
            event_id: Uuid::new_v4(),
            flag_id: flag_id.clone(),
            flag_name: flag_name.to_owned(),
            occurred_at: Utc::now(),
            kind,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self.kind {
            DomainEventKind::Created { .. } => "FeatureFlagCreated",
            DomainEventKind::Enabled => "FeatureFlagEnabled",
            DomainEventKind::Disabled => "FeatureFlagDisabled",
            DomainEventKind::StrategyUpdated { .. } => "FeatureFlagStrategyUpdated",
        }
    }
}

/// Append-only buffer of the events produced within one mutation.
///
/// Events come out of [`EventRecorder::drain`] in the order they were recorded.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Vec<DomainEvent>,
}

impl EventRecorder {
    pub fn new() -> Self {
        EventRecorder::default()
    }

    /// Record the outcome of an aggregate operation. Idempotent no-op transitions return `None`
    /// and record nothing.
    pub fn record(&mut self, event: impl Into<Option<DomainEvent>>) {
        if let Some(event) = event.into() {
            self.events.push(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Take all recorded events, leaving the recorder empty.
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Receives events after a mutation has been persisted.
///
/// Publishing is fire-and-forget: the service does not inspect the outcome and never retries.
/// Implementations that can fail should log and swallow their errors.
pub trait EventPublisher {
    fn publish(&self, event: DomainEvent);
}

pub(crate) struct NoopEventPublisher;

impl EventPublisher for NoopEventPublisher {
    fn publish(&self, _event: DomainEvent) {}
}

/// Publisher that writes every event to the `log` facade at info level.
pub struct LoggingEventPublisher;

impl EventPublisher for LoggingEventPublisher {
    fn publish(&self, event: DomainEvent) {
        log::info!(target: "togglefox",
                   event_type = event.event_type(),
                   event_id:display = event.event_id,
                   flag_id:display = event.flag_id,
                   flag_name = event.flag_name.as_str();
                   "publishing domain event");
    }
}

impl<T: Fn(DomainEvent)> EventPublisher for T {
    fn publish(&self, event: DomainEvent) {
        self(event);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::{DomainEvent, DomainEventKind, EventPublisher, EventRecorder};
    use crate::{FlagId, RolloutStrategy};

    fn event(kind: DomainEventKind) -> DomainEvent {
        DomainEvent::new(&FlagId::new("flag-1").unwrap(), "checkout", kind)
    }

    #[test]
    fn recorder_drains_in_order() {
        let mut recorder = EventRecorder::new();
        recorder.record(event(DomainEventKind::Enabled));
        recorder.record(None::<DomainEvent>);
        recorder.record(event(DomainEventKind::Disabled));
        assert_eq!(recorder.len(), 2);

        let drained = recorder.drain();
        assert_eq!(
            drained.iter().map(DomainEvent::event_type).collect::<Vec<_>>(),
            vec!["FeatureFlagEnabled", "FeatureFlagDisabled"]
        );
        assert!(recorder.is_empty());
        assert!(recorder.drain().is_empty());
    }

    #[test]
    fn serializes_with_event_type() {
        let value = serde_json::to_value(event(DomainEventKind::StrategyUpdated {
            old_strategy: RolloutStrategy::percentage(0).unwrap(),
            new_strategy: RolloutStrategy::percentage(100).unwrap(),
        }))
        .unwrap();

        assert_eq!(value["eventType"], json!("FeatureFlagStrategyUpdated"));
        assert_eq!(value["flagId"], json!("flag-1"));
        assert_eq!(value["flagName"], json!("checkout"));
        assert_eq!(value["oldStrategy"], json!({ "type": "PERCENTAGE", "percentage": 0 }));
        assert_eq!(value["newStrategy"], json!({ "type": "PERCENTAGE", "percentage": 100 }));
    }

    #[test]
    fn closures_are_publishers() {
        let published = Mutex::new(Vec::new());
        let publisher = |event: DomainEvent| published.lock().unwrap().push(event.event_type());
        publisher.publish(event(DomainEventKind::Enabled));
        assert_eq!(*published.lock().unwrap(), vec!["FeatureFlagEnabled"]);
    }
}
