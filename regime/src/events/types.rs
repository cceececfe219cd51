//! Event types for regime lifecycle reporting

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Kind of lifecycle event.
///
/// Built-in kinds are constants; custom kinds can only be obtained from an
/// [`EventBus`](super::EventBus) that registered them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    TaskStarted,
    TaskUpdated,
    TaskCompleted,
    TaskFailed,
    CoupDEtat,
    Custom(CustomEventType),
}

/// Name of a registered custom event type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CustomEventType(pub(crate) String);

impl EventType {
    pub const BUILTIN: [EventType; 5] = [
        EventType::TaskStarted,
        EventType::TaskUpdated,
        EventType::TaskCompleted,
        EventType::TaskFailed,
        EventType::CoupDEtat,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::TaskStarted => "task_started",
            Self::TaskUpdated => "task_updated",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::CoupDEtat => "coup_d_etat",
            Self::Custom(custom) => &custom.0,
        }
    }

    /// Look up a built-in type by wire name
    pub fn builtin(name: &str) -> Option<Self> {
        Self::BUILTIN.into_iter().find(|t| t.as_str() == name)
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// An immutable lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    event_type: EventType,
    #[serde(serialize_with = "serialize_timestamp")]
    timestamp: DateTime<Utc>,
    task_id: Option<String>,
    agent: Option<String>,
    message: String,
    details: Map<String, Value>,
}

impl Event {
    pub fn new(event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            task_id: None,
            agent: None,
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn event_type(&self) -> &EventType {
        &self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    pub fn agent(&self) -> Option<&str> {
        self.agent.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> &Map<String, Value> {
        &self.details
    }

    /// Wire form delivered to listeners
    pub fn to_wire(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_lookup() {
        assert_eq!(EventType::builtin("coup_d_etat"), Some(EventType::CoupDEtat));
        assert_eq!(EventType::builtin("task_exploded"), None);
    }

    #[test]
    fn test_wire_form() {
        let event = Event::new(EventType::CoupDEtat, "Lex seized power")
            .with_task("t-1")
            .with_agent("Lex")
            .with_detail("previous_coordinator", "Ada")
            .with_detail("contributors", json!(["Tax"]));

        let wire = event.to_wire();
        assert_eq!(wire["event_type"], "coup_d_etat");
        assert_eq!(wire["task_id"], "t-1");
        assert_eq!(wire["agent"], "Lex");
        assert_eq!(wire["details"]["contributors"][0], "Tax");
        assert!(wire["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
