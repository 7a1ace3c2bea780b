//! Events flowing through the rules engine.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key-ordered event payload.
pub type EventData = serde_json::Map<String, serde_json::Value>;

/// Well-known event types.
pub mod event_type {
    /// Events produced by the rules engine itself.
    pub const RULES_ENGINE: &str = "com.adobe.eventType.rulesEngine";
}

/// Well-known event sources.
pub mod event_source {
    /// Reset request sent when the engine receives its first rule set.
    pub const REQUEST_RESET: &str = "com.adobe.eventSource.requestReset";
    /// Triggered consequence notifications.
    pub const RESPONSE_CONTENT: &str = "com.adobe.eventSource.responseContent";
}

/// An immutable application event.
///
/// Events are created with [`Event::builder`]. Consequence processing never mutates an event in
/// place; it produces a copy with new data via [`Event::with_data`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    name: String,
    #[serde(rename = "type")]
    event_type: String,
    source: String,
    unique_identifier: String,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<EventData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response_id: Option<String>,
}

impl Event {
    /// Start building a new event.
    ///
    /// ```
    /// # use launch_rules::Event;
    /// let event = Event::builder("Lifecycle Start", "com.adobe.eventType.lifecycle", "com.adobe.eventSource.requestContent")
    ///     .with_data(serde_json::json!({"launches": 3}).as_object().cloned().unwrap())
    ///     .build();
    /// assert_eq!(event.event_type(), "com.adobe.eventType.lifecycle");
    /// ```
    pub fn builder(
        name: impl Into<String>,
        event_type: impl Into<String>,
        source: impl Into<String>,
    ) -> EventBuilder {
        EventBuilder {
            name: name.into(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp: None,
            data: None,
            parent_id: None,
            response_id: None,
        }
    }

    #[allow(missing_docs)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[allow(missing_docs)]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    #[allow(missing_docs)]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Unique identifier (UUID v4) assigned at construction.
    pub fn unique_identifier(&self) -> &str {
        &self.unique_identifier
    }

    #[allow(missing_docs)]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Event payload. `None` is distinct from an empty map.
    pub fn data(&self) -> Option<&EventData> {
        self.data.as_ref()
    }

    /// Identifier of the event this one was chained from, if any.
    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Identifier of the request event this one responds to, if any.
    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    /// Return a copy of the event carrying `data`. Identity and timestamp are preserved.
    pub fn with_data(&self, data: Option<EventData>) -> Event {
        Event {
            data,
            ..self.clone()
        }
    }
}

/// Builder for [`Event`].
#[derive(Debug)]
pub struct EventBuilder {
    name: String,
    event_type: String,
    source: String,
    timestamp: Option<DateTime<Utc>>,
    data: Option<EventData>,
    parent_id: Option<String>,
    response_id: Option<String>,
}

impl EventBuilder {
    /// Set the event payload.
    pub fn with_data(mut self, data: EventData) -> EventBuilder {
        self.data = Some(data);
        self
    }

    /// Override the event timestamp. Defaults to the time of [`EventBuilder::build`].
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> EventBuilder {
        self.timestamp = Some(timestamp);
        self
    }

    /// Mark the event as derived from `parent`.
    pub fn chained_to(mut self, parent: &Event) -> EventBuilder {
        self.parent_id = Some(parent.unique_identifier.clone());
        self
    }

    /// Mark the event as a response to `request`.
    pub fn in_response_to(mut self, request: &Event) -> EventBuilder {
        self.response_id = Some(request.unique_identifier.clone());
        self
    }

    #[allow(missing_docs)]
    pub fn build(self) -> Event {
        Event {
            name: self.name,
            event_type: self.event_type,
            source: self.source,
            unique_identifier: uuid::Uuid::new_v4().to_string(),
            timestamp: self.timestamp.unwrap_or_else(now_millis),
            data: self.data,
            parent_id: self.parent_id,
            response_id: self.response_id,
        }
    }
}

/// Current time truncated to millisecond precision.
fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
