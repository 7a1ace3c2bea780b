//! Interfaces the rules engine uses to talk to the host SDK.
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventData};

/// Sink for events produced by consequences.
///
/// Implemented for any `Fn(Event)`, so a closure can be passed directly.
pub trait EventDispatcher {
    #[allow(missing_docs)]
    fn dispatch(&self, event: Event);
}

impl<T: Fn(Event)> EventDispatcher for T {
    fn dispatch(&self, event: Event) {
        self(event);
    }
}

/// Status of a shared state entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SharedStateStatus {
    /// State is published.
    Set,
    /// The owning extension announced it will publish state for this event but hasn't yet.
    Pending,
    /// No state.
    None,
}

/// How to pick a shared state version relative to the requesting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SharedStateResolution {
    /// Latest state, whether set or pending.
    #[default]
    Any,
    /// Latest set state, skipping pending versions.
    LastSet,
}

/// Result of a shared state query.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedStateResult {
    #[allow(missing_docs)]
    pub status: SharedStateStatus,
    #[allow(missing_docs)]
    pub value: Option<EventData>,
}

/// Lookup of state published by other SDK modules.
pub trait SharedStateProvider {
    /// Return the shared state of `extension` as of `event` (or the latest state if `event` is
    /// `None`). Returns `None` if the extension is unknown.
    fn shared_state(
        &self,
        extension: &str,
        event: Option<&Event>,
        barrier: bool,
        resolution: SharedStateResolution,
    ) -> Option<SharedStateResult>;
}

/// A single query against the event history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHistoryRequest {
    /// Key/value pairs an event must carry to be counted.
    pub mask: EventData,
    /// Start of the search window, unix milliseconds. `0` means unbounded.
    pub from: i64,
    /// End of the search window, unix milliseconds. `0` means unbounded.
    pub to: i64,
}

/// Result of a single [`EventHistoryRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventHistoryResult {
    /// Number of matching events.
    pub count: i64,
    /// Timestamp of the oldest matching event, unix milliseconds.
    pub oldest: Option<i64>,
    /// Timestamp of the newest matching event, unix milliseconds.
    pub newest: Option<i64>,
}

/// Persistent record of past events, used by historical conditions.
pub trait EventHistory {
    /// Run `requests` against the history. With `enforce_order`, a request only matches events
    /// that occurred after the match of the previous request.
    ///
    /// Returns `None` if the history is unavailable. Otherwise, returns one result per request.
    fn query(
        &self,
        requests: &[EventHistoryRequest],
        enforce_order: bool,
    ) -> Option<Vec<EventHistoryResult>>;
}

pub(crate) struct NoopEventDispatcher;
impl EventDispatcher for NoopEventDispatcher {
    fn dispatch(&self, _event: Event) {}
}
