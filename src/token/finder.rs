use std::{cell::OnceCell, collections::BTreeMap};

use chrono::SecondsFormat;
use rand::{thread_rng, Rng};
use serde_json::Value;

use crate::{
    event::Event,
    event_data::{flatten, to_query_string},
    extension_api::{SharedStateProvider, SharedStateResolution, SharedStateStatus},
};

use super::TokenFinder;

const KEY_EVENT_TYPE: &str = "~type";
const KEY_EVENT_SOURCE: &str = "~source";
const KEY_TIMESTAMP_UNIX: &str = "~timestampu";
const KEY_TIMESTAMP_ISO8601: &str = "~timestampz";
const KEY_TIMESTAMP_PLATFORM: &str = "~timestampp";
const KEY_SDK_VERSION: &str = "~sdkver";
const KEY_CACHEBUST: &str = "~cachebust";
const KEY_ALL_URL: &str = "~all_url";
const KEY_ALL_JSON: &str = "~all_json";
const KEY_SHARED_STATE: &str = "~state.";

const CACHEBUST_RANGE: std::ops::Range<u32> = 0..100_000_000;

/// [`TokenFinder`] over a single event, with access to shared state of other modules.
pub struct LaunchTokenFinder<'a> {
    event: &'a Event,
    shared_state: Option<&'a dyn SharedStateProvider>,
    sdk_version: &'a str,
    /// Event data flattened on first use. `None` inside means the event has no data.
    flattened: OnceCell<Option<BTreeMap<String, Value>>>,
}

impl<'a> LaunchTokenFinder<'a> {
    #[allow(missing_docs)]
    pub fn new(
        event: &'a Event,
        shared_state: Option<&'a dyn SharedStateProvider>,
        sdk_version: &'a str,
    ) -> LaunchTokenFinder<'a> {
        LaunchTokenFinder {
            event,
            shared_state,
            sdk_version,
            flattened: OnceCell::new(),
        }
    }

    fn flattened(&self) -> Option<&BTreeMap<String, Value>> {
        self.flattened
            .get_or_init(|| self.event.data().map(flatten))
            .as_ref()
    }

    fn event_value(&self, key: &str) -> Option<Value> {
        let Some(flattened) = self.flattened() else {
            log::trace!(target: "launch_rules", key; "event has no data, resolving token to empty string");
            return Some(Value::String(String::new()));
        };
        let value = flattened.get(key).cloned();
        if value.is_none() {
            log::trace!(target: "launch_rules", key; "token not found in event data");
        }
        value
    }

    /// Resolve `<extension>/<dotted.key>` against the extension's shared state.
    fn shared_state_value(&self, path: &str) -> Option<Value> {
        let Some((extension, key)) = path
            .split_once('/')
            .filter(|(extension, key)| !extension.is_empty() && !key.is_empty())
        else {
            log::trace!(target: "launch_rules", path; "malformed shared state token");
            return None;
        };

        let result = self.shared_state?.shared_state(
            extension,
            Some(self.event),
            false,
            SharedStateResolution::Any,
        )?;
        if result.status == SharedStateStatus::Pending {
            log::trace!(target: "launch_rules", extension; "shared state is pending");
            return None;
        }

        flatten(result.value.as_ref()?).remove(key)
    }
}

impl<'a> TokenFinder for LaunchTokenFinder<'a> {
    fn get(&self, key: &str) -> Option<Value> {
        let timestamp = self.event.timestamp();
        match key {
            KEY_EVENT_TYPE => Some(self.event.event_type().into()),
            KEY_EVENT_SOURCE => Some(self.event.source().into()),
            KEY_TIMESTAMP_UNIX => Some(timestamp.timestamp().into()),
            KEY_TIMESTAMP_ISO8601 => {
                Some(timestamp.format("%Y-%m-%dT%H:%M:%S%z").to_string().into())
            }
            KEY_TIMESTAMP_PLATFORM => {
                Some(timestamp.to_rfc3339_opts(SecondsFormat::Millis, true).into())
            }
            KEY_SDK_VERSION => Some(self.sdk_version.into()),
            KEY_CACHEBUST => Some(thread_rng().gen_range(CACHEBUST_RANGE).to_string().into()),
            KEY_ALL_URL => Some(
                self.flattened()
                    .map(to_query_string)
                    .unwrap_or_default()
                    .into(),
            ),
            KEY_ALL_JSON => Some(
                self.event
                    .data()
                    .and_then(|data| serde_json::to_string(data).ok())
                    .unwrap_or_default()
                    .into(),
            ),
            _ => match key.strip_prefix(KEY_SHARED_STATE) {
                Some(path) => self.shared_state_value(path),
                None => self.event_value(key),
            },
        }
    }
}
