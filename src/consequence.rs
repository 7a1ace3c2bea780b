//! Applies consequences of matched rules to an event.
use std::{
    collections::{HashMap, VecDeque},
    marker::PhantomData,
    sync::{Arc, Mutex, PoisonError},
};

use serde_json::{json, Value};

use crate::{
    event::{event_source, event_type, Event, EventData},
    event_data::merge,
    rules::{ConsequenceKind, LaunchRule, RuleConsequence},
    token::{render, TokenFinder},
};

const CONSEQUENCE_EVENT_NAME: &str = "Rules Consequence Event";
const DISPATCH_EVENT_NAME: &str = "Dispatch Consequence Result";

const KEY_EVENT_DATA: &str = "eventdata";
const KEY_EVENT_DATA_ACTION: &str = "eventdataaction";
const KEY_TYPE: &str = "type";
const KEY_SOURCE: &str = "source";
const KEY_TRIGGERED_CONSEQUENCE: &str = "triggeredconsequence";

const ACTION_COPY: &str = "copy";
const ACTION_NEW: &str = "new";

/// Number of dispatched events whose chain depth is remembered. Past this, the oldest entries are
/// forgotten and those events count as new chains if they ever come back.
const CHAIN_DEPTH_CAPACITY: usize = 1024;

pub(crate) struct ConsequenceProcessor {
    max_chained_dispatch: u32,
    chain_depths: Mutex<ChainDepths>,
}

/// Chain depth of events produced by dispatch consequences, keyed by unique identifier. An entry
/// is taken out when its event comes back for processing, or evicted oldest-first once
/// `capacity` entries have been recorded since.
struct ChainDepths {
    capacity: usize,
    depths: HashMap<String, u32>,
    order: VecDeque<String>,
}

impl ChainDepths {
    fn new(capacity: usize) -> ChainDepths {
        ChainDepths {
            capacity,
            depths: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn take(&mut self, id: &str) -> Option<u32> {
        self.depths.remove(id)
    }

    fn record(&mut self, id: &str, depth: u32) {
        while self.order.len() >= self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            if self.depths.remove(&oldest).is_some() {
                log::debug!(target: "launch_rules", event_id = oldest.as_str(); "forgetting chain depth of dispatched event");
            }
        }
        self.depths.insert(id.to_owned(), depth);
        self.order.push_back(id.to_owned());
    }
}

impl ConsequenceProcessor {
    pub fn new(max_chained_dispatch: u32) -> ConsequenceProcessor {
        ConsequenceProcessor::with_chain_capacity(max_chained_dispatch, CHAIN_DEPTH_CAPACITY)
    }

    fn with_chain_capacity(max_chained_dispatch: u32, capacity: usize) -> ConsequenceProcessor {
        ConsequenceProcessor {
            max_chained_dispatch,
            chain_depths: Mutex::new(ChainDepths::new(capacity)),
        }
    }

    /// Take the recorded chain depth of `event`. Events not produced by a dispatch consequence
    /// have depth 0.
    pub fn take_chain_depth(&self, event: &Event) -> u32 {
        self.chain_depths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take(event.unique_identifier())
            .unwrap_or(0)
    }

    fn record_chain_depth(&self, event: &Event, depth: u32) {
        self.chain_depths
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(event.unique_identifier(), depth);
    }

    /// Apply consequences of `rules` to `event`, in rule order and then consequence order.
    ///
    /// Tokens in each consequence detail are resolved with `tokens_for` against the event as
    /// processed so far, so data attached by an earlier consequence is visible to later ones.
    /// Events to dispatch are appended to `outbox` instead of being dispatched directly, so the
    /// caller decides when they reach the dispatcher. Returns the event with attached/modified
    /// data.
    pub fn process<'c, F>(
        &self,
        event: &Event,
        rules: &[Arc<LaunchRule>],
        chain_depth: u32,
        outbox: &mut Vec<Event>,
        tokens_for: F,
    ) -> Event
    where
        F: for<'e> Fn(&'e Event, PhantomData<&'e &'c ()>) -> Box<dyn TokenFinder + 'e>,
    {
        let mut processed = event.clone();
        for consequence in rules.iter().flat_map(|rule| &rule.consequences) {
            let detail = {
                let tokens = tokens_for(&processed, PhantomData);
                render_detail(
                    &consequence.detail,
                    &*tokens,
                    consequence.kind == ConsequenceKind::Url,
                )
            };

            match &consequence.kind {
                ConsequenceKind::Add | ConsequenceKind::Mod => {
                    let overwrite = consequence.kind == ConsequenceKind::Mod;
                    let Some(data) = apply_event_data(&consequence.id, &detail, &processed, overwrite)
                    else {
                        continue;
                    };
                    processed = processed.with_data(Some(data));
                }
                ConsequenceKind::Dispatch => {
                    if chain_depth >= self.max_chained_dispatch {
                        log::debug!(target: "launch_rules",
                                    consequence_id = consequence.id.as_str(),
                                    chain_depth;
                                    "dispatch chain limit reached, skipping dispatch consequence");
                        continue;
                    }
                    let Some(dispatched) = dispatch_event(&consequence.id, &detail, &processed)
                    else {
                        continue;
                    };
                    self.record_chain_depth(&dispatched, chain_depth + 1);
                    outbox.push(dispatched);
                }
                ConsequenceKind::Schema | ConsequenceKind::Url | ConsequenceKind::Other(_) => {
                    outbox.push(consequence_event(consequence, detail, &processed));
                }
            }
        }
        processed
    }
}

/// Render every string in `detail`, at any depth.
fn render_detail(detail: &EventData, tokens: &dyn TokenFinder, encode_values: bool) -> EventData {
    detail
        .iter()
        .map(|(key, value)| (key.clone(), render_value(value, tokens, encode_values)))
        .collect()
}

fn render_value(value: &Value, tokens: &dyn TokenFinder, encode_values: bool) -> Value {
    match value {
        Value::String(template) => Value::String(render(template, tokens, encode_values)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| render_value(item, tokens, encode_values))
                .collect(),
        ),
        Value::Object(map) => Value::Object(render_detail(map, tokens, encode_values)),
        other => other.clone(),
    }
}

fn apply_event_data(
    consequence_id: &str,
    detail: &EventData,
    event: &Event,
    overwrite: bool,
) -> Option<EventData> {
    let Some(Value::Object(data)) = detail.get(KEY_EVENT_DATA) else {
        log::warn!(target: "launch_rules", consequence_id; "consequence detail has no event data map, skipping");
        return None;
    };
    let empty = EventData::new();
    Some(merge(data, event.data().unwrap_or(&empty), overwrite))
}

fn dispatch_event(consequence_id: &str, detail: &EventData, parent: &Event) -> Option<Event> {
    let (Some(Value::String(event_type)), Some(Value::String(source))) =
        (detail.get(KEY_TYPE), detail.get(KEY_SOURCE))
    else {
        log::warn!(target: "launch_rules", consequence_id; "dispatch consequence is missing type or source, skipping");
        return None;
    };

    let data = match detail.get(KEY_EVENT_DATA_ACTION).and_then(Value::as_str) {
        Some(ACTION_COPY) => parent.data().cloned(),
        Some(ACTION_NEW) => Some(
            detail
                .get(KEY_EVENT_DATA)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        ),
        action => {
            log::warn!(target: "launch_rules", consequence_id, action:?; "unsupported dispatch event data action, skipping");
            return None;
        }
    };

    let builder = Event::builder(DISPATCH_EVENT_NAME, event_type, source).chained_to(parent);
    Some(match data {
        Some(data) => builder.with_data(data).build(),
        None => builder.build(),
    })
}

fn consequence_event(consequence: &RuleConsequence, detail: EventData, parent: &Event) -> Event {
    let data = json!({
        KEY_TRIGGERED_CONSEQUENCE: {
            "id": consequence.id,
            "type": consequence.kind.tag(),
            "detail": detail,
        }
    });
    let builder = Event::builder(
        CONSEQUENCE_EVENT_NAME,
        event_type::RULES_ENGINE,
        event_source::RESPONSE_CONTENT,
    )
    .chained_to(parent);
    match data {
        Value::Object(data) => builder.with_data(data).build(),
        _ => builder.build(),
    }
}
