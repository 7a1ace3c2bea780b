//! The rules engine: rule storage, the pre-rules event cache, and the processing pipeline.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock},
};

use serde_json::json;

use crate::{
    consequence::ConsequenceProcessor,
    event::{event_source, event_type, EventData},
    extension_api::{EventDispatcher, EventHistory, SharedStateProvider},
    reevaluation::{ReevaluationCompletion, ReevaluationInterceptor},
    rules::{parse_rules, EvaluationContext, LaunchRule},
    token::{LaunchTokenFinder, TokenFinder},
    Event, Result, RulesEngineConfig,
};

/// An immutable set of rules. Every replace or add produces a new snapshot with a higher version.
#[derive(Debug, Default)]
pub struct RuleSnapshot {
    version: u64,
    rules: Vec<Arc<LaunchRule>>,
}

impl RuleSnapshot {
    /// `0` for the initial empty rule set.
    pub fn version(&self) -> u64 {
        self.version
    }

    #[allow(missing_docs)]
    pub fn rules(&self) -> &[Arc<LaunchRule>] {
        &self.rules
    }
}

/// A rules engine instance.
///
/// The engine starts without rules. Until the first call to
/// [`replace_rules`](LaunchRulesEngine::replace_rules) with a rule list, processed events are
/// cached and replayed against the new rules once they arrive.
///
/// The engine is cheap to clone; clones share the same rules and cache.
///
/// # Examples
/// ```
/// # use launch_rules::{Event, RulesEngineConfig};
/// let engine = RulesEngineConfig::new("com.example.rules").to_engine();
/// engine.replace_rules_from_json(br#"{
///   "version": 1,
///   "rules": [{
///     "condition": {"type": "matcher", "definition": {"key": "~type", "matcher": "eq", "values": ["com.example.type"]}},
///     "consequences": [{"id": "c1", "type": "add", "detail": {"eventdata": {"added": true}}}]
///   }]
/// }"#).unwrap();
///
/// let event = Event::builder("test", "com.example.type", "com.example.source").build();
/// let processed = engine.process_event(&event);
/// assert_eq!(processed.data().unwrap()["added"], true);
/// ```
#[derive(Clone)]
pub struct LaunchRulesEngine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    name: String,
    sdk_version: String,
    dispatcher: Box<dyn EventDispatcher + Send + Sync>,
    shared_state: Option<Box<dyn SharedStateProvider + Send + Sync>>,
    event_history: Option<Box<dyn EventHistory + Send + Sync>>,
    interceptor: RwLock<Option<Arc<dyn ReevaluationInterceptor + Send + Sync>>>,
    state: Mutex<EngineState>,
    consequences: ConsequenceProcessor,
}

struct EngineState {
    rules: Arc<RuleSnapshot>,
    /// `Some` until rules are set for the first time.
    cached_events: Option<VecDeque<CachedEvent>>,
    /// Set while the output of a cache replay is being dispatched. Events produced in the
    /// meantime wait in `pending` so they reach the dispatcher after the replayed ones.
    replaying: bool,
    pending: VecDeque<Event>,
}

struct CachedEvent {
    event: Event,
    chain_depth: u32,
}

impl LaunchRulesEngine {
    /// Create a new engine using the specified configuration.
    pub fn new(config: RulesEngineConfig) -> Self {
        LaunchRulesEngine {
            inner: Arc::new(EngineInner {
                consequences: ConsequenceProcessor::new(config.max_chained_dispatch),
                name: config.name,
                sdk_version: config.sdk_version,
                dispatcher: config.dispatcher,
                shared_state: config.shared_state,
                event_history: config.event_history,
                interceptor: RwLock::new(None),
                state: Mutex::new(EngineState {
                    rules: Arc::new(RuleSnapshot::default()),
                    cached_events: Some(VecDeque::new()),
                    replaying: false,
                    pending: VecDeque::new(),
                }),
            }),
        }
    }

    /// Name the engine was configured with.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register the interceptor that receives matched re-evaluable schema rules. Replaces any
    /// previously registered interceptor.
    pub fn set_reevaluation_interceptor(
        &self,
        interceptor: impl ReevaluationInterceptor + Send + Sync + 'static,
    ) {
        *self
            .inner
            .interceptor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(interceptor));
    }

    /// Run `event` through the rules and return it with attached/modified data.
    ///
    /// Events produced by consequences are passed to the dispatcher before this returns, unless
    /// cached events are being replayed at the same time; they are then dispatched right after
    /// the replay. The dispatcher is called without any engine lock held, so it may process events
    /// synchronously.
    pub fn process_event(&self, event: &Event) -> Event {
        let inner = &self.inner;
        let chain_depth = inner.consequences.take_chain_depth(event);

        let snapshot = {
            let mut state = inner.lock_state();
            if let Some(cached_events) = &mut state.cached_events {
                cached_events.push_back(CachedEvent {
                    event: event.clone(),
                    chain_depth,
                });
            }
            Arc::clone(&state.rules)
        };

        let tokens = inner.token_finder(event);
        let matched = inner.matching_rules(&snapshot, &tokens);
        log::trace!(target: "launch_rules",
                    event_id = event.unique_identifier(),
                    event_type = event.event_type(),
                    rules_version = snapshot.version,
                    matched = matched.len();
                    "evaluated event");
        if matched.is_empty() {
            return event.clone();
        }

        let interceptor = inner.interceptor();
        let (held, immediate): (Vec<_>, Vec<_>) = match interceptor {
            Some(_) => matched
                .into_iter()
                .partition(|rule| rule.is_held_for_reevaluation()),
            None => (Vec::new(), matched),
        };

        let mut outbox = Vec::new();
        let processed = inner.consequences.process(
            event,
            &immediate,
            chain_depth,
            &mut outbox,
            |event, _| inner.boxed_tokens(event),
        );
        inner.deliver(outbox);

        if let Some(interceptor) = interceptor.filter(|_| !held.is_empty()) {
            log::debug!(target: "launch_rules",
                        event_id = event.unique_identifier(),
                        held = held.len();
                        "holding rules for reevaluation");
            let completion =
                ReevaluationCompletion::new(Arc::downgrade(&self.inner), event.clone(), chain_depth);
            interceptor.on_reevaluation_triggered(event, &held, completion);
        }

        processed
    }

    /// Return rules matching `event` without applying any consequences.
    pub fn evaluate_event(&self, event: &Event) -> Vec<Arc<LaunchRule>> {
        let snapshot = self.rules();
        let tokens = self.inner.token_finder(event);
        self.inner.matching_rules(&snapshot, &tokens)
    }

    /// Replace all rules.
    ///
    /// `None` is ignored. The first call with a rule list (an empty list included) dispatches a
    /// reset event and replays cached events against the new rules. Only events dispatched by
    /// consequences survive a replay; data changes to replayed events are discarded.
    ///
    /// The reset event and the replay output reach the dispatcher before any event produced by
    /// processing that started after the rules were replaced.
    pub fn replace_rules(&self, rules: Option<Vec<LaunchRule>>) {
        let Some(rules) = rules else {
            log::debug!(target: "launch_rules", engine = self.inner.name.as_str(); "ignoring missing rules");
            return;
        };

        let inner = &self.inner;
        let mut replay = None;
        {
            let mut state = inner.lock_state();
            let snapshot = Arc::new(RuleSnapshot {
                version: state.rules.version + 1,
                rules: rules.into_iter().map(Arc::new).collect(),
            });
            log::debug!(target: "launch_rules",
                        engine = inner.name.as_str(),
                        version = snapshot.version,
                        count = snapshot.rules.len();
                        "replacing rules");
            state.rules = Arc::clone(&snapshot);

            if let Some(cached_events) = state.cached_events.take() {
                state.replaying = true;
                let mut outbox = vec![inner.reset_event()];
                log::debug!(target: "launch_rules",
                            engine = inner.name.as_str(),
                            count = cached_events.len();
                            "replaying cached events");
                for cached in cached_events {
                    let matched = inner.matching_rules(&snapshot, &inner.token_finder(&cached.event));
                    inner.consequences.process(
                        &cached.event,
                        &matched,
                        cached.chain_depth,
                        &mut outbox,
                        |event, _| inner.boxed_tokens(event),
                    );
                }
                replay = Some(outbox);
            }
        }
        if let Some(outbox) = replay {
            inner.finish_replay(outbox);
        }
    }

    /// Parse a JSON rules document and replace all rules with it. On a parse error the current
    /// rules are kept.
    pub fn replace_rules_from_json(&self, json: &[u8]) -> Result<()> {
        let rules = parse_rules(json)?;
        self.replace_rules(Some(rules));
        Ok(())
    }

    /// Append rules to the current rule set. Does not replay cached events.
    pub fn add_rules(&self, rules: Vec<LaunchRule>) {
        let mut state = self.inner.lock_state();
        let snapshot = RuleSnapshot {
            version: state.rules.version + 1,
            rules: state
                .rules
                .rules
                .iter()
                .cloned()
                .chain(rules.into_iter().map(Arc::new))
                .collect(),
        };
        log::debug!(target: "launch_rules",
                    engine = self.inner.name.as_str(),
                    version = snapshot.version,
                    count = snapshot.rules.len();
                    "adding rules");
        state.rules = Arc::new(snapshot);
    }

    /// Return the current rule set.
    pub fn rules(&self) -> Arc<RuleSnapshot> {
        Arc::clone(&self.inner.lock_state().rules)
    }

    /// Number of events waiting for the first rule set. `0` once rules are set.
    pub fn cached_event_count(&self) -> usize {
        self.inner
            .lock_state()
            .cached_events
            .as_ref()
            .map_or(0, VecDeque::len)
    }
}

impl EngineInner {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn interceptor(&self) -> Option<Arc<dyn ReevaluationInterceptor + Send + Sync>> {
        self.interceptor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn token_finder<'a>(&'a self, event: &'a Event) -> LaunchTokenFinder<'a> {
        LaunchTokenFinder::new(
            event,
            self.shared_state
                .as_deref()
                .map(|provider| provider as &dyn SharedStateProvider),
            &self.sdk_version,
        )
    }

    fn boxed_tokens<'a>(&'a self, event: &'a Event) -> Box<dyn TokenFinder + 'a> {
        Box::new(self.token_finder(event))
    }

    fn matching_rules(
        &self,
        snapshot: &RuleSnapshot,
        tokens: &LaunchTokenFinder,
    ) -> Vec<Arc<LaunchRule>> {
        let context = EvaluationContext {
            tokens,
            history: self
                .event_history
                .as_deref()
                .map(|history| history as &dyn EventHistory),
        };
        snapshot
            .rules
            .iter()
            .filter(|rule| rule.matches(&context))
            .cloned()
            .collect()
    }

    fn reset_event(&self) -> Event {
        let mut data = EventData::new();
        data.insert("name".to_owned(), json!(self.name));
        Event::builder(
            format!("{} rules engine", self.name),
            event_type::RULES_ENGINE,
            event_source::REQUEST_RESET,
        )
        .with_data(data)
        .build()
    }

    fn dispatch_all(&self, outbox: impl IntoIterator<Item = Event>) {
        for event in outbox {
            self.dispatcher.dispatch(event);
        }
    }

    /// Dispatch `outbox`, or queue it behind a replay in progress.
    fn deliver(&self, outbox: Vec<Event>) {
        if outbox.is_empty() {
            return;
        }
        {
            let mut state = self.lock_state();
            if state.replaying {
                state.pending.extend(outbox);
                return;
            }
        }
        self.dispatch_all(outbox);
    }

    /// Dispatch the replay output, then everything queued behind it until the queue stays empty.
    fn finish_replay(&self, outbox: Vec<Event>) {
        let _guard = ReplayGuard(self);
        let mut batch = VecDeque::from(outbox);
        loop {
            self.dispatch_all(batch);
            let mut state = self.lock_state();
            if state.pending.is_empty() {
                state.replaying = false;
                break;
            }
            batch = std::mem::take(&mut state.pending);
        }
    }

    /// Apply consequences of held rules that match `event` under the current rules.
    pub(crate) fn reevaluate(&self, event: &Event, chain_depth: u32) {
        let snapshot = Arc::clone(&self.lock_state().rules);
        let tokens = self.token_finder(event);
        let held = self
            .matching_rules(&snapshot, &tokens)
            .into_iter()
            .filter(|rule| rule.is_held_for_reevaluation())
            .collect::<Vec<_>>();
        log::debug!(target: "launch_rules",
                    event_id = event.unique_identifier(),
                    matched = held.len();
                    "reevaluating held rules");

        let mut outbox = Vec::new();
        self.consequences
            .process(event, &held, chain_depth, &mut outbox, |event, _| {
                self.boxed_tokens(event)
            });
        self.deliver(outbox);
    }
}

/// Ends a replay if the dispatcher panics mid-way, so later events are not queued forever.
struct ReplayGuard<'a>(&'a EngineInner);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        let mut state = self.0.lock_state();
        let dropped = state.pending.len();
        state.pending.clear();
        state.replaying = false;
        log::warn!(target: "launch_rules", dropped; "dispatcher panicked during replay");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier, Mutex, OnceLock};

    use serde_json::{json, Value};

    use super::LaunchRulesEngine;
    use crate::{
        extension_api::{EventHistory, EventHistoryRequest, EventHistoryResult},
        reevaluation::ReevaluationCompletion,
        rules::{Condition, ConsequenceKind, LaunchRule, Logic, Matcher, RuleConsequence, RuleMeta},
        Event, EventData, RulesEngineConfig,
    };

    type Recorded = Arc<Mutex<Vec<Event>>>;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn engine() -> (LaunchRulesEngine, Recorded) {
        engine_with(RulesEngineConfig::new("test"))
    }

    fn engine_with(config: RulesEngineConfig) -> (LaunchRulesEngine, Recorded) {
        init();
        let recorded: Recorded = Arc::default();
        let sink = Arc::clone(&recorded);
        let engine = config
            .with_dispatcher(move |event: Event| sink.lock().unwrap().push(event))
            .to_engine();
        (engine, recorded)
    }

    fn data(value: Value) -> EventData {
        value.as_object().cloned().unwrap()
    }

    fn event(event_type: &str) -> Event {
        Event::builder("test", event_type, "com.test.source")
            .with_data(data(json!({"key": "value"})))
            .build()
    }

    fn type_rule(event_type: &str, consequences: Vec<(ConsequenceKind, Value)>) -> LaunchRule {
        LaunchRule::new(
            Condition::matcher("~type", Matcher::Eq, &[json!(event_type)]).unwrap(),
            consequences
                .into_iter()
                .enumerate()
                .map(|(i, (kind, detail))| RuleConsequence::new(format!("c{i}"), kind, data(detail)))
                .collect(),
            RuleMeta::default(),
        )
    }

    fn postback_rule(event_type: &str) -> LaunchRule {
        type_rule(
            event_type,
            vec![(
                ConsequenceKind::Other("pb".to_owned()),
                json!({"templateurl": "https://x.test/?t={%~type%}"}),
            )],
        )
    }

    fn names(recorded: &Recorded) -> Vec<String> {
        recorded
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.name().to_owned())
            .collect()
    }

    #[test]
    fn empty_rules_still_replay_cache() {
        let (engine, recorded) = engine();
        engine.process_event(&event("a"));
        engine.process_event(&event("b"));
        assert_eq!(engine.cached_event_count(), 2);

        engine.replace_rules(Some(vec![]));

        assert_eq!(engine.cached_event_count(), 0);
        assert_eq!(engine.rules().version(), 1);
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].name(), "test rules engine");
        assert_eq!(recorded[0].event_type(), "com.adobe.eventType.rulesEngine");
        assert_eq!(recorded[0].source(), "com.adobe.eventSource.requestReset");
        assert_eq!(recorded[0].data(), Some(&data(json!({"name": "test"}))));
    }

    #[test]
    fn cached_events_replay_in_order_after_reset() {
        let (engine, recorded) = engine();
        let first = event("a");
        let second = event("a");
        let third = event("b");
        for event in [&first, &second, &third] {
            engine.process_event(event);
        }
        assert!(recorded.lock().unwrap().is_empty());

        engine.replace_rules(Some(vec![postback_rule("a")]));

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[0].name(), "test rules engine");
        assert_eq!(recorded[1].parent_id(), Some(first.unique_identifier()));
        assert_eq!(recorded[2].parent_id(), Some(second.unique_identifier()));
        assert_eq!(
            recorded[1].data().unwrap()["triggeredconsequence"]["detail"]["templateurl"],
            json!("https://x.test/?t=a")
        );
    }

    #[test]
    fn replace_with_none_keeps_engine_unset() {
        let (engine, recorded) = engine();
        engine.process_event(&event("a"));

        engine.replace_rules(None);

        assert_eq!(engine.cached_event_count(), 1);
        assert_eq!(engine.rules().version(), 0);
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[test]
    fn second_replace_does_not_reset_again() {
        let (engine, recorded) = engine();
        engine.replace_rules(Some(vec![]));
        engine.process_event(&event("a"));
        engine.replace_rules(Some(vec![postback_rule("a")]));

        assert_eq!(names(&recorded), vec!["test rules engine"]);
        assert_eq!(engine.rules().version(), 2);
        assert_eq!(engine.rules().rules().len(), 1);
    }

    #[test]
    fn add_rules_does_not_replay() {
        let (engine, recorded) = engine();
        engine.process_event(&event("b"));

        engine.add_rules(vec![postback_rule("a")]);

        assert_eq!(engine.cached_event_count(), 1);
        assert!(recorded.lock().unwrap().is_empty());

        engine.replace_rules(Some(vec![]));
        engine.add_rules(vec![postback_rule("a")]);
        engine.add_rules(vec![postback_rule("b")]);
        assert_eq!(engine.rules().rules().len(), 2);
        assert_eq!(engine.rules().version(), 4);
    }

    #[test]
    fn processes_attach_and_modify() {
        let (engine, _) = engine();
        engine.replace_rules(Some(vec![type_rule(
            "a",
            vec![
                (ConsequenceKind::Add, json!({"eventdata": {"key": "ignored", "added": "{%key%}"}})),
                (ConsequenceKind::Mod, json!({"eventdata": {"key": null}})),
            ],
        )]));

        let processed = engine.process_event(&event("a"));

        assert_eq!(processed.data(), Some(&data(json!({"added": "value"}))));
        let untouched = event("b");
        assert_eq!(engine.process_event(&untouched), untouched);
    }

    #[test]
    fn dispatch_chain_stops_at_limit() {
        let (engine, recorded) = engine();
        engine.replace_rules(Some(vec![type_rule(
            "a",
            vec![(
                ConsequenceKind::Dispatch,
                json!({"type": "a", "source": "com.test.source", "eventdataaction": "copy"}),
            )],
        )]));
        recorded.lock().unwrap().clear();

        engine.process_event(&event("a"));
        let dispatched = recorded.lock().unwrap().pop().unwrap();
        assert_eq!(dispatched.name(), "Dispatch Consequence Result");

        engine.process_event(&dispatched);
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[test]
    fn dispatch_chain_respects_configured_limit() {
        let (engine, recorded) =
            engine_with(RulesEngineConfig::new("test").with_max_chained_dispatch(3));
        engine.replace_rules(Some(vec![type_rule(
            "a",
            vec![(
                ConsequenceKind::Dispatch,
                json!({"type": "a", "source": "s", "eventdataaction": "new"}),
            )],
        )]));
        recorded.lock().unwrap().clear();

        let mut next = Some(event("a"));
        let mut dispatched = 0;
        while let Some(event) = next.take() {
            engine.process_event(&event);
            next = recorded.lock().unwrap().pop();
            dispatched += usize::from(next.is_some());
        }
        assert_eq!(dispatched, 3);
    }

    #[test]
    fn reentrant_dispatcher() {
        init();
        let slot: Arc<OnceLock<LaunchRulesEngine>> = Arc::default();
        let recorded: Recorded = Arc::default();
        let engine = {
            let slot = Arc::clone(&slot);
            let recorded = Arc::clone(&recorded);
            RulesEngineConfig::new("test")
                .with_dispatcher(move |event: Event| {
                    recorded.lock().unwrap().push(event.clone());
                    if let Some(engine) = slot.get() {
                        engine.process_event(&event);
                    }
                })
                .to_engine()
        };
        let _ = slot.set(engine.clone());
        engine.replace_rules(Some(vec![type_rule(
            "a",
            vec![(
                ConsequenceKind::Dispatch,
                json!({"type": "a", "source": "s", "eventdataaction": "copy"}),
            )],
        )]));

        engine.process_event(&event("a"));

        assert_eq!(
            names(&recorded),
            vec!["test rules engine", "Dispatch Consequence Result"]
        );
    }

    fn schema_rule() -> LaunchRule {
        let mut rule = type_rule(
            "a",
            vec![
                (ConsequenceKind::Add, json!({"eventdata": {"added": true}})),
                (ConsequenceKind::Schema, json!({"id": "message", "data": {"text": "{%key%}"}})),
            ],
        );
        rule.meta.re_evaluable = true;
        rule
    }

    #[test]
    fn held_rules_wait_for_completion() {
        let (engine, recorded) = engine();
        engine.replace_rules(Some(vec![schema_rule(), postback_rule("a")]));
        recorded.lock().unwrap().clear();

        let held: Arc<Mutex<Vec<(usize, ReevaluationCompletion)>>> = Arc::default();
        {
            let held = Arc::clone(&held);
            engine.set_reevaluation_interceptor(
                move |_event: &Event, rules: &[Arc<LaunchRule>], completion: ReevaluationCompletion| {
                    held.lock().unwrap().push((rules.len(), completion));
                },
            );
        }

        let processed = engine.process_event(&event("a"));

        // The held rule is not split: its attach consequence waits too.
        assert_eq!(processed.data(), Some(&data(json!({"key": "value"}))));
        assert_eq!(names(&recorded), vec!["Rules Consequence Event"]);
        let (count, completion) = held.lock().unwrap().pop().unwrap();
        assert_eq!(count, 1);

        recorded.lock().unwrap().clear();
        completion.clone().complete();
        completion.complete();

        assert!(completion.is_completed());
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(
            recorded[0].data().unwrap()["triggeredconsequence"],
            json!({"id": "c1", "type": "schema", "detail": {"id": "message", "data": {"text": "value"}}})
        );
    }

    #[test]
    fn held_rules_run_immediately_without_interceptor() {
        let (engine, recorded) = engine();
        engine.replace_rules(Some(vec![schema_rule()]));
        recorded.lock().unwrap().clear();

        let processed = engine.process_event(&event("a"));

        assert_eq!(processed.data().unwrap()["added"], json!(true));
        assert_eq!(names(&recorded), vec!["Rules Consequence Event"]);
    }

    #[test]
    fn completion_after_engine_dropped_is_ignored() {
        let (engine, recorded) = engine();
        engine.replace_rules(Some(vec![schema_rule()]));
        recorded.lock().unwrap().clear();
        let held: Arc<Mutex<Option<ReevaluationCompletion>>> = Arc::default();
        {
            let held = Arc::clone(&held);
            engine.set_reevaluation_interceptor(
                move |_event: &Event, _rules: &[Arc<LaunchRule>], completion: ReevaluationCompletion| {
                    *held.lock().unwrap() = Some(completion);
                },
            );
        }
        engine.process_event(&event("a"));
        drop(engine);

        let completion = held.lock().unwrap().take().unwrap();
        completion.complete();
        assert!(recorded.lock().unwrap().is_empty());
    }

    #[test]
    fn malformed_rule_does_not_block_others() {
        let (engine, _) = engine();
        let json = std::fs::read("tests/data/rules/rules-malformed.json").unwrap();

        engine.replace_rules_from_json(&json).unwrap();

        assert_eq!(engine.rules().rules().len(), 1);
    }

    #[test]
    fn unreadable_document_keeps_engine_unset() {
        let (engine, _) = engine();
        engine.process_event(&event("a"));

        assert!(engine.replace_rules_from_json(b"{").is_err());

        assert_eq!(engine.cached_event_count(), 1);
    }

    #[test]
    fn evaluates_rules_fixture() {
        let (engine, _) = engine();
        let json = std::fs::read("tests/data/rules/rules-v1.json").unwrap();
        engine.replace_rules_from_json(&json).unwrap();

        let launch = Event::builder(
            "Lifecycle Response",
            "com.adobe.eventType.lifecycle",
            "com.adobe.eventSource.responseContent",
        )
        .with_data(data(json!({"lifecyclecontextdata": {"launches": 1}})))
        .build();

        let matched = engine.evaluate_event(&launch);
        assert_eq!(matched.len(), 2);
        assert_eq!(matched[0].consequences[0].kind, ConsequenceKind::Add);
        assert_eq!(matched[1].consequences[0].kind, ConsequenceKind::Dispatch);
    }

    struct FixedHistory(i64);

    impl EventHistory for FixedHistory {
        fn query(
            &self,
            requests: &[EventHistoryRequest],
            _enforce_order: bool,
        ) -> Option<Vec<EventHistoryResult>> {
            Some(
                requests
                    .iter()
                    .map(|_| EventHistoryResult {
                        count: self.0,
                        ..Default::default()
                    })
                    .collect(),
            )
        }
    }

    #[test]
    fn historical_condition_uses_configured_history() {
        let rule = LaunchRule::new(
            Condition::historical(
                vec![EventHistoryRequest {
                    mask: data(json!({"action": "purchase"})),
                    from: 0,
                    to: 0,
                }],
                Default::default(),
                Matcher::Ge,
                3,
            ),
            vec![],
            RuleMeta::default(),
        );

        let (with_history, _) =
            engine_with(RulesEngineConfig::new("test").with_event_history(FixedHistory(3)));
        with_history.replace_rules(Some(vec![rule.clone()]));
        assert_eq!(with_history.evaluate_event(&event("a")).len(), 1);

        let (without_history, _) = engine();
        without_history.replace_rules(Some(vec![rule]));
        assert!(without_history.evaluate_event(&event("a")).is_empty());
    }

    #[test]
    fn group_rule_matches_any_event() {
        let (engine, _) = engine();
        engine.replace_rules(Some(vec![LaunchRule::new(
            Condition::group(Logic::And, vec![]),
            vec![],
            RuleMeta::default(),
        )]));
        assert_eq!(engine.evaluate_event(&event("anything")).len(), 1);
    }

    #[test]
    fn concurrent_events_are_processed_exactly_once() {
        let (engine, recorded) = engine();
        let rules = vec![postback_rule("a")];

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let engine = engine.clone();
                scope.spawn(move || {
                    for _ in 0..50 {
                        engine.process_event(&event("a"));
                    }
                });
            }
            scope.spawn(|| engine.replace_rules(Some(rules)));
        });

        let names = names(&recorded);
        assert_eq!(names.iter().filter(|name| *name == "test rules engine").count(), 1);
        assert_eq!(
            names
                .iter()
                .filter(|name| *name == "Rules Consequence Event")
                .count(),
            200
        );
        assert_eq!(engine.cached_event_count(), 0);
    }

    #[test]
    fn live_event_during_replay_is_dispatched_after_it() {
        init();
        let slot: Arc<OnceLock<LaunchRulesEngine>> = Arc::default();
        let recorded: Recorded = Arc::default();
        let live = event("a");
        let engine = {
            let slot = Arc::clone(&slot);
            let recorded = Arc::clone(&recorded);
            let live = live.clone();
            RulesEngineConfig::new("test")
                .with_dispatcher(move |event: Event| {
                    let reset = event.source() == "com.adobe.eventSource.requestReset";
                    recorded.lock().unwrap().push(event);
                    if let Some(engine) = slot.get().filter(|_| reset) {
                        let engine = engine.clone();
                        let live = live.clone();
                        std::thread::spawn(move || {
                            engine.process_event(&live);
                        })
                        .join()
                        .unwrap();
                    }
                })
                .to_engine()
        };
        let _ = slot.set(engine.clone());
        let cached = event("a");
        engine.process_event(&cached);

        engine.replace_rules(Some(vec![postback_rule("a")]));

        let parents = recorded
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.parent_id().map(str::to_owned))
            .collect::<Vec<_>>();
        assert_eq!(
            parents,
            vec![
                None,
                Some(cached.unique_identifier().to_owned()),
                Some(live.unique_identifier().to_owned()),
            ]
        );
    }

    #[test]
    fn replay_output_precedes_concurrent_live_output() {
        let (engine, recorded) = engine();
        let cached = (0..20).map(|_| event("a")).collect::<Vec<_>>();
        for event in &cached {
            engine.process_event(event);
        }
        let live: Mutex<Vec<String>> = Mutex::default();
        let barrier = Barrier::new(5);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let engine = engine.clone();
                let (live, barrier) = (&live, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        let event = event("a");
                        // Rules already replaced: this event cannot be in the cache.
                        let after_replace = engine.rules().version() == 1;
                        engine.process_event(&event);
                        if after_replace {
                            live.lock().unwrap().push(event.unique_identifier().to_owned());
                        }
                    }
                });
            }
            barrier.wait();
            engine.replace_rules(Some(vec![postback_rule("a")]));
        });

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 1 + 20 + 200);
        assert_eq!(recorded[0].name(), "test rules engine");
        assert_eq!(
            recorded[1..=20]
                .iter()
                .map(|event| event.parent_id())
                .collect::<Vec<_>>(),
            cached
                .iter()
                .map(|event| Some(event.unique_identifier()))
                .collect::<Vec<_>>()
        );
        let position = |id: &str| {
            recorded
                .iter()
                .position(|event| event.parent_id() == Some(id))
                .unwrap()
        };
        let last_cached = position(cached[19].unique_identifier());
        for id in live.lock().unwrap().iter() {
            assert!(position(id) > last_cached, "live event {id} dispatched before replay");
        }
    }

    #[test]
    fn reentrant_processing_during_replay_is_queued_behind_it() {
        init();
        let slot: Arc<OnceLock<LaunchRulesEngine>> = Arc::default();
        let recorded: Recorded = Arc::default();
        let engine = {
            let slot = Arc::clone(&slot);
            let recorded = Arc::clone(&recorded);
            RulesEngineConfig::new("test")
                .with_dispatcher(move |event: Event| {
                    let reset = event.source() == "com.adobe.eventSource.requestReset";
                    recorded.lock().unwrap().push(event);
                    if let Some(engine) = slot.get().filter(|_| reset) {
                        engine.process_event(&Event::builder("live", "a", "s").build());
                    }
                })
                .to_engine()
        };
        let _ = slot.set(engine.clone());
        engine.process_event(&event("a"));

        engine.replace_rules(Some(vec![postback_rule("a")]));

        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), 3);
        assert_eq!(recorded[1].parent_id().map(str::len), Some(36));
        assert_ne!(recorded[1].parent_id(), recorded[2].parent_id());
    }
}
