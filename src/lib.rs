//! A rules engine for mobile analytics SDKs.
//!
//! # Overview
//!
//! A [`LaunchRulesEngine`] evaluates incoming [`Event`]s against a set of rules delivered by remote
//! configuration. Each rule pairs a condition over event data, shared state of other SDK modules,
//! and event history with a list of consequences. Matching rules can attach or modify event data,
//! dispatch new events, or forward consequences (in-app messages, postbacks, ...) to other
//! modules.
//!
//! Events processed before the first rule set arrives are cached and replayed once rules are
//! installed with [`LaunchRulesEngine::replace_rules`].
//!
//! Rules can be installed manually from a JSON document with
//! [`LaunchRulesEngine::replace_rules_from_json`] or downloaded once with a [`RulesFetcher`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. They are only returned while loading rules.
//! Evaluating rules never fails: malformed rules and consequences are logged and skipped.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with the `launch_rules`
//! target. Consider integrating a `log`-compatible logger implementation for better visibility
//! into rule evaluation.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod config;
mod consequence;
mod engine;
mod error;
mod event;
pub mod event_data;
mod extension_api;
mod reevaluation;
pub mod rules;
mod rules_fetcher;
pub mod token;

pub use config::RulesEngineConfig;
pub use engine::{LaunchRulesEngine, RuleSnapshot};
pub use error::{Error, Result};
pub use event::{event_source, event_type, Event, EventBuilder, EventData};
pub use extension_api::{
    EventDispatcher, EventHistory, EventHistoryRequest, EventHistoryResult, SharedStateProvider,
    SharedStateResolution, SharedStateResult, SharedStateStatus,
};
pub use reevaluation::{ReevaluationCompletion, ReevaluationInterceptor};
pub use rules::{parse_rules, LaunchRule};
pub use rules_fetcher::{RulesFetcher, RulesFetcherConfig};
pub use token::{render, LaunchTokenFinder, TokenFinder};
