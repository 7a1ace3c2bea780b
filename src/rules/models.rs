//! Wire format of the rules document.
use serde::{Deserialize, Serialize};

use crate::event::EventData;

/// Rules document as served by remote configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RulesDocumentWire {
    #[serde(default)]
    pub version: Option<i64>,
    /// Each rule is wrapped in `TryParse` so that one malformed rule does not invalidate the rest.
    pub rules: Vec<TryParse<RuleWire>>,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub(crate) enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed.
    ParseFailed(serde_json::Value),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RuleWire {
    pub condition: ConditionWire,
    #[serde(default)]
    pub consequences: Vec<TryParse<ConsequenceWire>>,
    #[serde(default)]
    pub meta: RuleMetaWire,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RuleMetaWire {
    #[serde(default)]
    pub re_evaluable: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "type", content = "definition", rename_all = "lowercase")]
pub(crate) enum ConditionWire {
    Matcher(MatcherWire),
    Group(GroupWire),
    Historical(HistoricalWire),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MatcherWire {
    pub key: String,
    pub matcher: Matcher,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupWire {
    pub logic: Logic,
    #[serde(default)]
    pub conditions: Vec<ConditionWire>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HistoricalWire {
    pub events: Vec<EventData>,
    #[serde(default)]
    pub from: Option<i64>,
    #[serde(default)]
    pub to: Option<i64>,
    #[serde(default)]
    pub search_type: SearchType,
    pub matcher: Matcher,
    pub value: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConsequenceWire {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub detail: EventData,
}

/// Comparison applied by a matcher or historical condition.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Matcher {
    /// Equal. Strings compare case-insensitively.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than (numbers only).
    Gt,
    /// Greater than or equal (numbers only).
    Ge,
    /// Less than (numbers only).
    Lt,
    /// Less than or equal (numbers only).
    Le,
    /// String contains.
    Co,
    /// String does not contain.
    Nc,
    /// String starts with.
    Sw,
    /// String ends with.
    Ew,
    /// Value exists.
    Ex,
    /// Value does not exist.
    Nx,
}

impl Matcher {
    /// `true` for matchers that only look at the presence of a value.
    pub fn is_unary(self) -> bool {
        matches!(self, Matcher::Ex | Matcher::Nx)
    }
}

/// How conditions of a group are combined.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    #[allow(missing_docs)]
    And,
    #[allow(missing_docs)]
    Or,
}

/// How a historical condition aggregates event history results.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SearchType {
    /// Total number of matching events across all requests.
    #[default]
    Any,
    /// `1` if the requests matched in order, `0` otherwise.
    Ordered,
    /// Index of the request with the most recent match, `-1` if none matched.
    MostRecent,
}
