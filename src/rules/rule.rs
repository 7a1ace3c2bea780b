use crate::event::EventData;

use super::{Condition, EvaluationContext};

/// A rule: a condition and the consequences applied when it matches.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRule {
    #[allow(missing_docs)]
    pub condition: Condition,
    /// Consequences in the order they are applied.
    pub consequences: Vec<RuleConsequence>,
    #[allow(missing_docs)]
    pub meta: RuleMeta,
}

impl LaunchRule {
    #[allow(missing_docs)]
    pub fn new(condition: Condition, consequences: Vec<RuleConsequence>, meta: RuleMeta) -> Self {
        LaunchRule {
            condition,
            consequences,
            meta,
        }
    }

    #[allow(missing_docs)]
    pub fn matches(&self, context: &EvaluationContext) -> bool {
        self.condition.eval(context)
    }

    /// A re-evaluable rule with a schema consequence waits for the reevaluation interceptor
    /// before any of its consequences are applied.
    pub fn is_held_for_reevaluation(&self) -> bool {
        self.meta.re_evaluable
            && self
                .consequences
                .iter()
                .any(|consequence| consequence.kind == ConsequenceKind::Schema)
    }
}

/// Rule metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuleMeta {
    /// Whether the rule may be re-evaluated after the reevaluation interceptor completes.
    pub re_evaluable: bool,
}

/// An effect triggered by a matched rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleConsequence {
    #[allow(missing_docs)]
    pub id: String,
    #[allow(missing_docs)]
    pub kind: ConsequenceKind,
    /// Consequence payload. String values may contain `{%...%}` tokens.
    pub detail: EventData,
}

impl RuleConsequence {
    #[allow(missing_docs)]
    pub fn new(id: impl Into<String>, kind: ConsequenceKind, detail: EventData) -> Self {
        RuleConsequence {
            id: id.into(),
            kind,
            detail,
        }
    }
}

/// Kind of a consequence, parsed from its `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConsequenceKind {
    /// `add`: attach data to the triggering event without overwriting.
    Add,
    /// `mod`: modify data of the triggering event.
    Mod,
    /// `dispatch`: dispatch a new event.
    Dispatch,
    /// `schema`: schema-based consequence, subject to reevaluation.
    Schema,
    /// `url`: postback whose token values are URL-encoded.
    Url,
    /// Any other tag (`pb`, `pii`, `csp`, ...), forwarded as a consequence event.
    Other(String),
}

impl ConsequenceKind {
    #[allow(missing_docs)]
    pub fn from_tag(tag: &str) -> ConsequenceKind {
        match tag {
            "add" => ConsequenceKind::Add,
            "mod" => ConsequenceKind::Mod,
            "dispatch" => ConsequenceKind::Dispatch,
            "schema" => ConsequenceKind::Schema,
            "url" => ConsequenceKind::Url,
            other => ConsequenceKind::Other(other.to_owned()),
        }
    }

    /// Wire tag of the consequence.
    pub fn tag(&self) -> &str {
        match self {
            ConsequenceKind::Add => "add",
            ConsequenceKind::Mod => "mod",
            ConsequenceKind::Dispatch => "dispatch",
            ConsequenceKind::Schema => "schema",
            ConsequenceKind::Url => "url",
            ConsequenceKind::Other(tag) => tag,
        }
    }
}
