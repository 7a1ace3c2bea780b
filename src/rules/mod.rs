//! Rule model, condition evaluation, and parsing of the JSON rules document.
mod condition;
mod models;
mod parser;
mod rule;

pub use condition::{Condition, EvaluationContext};
pub use models::{Logic, Matcher, SearchType};
pub use parser::parse_rules;
pub use rule::{ConsequenceKind, LaunchRule, RuleConsequence, RuleMeta};
