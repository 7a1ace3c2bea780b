use crate::{extension_api::EventHistoryRequest, Result};

use super::{
    models::{ConditionWire, ConsequenceWire, RuleWire, RulesDocumentWire, TryParse},
    Condition, ConsequenceKind, LaunchRule, RuleConsequence, RuleMeta,
};

/// Parse a JSON rules document.
///
/// Fails only if the document as a whole is unreadable. Individual rules that fail to parse or
/// compile are logged and left out; so are consequences missing `id`, `type`, or `detail`.
///
/// ```
/// let rules = launch_rules::parse_rules(br#"{
///   "version": 1,
///   "rules": [{
///     "condition": {"type": "matcher", "definition": {"key": "~type", "matcher": "eq", "values": ["com.example.type"]}},
///     "consequences": [{"id": "c1", "type": "add", "detail": {"eventdata": {"added": true}}}]
///   }]
/// }"#).unwrap();
/// assert_eq!(rules.len(), 1);
/// ```
pub fn parse_rules(json: &[u8]) -> Result<Vec<LaunchRule>> {
    let document: RulesDocumentWire = serde_json::from_slice(json).map_err(|err| {
        log::warn!(target: "launch_rules", "failed to parse rules document: {err:?}");
        err
    })?;
    Ok(compile_rules(document))
}

fn compile_rules(document: RulesDocumentWire) -> Vec<LaunchRule> {
    let total = document.rules.len();
    let rules = document
        .rules
        .into_iter()
        .enumerate()
        .filter_map(|(index, rule)| match rule {
            TryParse::Parsed(rule) => compile_rule(index, rule),
            TryParse::ParseFailed(json) => {
                log::warn!(target: "launch_rules", index, rule:serde = json; "skipping rule that failed to parse");
                None
            }
        })
        .collect::<Vec<_>>();

    log::debug!(target: "launch_rules", total, compiled = rules.len(); "compiled rules document");
    rules
}

fn compile_rule(index: usize, rule: RuleWire) -> Option<LaunchRule> {
    let Some(condition) = compile_condition(rule.condition) else {
        log::warn!(target: "launch_rules", index; "skipping rule with invalid condition");
        return None;
    };

    let consequences = rule
        .consequences
        .into_iter()
        .filter_map(|consequence| match consequence {
            TryParse::Parsed(consequence) => Some(compile_consequence(consequence)),
            TryParse::ParseFailed(json) => {
                log::warn!(target: "launch_rules", index, consequence:serde = json; "dropping malformed consequence");
                None
            }
        })
        .collect();

    Some(LaunchRule::new(
        condition,
        consequences,
        RuleMeta {
            re_evaluable: rule.meta.re_evaluable,
        },
    ))
}

fn compile_condition(condition: ConditionWire) -> Option<Condition> {
    match condition {
        ConditionWire::Matcher(matcher) => {
            Condition::matcher(&matcher.key, matcher.matcher, &matcher.values)
        }
        ConditionWire::Group(group) => {
            let conditions = group
                .conditions
                .into_iter()
                .map(compile_condition)
                .collect::<Option<Vec<_>>>()?;
            Some(Condition::group(group.logic, conditions))
        }
        ConditionWire::Historical(historical) => {
            let from = historical.from.unwrap_or(0);
            let to = historical.to.unwrap_or(0);
            let requests = historical
                .events
                .into_iter()
                .map(|mask| EventHistoryRequest { mask, from, to })
                .collect();
            Some(Condition::historical(
                requests,
                historical.search_type,
                historical.matcher,
                historical.value,
            ))
        }
    }
}

fn compile_consequence(consequence: ConsequenceWire) -> RuleConsequence {
    RuleConsequence::new(
        consequence.id,
        ConsequenceKind::from_tag(&consequence.kind),
        consequence.detail,
    )
}
