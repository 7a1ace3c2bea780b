use serde_json::Value;

use crate::{
    extension_api::{EventHistory, EventHistoryRequest},
    token::{TokenFinder, TokenOperand, Transformer},
};

use super::{Logic, Matcher, SearchType};

/// Everything a condition needs to evaluate against an event.
pub struct EvaluationContext<'a> {
    /// Resolves token keys for the event being evaluated.
    pub tokens: &'a dyn TokenFinder,
    /// Event history for historical conditions. Historical conditions see `-1` without it.
    pub history: Option<&'a dyn EventHistory>,
}

/// A compiled rule condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition(Node);

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Matcher {
        operand: TokenOperand,
        matcher: Matcher,
        value: Value,
    },
    Group {
        logic: Logic,
        conditions: Vec<Condition>,
    },
    Historical {
        requests: Vec<EventHistoryRequest>,
        search_type: SearchType,
        matcher: Matcher,
        value: i64,
    },
}

impl Condition {
    /// Compare the token `key` against `values`, matching if any comparison holds.
    ///
    /// With no values, the token is compared against an empty string. The token's value is
    /// coerced to the type of each literal before comparison. Returns `None` if a value is not a
    /// string, number, or boolean.
    pub fn matcher(key: &str, matcher: Matcher, values: &[Value]) -> Option<Condition> {
        if matcher.is_unary() {
            return Some(Condition(Node::Matcher {
                operand: TokenOperand::new(key, None),
                matcher,
                value: Value::Null,
            }));
        }

        match values {
            [] => Condition::comparison(key, matcher, &Value::String(String::new())),
            [value] => Condition::comparison(key, matcher, value),
            values => {
                let conditions = values
                    .iter()
                    .map(|value| Condition::comparison(key, matcher, value))
                    .collect::<Option<Vec<_>>>()?;
                Some(Condition::group(Logic::Or, conditions))
            }
        }
    }

    fn comparison(key: &str, matcher: Matcher, value: &Value) -> Option<Condition> {
        let transformer = match value {
            Value::String(_) => Transformer::String,
            Value::Number(n) if n.is_f64() => Transformer::Double,
            Value::Number(_) => Transformer::Int,
            Value::Bool(_) => Transformer::Bool,
            _ => {
                log::warn!(target: "launch_rules", key; "unsupported matcher value type: {value}");
                return None;
            }
        };
        Some(Condition(Node::Matcher {
            operand: TokenOperand::new(key, Some(transformer)),
            matcher,
            value: value.clone(),
        }))
    }

    /// Combine `conditions` with `logic`. An empty `and` is true, an empty `or` is false.
    pub fn group(logic: Logic, conditions: Vec<Condition>) -> Condition {
        Condition(Node::Group { logic, conditions })
    }

    /// Query event history and compare the aggregated result against `value`.
    pub fn historical(
        requests: Vec<EventHistoryRequest>,
        search_type: SearchType,
        matcher: Matcher,
        value: i64,
    ) -> Condition {
        Condition(Node::Historical {
            requests,
            search_type,
            matcher,
            value,
        })
    }

    #[allow(missing_docs)]
    pub fn eval(&self, context: &EvaluationContext) -> bool {
        match &self.0 {
            Node::Matcher {
                operand,
                matcher,
                value,
            } => matcher.eval(operand.resolve(context.tokens).as_ref(), value),
            Node::Group { logic, conditions } => match logic {
                Logic::And => conditions.iter().all(|condition| condition.eval(context)),
                Logic::Or => conditions.iter().any(|condition| condition.eval(context)),
            },
            Node::Historical {
                requests,
                search_type,
                matcher,
                value,
            } => {
                let result = query_history(context.history, requests, *search_type);
                matcher.eval(Some(&Value::from(result)), &Value::from(*value))
            }
        }
    }
}

fn query_history(
    history: Option<&dyn EventHistory>,
    requests: &[EventHistoryRequest],
    search_type: SearchType,
) -> i64 {
    let Some(history) = history else {
        log::debug!(target: "launch_rules", "no event history available for historical condition");
        return -1;
    };
    let Some(results) = history.query(requests, search_type == SearchType::Ordered) else {
        return -1;
    };

    match search_type {
        SearchType::Any => results.iter().map(|result| result.count).sum(),
        SearchType::Ordered => {
            let matched = !results.is_empty()
                && results.len() == requests.len()
                && results.iter().all(|result| result.count > 0);
            i64::from(matched)
        }
        SearchType::MostRecent => results
            .iter()
            .enumerate()
            .filter(|(_, result)| result.count > 0)
            .max_by_key(|(_, result)| result.newest.unwrap_or(i64::MIN))
            .map(|(index, _)| index as i64)
            .unwrap_or(-1),
    }
}

impl Matcher {
    /// Apply the matcher. Returns `false` if it cannot be applied to the operands.
    fn eval(self, lhs: Option<&Value>, rhs: &Value) -> bool {
        self.try_eval(lhs, rhs).unwrap_or(false)
    }

    /// Try applying the matcher, returning `None` on absent operands or a type mismatch.
    fn try_eval(self, lhs: Option<&Value>, rhs: &Value) -> Option<bool> {
        match self {
            Matcher::Ex => Some(lhs.is_some_and(|value| !value.is_null())),
            Matcher::Nx => Some(lhs.map_or(true, Value::is_null)),

            Matcher::Eq | Matcher::Ne => {
                let equal = match (lhs?, rhs) {
                    (Value::String(a), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
                    (Value::Number(a), Value::Number(b)) => a.as_f64()? == b.as_f64()?,
                    (Value::Bool(a), Value::Bool(b)) => a == b,
                    _ => return None,
                };
                Some(equal == (self == Matcher::Eq))
            }

            Matcher::Gt | Matcher::Ge | Matcher::Lt | Matcher::Le => {
                let a = lhs?.as_f64()?;
                let b = rhs.as_f64()?;
                Some(match self {
                    Matcher::Gt => a > b,
                    Matcher::Ge => a >= b,
                    Matcher::Lt => a < b,
                    Matcher::Le => a <= b,
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }

            Matcher::Co | Matcher::Nc | Matcher::Sw | Matcher::Ew => {
                let a = lhs?.as_str()?.to_lowercase();
                let b = rhs.as_str()?.to_lowercase();
                Some(match self {
                    Matcher::Co => a.contains(&b),
                    Matcher::Nc => !a.contains(&b),
                    Matcher::Sw => a.starts_with(&b),
                    Matcher::Ew => a.ends_with(&b),
                    _ => {
                        // unreachable
                        return None;
                    }
                })
            }
        }
    }
}
