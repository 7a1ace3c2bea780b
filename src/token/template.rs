use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::event_data::{url_encode, value_to_string};

use super::TokenFinder;

/// Value transformation applied to a resolved token, written as `{%name(key)%}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transformer {
    /// `urlenc`: percent-encoded string form.
    UrlEncode,
    /// `int`: integer coercion.
    Int,
    /// `double`: floating point coercion.
    Double,
    /// `string`: string form.
    String,
    /// `bool`: boolean coercion.
    Bool,
}

impl Transformer {
    /// Look up a transformer by its template function name.
    pub fn from_name(name: &str) -> Option<Transformer> {
        Some(match name {
            "urlenc" => Transformer::UrlEncode,
            "int" => Transformer::Int,
            "double" => Transformer::Double,
            "string" => Transformer::String,
            "bool" => Transformer::Bool,
            _ => return None,
        })
    }

    /// Apply the transformation. Returns `None` if the value cannot be coerced.
    pub fn apply(self, value: &Value) -> Option<Value> {
        match self {
            Transformer::UrlEncode => Some(Value::String(url_encode(&value_to_string(value)))),
            Transformer::String => match value {
                Value::Null => None,
                value => Some(Value::String(value_to_string(value))),
            },
            Transformer::Int => {
                let i = match value {
                    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
                    Value::String(s) => {
                        let s = s.trim();
                        s.parse::<i64>()
                            .ok()
                            .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))?
                    }
                    Value::Bool(b) => i64::from(*b),
                    _ => return None,
                };
                Some(Value::from(i))
            }
            Transformer::Double => {
                let f = match value {
                    Value::Number(n) => n.as_f64()?,
                    Value::String(s) => s.trim().parse::<f64>().ok()?,
                    Value::Bool(b) => f64::from(u8::from(*b)),
                    _ => return None,
                };
                serde_json::Number::from_f64(f).map(Value::Number)
            }
            Transformer::Bool => match value {
                Value::Bool(b) => Some(Value::Bool(*b)),
                Value::String(s) if s.eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
                Value::String(s) if s.eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
                Value::Number(n) => n.as_f64().map(|f| Value::Bool(f != 0.0)),
                _ => None,
            },
        }
    }
}

/// A token key with an optional transformer, resolved against a [`TokenFinder`].
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TokenOperand {
    pub key: String,
    pub transformer: Option<Transformer>,
}

impl TokenOperand {
    pub fn new(key: impl Into<String>, transformer: Option<Transformer>) -> TokenOperand {
        TokenOperand {
            key: key.into(),
            transformer,
        }
    }

    /// Parse a token body: either `key` or `fn(key)`. Unknown function names resolve the whole
    /// body as a plain key.
    fn parse(body: &str) -> TokenOperand {
        let body = body.trim();
        if let Some(captures) = function_regex().captures(body) {
            if let Some(transformer) = Transformer::from_name(&captures[1]) {
                return TokenOperand::new(captures[2].trim(), Some(transformer));
            }
        }
        TokenOperand::new(body, None)
    }

    pub fn resolve(&self, finder: &dyn TokenFinder) -> Option<Value> {
        let value = finder.get(&self.key)?;
        match self.transformer {
            Some(transformer) => transformer.apply(&value),
            None => Some(value),
        }
    }
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| Regex::new(r"\{%(.*?)%\}").expect("token pattern is valid"))
}

fn function_regex() -> &'static Regex {
    static FUNCTION: OnceLock<Regex> = OnceLock::new();
    FUNCTION.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9_]+)\((.*)\)$").expect("function pattern is valid")
    })
}

/// Render `template`, substituting every `{%...%}` token with its resolved value.
///
/// Unresolvable tokens render as an empty string. If `encode_values` is set, every substituted
/// value is additionally URL-encoded. Text outside tokens, including an unterminated `{%`, is
/// kept verbatim.
///
/// ```
/// # use launch_rules::{render, TokenFinder};
/// struct Finder;
/// impl TokenFinder for Finder {
///     fn get(&self, key: &str) -> Option<serde_json::Value> {
///         (key == "name").then(|| "a b".into())
///     }
/// }
/// assert_eq!(render("hello {%name%}!", &Finder, false), "hello a b!");
/// assert_eq!(render("q={%urlenc(name)%}", &Finder, false), "q=a%20b");
/// assert_eq!(render("{%missing%}", &Finder, false), "");
/// ```
pub fn render(template: &str, finder: &dyn TokenFinder, encode_values: bool) -> String {
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;
    for captures in token_regex().captures_iter(template) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        rendered.push_str(&template[last..whole.start()]);
        last = whole.end();

        let token = TokenOperand::parse(&captures[1]);
        let value = token
            .resolve(finder)
            .map(|value| value_to_string(&value))
            .unwrap_or_default();
        if encode_values {
            rendered.push_str(&url_encode(&value));
        } else {
            rendered.push_str(&value);
        }
    }
    rendered.push_str(&template[last..]);
    rendered
}
