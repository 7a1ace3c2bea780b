//! Token resolution and the `{%...%}` template language used in rule conditions and consequence
//! details.
mod finder;
mod template;

pub use finder::LaunchTokenFinder;
pub use template::{render, Transformer};

pub(crate) use template::TokenOperand;

/// Resolves token keys to values.
pub trait TokenFinder {
    /// Return the value for `key`, or `None` if it cannot be resolved.
    fn get(&self, key: &str) -> Option<serde_json::Value>;
}

#[cfg(test)]
impl TokenFinder for std::collections::HashMap<&str, serde_json::Value> {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        std::collections::HashMap::get(self, key).cloned()
    }
}
