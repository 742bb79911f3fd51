//! Access to the completion token budget of a request body

use serde_json::Value;

/// A request body carrying a `max_tokens` parameter
///
/// Error policies use this to shrink the completion budget of a request that
/// overflowed the model's context window before it is retried.
pub trait TokenBudget {
    fn max_tokens(&self) -> Option<i64>;

    fn set_max_tokens(&mut self, max_tokens: i64);

    /// Copy of `self` with `max_tokens` moved by `delta`, if it stays positive
    fn with_budget_delta(&self, delta: i64) -> Option<Self>
    where
        Self: Clone,
    {
        let adjusted = self.max_tokens()?.checked_add(delta)?;
        if adjusted < 1 {
            return None;
        }
        let mut body = self.clone();
        body.set_max_tokens(adjusted);
        Some(body)
    }
}

impl TokenBudget for Value {
    fn max_tokens(&self) -> Option<i64> {
        self.get("max_tokens").and_then(Value::as_i64)
    }

    fn set_max_tokens(&mut self, max_tokens: i64) {
        if let Some(object) = self.as_object_mut() {
            object.insert("max_tokens".to_string(), Value::from(max_tokens));
        }
    }
}
