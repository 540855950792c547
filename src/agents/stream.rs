//! Streaming handlers for agent operations.
//!
//! A neutral callback surface: token chunks as they arrive, the validated
//! partial/structured object once parsed, and the final rendered content.
//! Handlers never change the value an operation returns, and provider
//! streaming types never pass through here.

use serde_json::Value;

type TokenFn = Box<dyn Fn(&str) + Send + Sync>;
type PartialFn = Box<dyn Fn(&Value) + Send + Sync>;
type CompleteFn = Box<dyn Fn(&str) + Send + Sync>;

/// Optional callbacks for observing an agent call in flight.
#[derive(Default)]
pub struct StreamHandlers {
    on_token: Option<TokenFn>,
    on_partial: Option<PartialFn>,
    on_complete: Option<CompleteFn>,
}

impl StreamHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with each streamed text chunk.
    pub fn on_token(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_token = Some(Box::new(f));
        self
    }

    /// Called once with the parsed structured output, before validation
    /// shapes it into the domain type.
    pub fn on_partial(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_partial = Some(Box::new(f));
        self
    }

    /// Called once with the final raw content.
    pub fn on_complete(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn wants_tokens(&self) -> bool {
        self.on_token.is_some()
    }

    pub(crate) fn emit_token(&self, chunk: &str) {
        if let Some(f) = &self.on_token {
            f(chunk);
        }
    }

    pub(crate) fn emit_partial(&self, value: &Value) {
        if let Some(f) = &self.on_partial {
            f(value);
        }
    }

    pub(crate) fn emit_complete(&self, content: &str) {
        if let Some(f) = &self.on_complete {
            f(content);
        }
    }
}
