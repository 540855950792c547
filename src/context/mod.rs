//! Investigation context gathering.

mod engine;

pub use engine::ContextEngine;
