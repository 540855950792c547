//! Investigation agents: the LLM facade for the four workflow roles
//! (hypothesize, query, interpret, synthesize).

mod client;
pub mod models;
pub mod prompts;
mod stream;

pub use client::{AgentClient, InvestigationAgent, PreviousAttempt};
pub use models::{
    extract_json, HypothesesResponse, HypothesisDraft, InterpretationResponse, QueryResponse,
    SynthesisResponse,
};
pub use stream::StreamHandlers;
