//! Event-sourced investigation state.
//!
//! Events are the source of truth for an investigation. Derived values
//! (retry counts, query counts, consecutive failures) are computed from the
//! event history on demand, never stored as mutable counters. If two
//! components disagree about a counter, the bug is in one of their
//! computations, not in a stale field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::datasource::SchemaResponse;
use crate::domain::{AnomalyAlert, LineageContext};

/// Types of events in the investigation timeline.
///
/// This is a closed set: every other component switches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    InvestigationStarted,
    ContextGathered,
    SchemaDiscoveryFailed,
    HypothesisGenerated,
    QuerySubmitted,
    QuerySucceeded,
    QueryFailed,
    ReflexionAttempted,
    HypothesisConfirmed,
    HypothesisRejected,
    SynthesisCompleted,
    InvestigationFailed,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvestigationStarted => "investigation_started",
            Self::ContextGathered => "context_gathered",
            Self::SchemaDiscoveryFailed => "schema_discovery_failed",
            Self::HypothesisGenerated => "hypothesis_generated",
            Self::QuerySubmitted => "query_submitted",
            Self::QuerySucceeded => "query_succeeded",
            Self::QueryFailed => "query_failed",
            Self::ReflexionAttempted => "reflexion_attempted",
            Self::HypothesisConfirmed => "hypothesis_confirmed",
            Self::HypothesisRejected => "hypothesis_rejected",
            Self::SynthesisCompleted => "synthesis_completed",
            Self::InvestigationFailed => "investigation_failed",
        };
        write!(f, "{}", s)
    }
}

/// Immutable event in the investigation timeline.
///
/// Append-only: never modified or removed once recorded. Ties between equal
/// timestamps are broken by append order (events are a sequence, not a set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    /// Event-specific payload.
    pub data: Value,
}

impl Event {
    /// Create an event with an arbitrary payload.
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }

    // Typed constructors guarantee the payload keys the rest of the system
    // relies on.

    pub fn investigation_started(dataset_id: &str) -> Self {
        Self::new(
            EventType::InvestigationStarted,
            json!({ "dataset_id": dataset_id }),
        )
    }

    pub fn context_gathered(tables_found: usize, has_lineage: bool) -> Self {
        Self::new(
            EventType::ContextGathered,
            json!({ "tables_found": tables_found, "has_lineage": has_lineage }),
        )
    }

    pub fn schema_discovery_failed(error: &str) -> Self {
        Self::new(EventType::SchemaDiscoveryFailed, json!({ "error": error }))
    }

    pub fn hypothesis_generated(hypothesis_id: &str, title: &str, category: &str) -> Self {
        Self::new(
            EventType::HypothesisGenerated,
            json!({ "hypothesis_id": hypothesis_id, "title": title, "category": category }),
        )
    }

    pub fn query_submitted(hypothesis_id: &str, query: &str) -> Self {
        Self::new(
            EventType::QuerySubmitted,
            json!({ "hypothesis_id": hypothesis_id, "query": query }),
        )
    }

    pub fn query_succeeded(hypothesis_id: &str, row_count: u64) -> Self {
        Self::new(
            EventType::QuerySucceeded,
            json!({ "hypothesis_id": hypothesis_id, "row_count": row_count }),
        )
    }

    pub fn query_failed(hypothesis_id: &str, query: &str, error: &str) -> Self {
        Self::new(
            EventType::QueryFailed,
            json!({ "hypothesis_id": hypothesis_id, "query": query, "error": error }),
        )
    }

    pub fn reflexion_attempted(hypothesis_id: &str, retry_number: usize) -> Self {
        Self::new(
            EventType::ReflexionAttempted,
            json!({ "hypothesis_id": hypothesis_id, "retry_number": retry_number }),
        )
    }

    pub fn synthesis_completed(root_cause: Option<&str>, confidence: f64) -> Self {
        Self::new(
            EventType::SynthesisCompleted,
            json!({ "root_cause": root_cause, "confidence": confidence }),
        )
    }

    pub fn investigation_failed(error: &str) -> Self {
        Self::new(EventType::InvestigationFailed, json!({ "error": error }))
    }

    /// The `hypothesis_id` payload key, if present.
    pub fn hypothesis_id(&self) -> Option<&str> {
        self.data.get("hypothesis_id").and_then(Value::as_str)
    }

    /// The `query` payload key, if present.
    pub fn query(&self) -> Option<&str> {
        self.data.get("query").and_then(Value::as_str)
    }

    /// The `error` payload key, if present.
    pub fn error(&self) -> Option<&str> {
        self.data.get("error").and_then(Value::as_str)
    }

    fn matches_hypothesis(&self, hypothesis_id: &str) -> bool {
        self.hypothesis_id() == Some(hypothesis_id)
    }
}

/// Investigation status derived from the event history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

// Derived queries are free functions over the event slice so that the
// immutable state and live log snapshots share one implementation.

/// Derive the run status from the last event.
pub fn status(events: &[Event]) -> RunStatus {
    match events.last() {
        None => RunStatus::Pending,
        Some(e) => match e.event_type {
            EventType::SynthesisCompleted => RunStatus::Completed,
            EventType::InvestigationFailed | EventType::SchemaDiscoveryFailed => RunStatus::Failed,
            _ => RunStatus::InProgress,
        },
    }
}

/// Count of reflexion attempts for a hypothesis.
pub fn retry_count(events: &[Event], hypothesis_id: &str) -> usize {
    events
        .iter()
        .filter(|e| {
            e.event_type == EventType::ReflexionAttempted && e.matches_hypothesis(hypothesis_id)
        })
        .count()
}

/// Total queries submitted across all hypotheses.
pub fn query_count(events: &[Event]) -> usize {
    events
        .iter()
        .filter(|e| e.event_type == EventType::QuerySubmitted)
        .count()
}

/// Queries submitted for a specific hypothesis.
pub fn hypothesis_query_count(events: &[Event], hypothesis_id: &str) -> usize {
    events
        .iter()
        .filter(|e| {
            e.event_type == EventType::QuerySubmitted && e.matches_hypothesis(hypothesis_id)
        })
        .count()
}

/// Error texts from failed queries for a hypothesis, oldest first. Feeds the
/// reflexion prompt.
pub fn failed_query_errors(events: &[Event], hypothesis_id: &str) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.event_type == EventType::QueryFailed && e.matches_hypothesis(hypothesis_id))
        .filter_map(|e| e.error().map(str::to_string))
        .collect()
}

/// SQL texts of failed queries for a hypothesis, oldest first.
pub fn failed_queries(events: &[Event], hypothesis_id: &str) -> Vec<String> {
    events
        .iter()
        .filter(|e| e.event_type == EventType::QueryFailed && e.matches_hypothesis(hypothesis_id))
        .filter_map(|e| e.query().map(str::to_string))
        .collect()
}

/// All SQL texts submitted for a hypothesis, oldest first. Feeds duplicate
/// detection; comparison downstream is exact string equality.
pub fn all_queries(events: &[Event], hypothesis_id: &str) -> Vec<String> {
    events
        .iter()
        .filter(|e| {
            e.event_type == EventType::QuerySubmitted && e.matches_hypothesis(hypothesis_id)
        })
        .filter_map(|e| e.query().map(str::to_string))
        .collect()
}

/// Consecutive query failures scanning from the tail, stopping at the first
/// success. Non-query events in between are skipped.
pub fn consecutive_failures(events: &[Event]) -> usize {
    let mut consecutive = 0;
    for event in events.iter().rev() {
        match event.event_type {
            EventType::QueryFailed => consecutive += 1,
            EventType::QuerySucceeded => break,
            _ => {}
        }
    }
    consecutive
}

/// Timestamp of the `investigation_started` event, if present.
pub fn started_at(events: &[Event]) -> Option<DateTime<Utc>> {
    events
        .iter()
        .find(|e| e.event_type == EventType::InvestigationStarted)
        .map(|e| e.timestamp)
}

/// Event-sourced investigation state.
///
/// All mutation is by-value: `append_event` and `with_context` return new
/// states. The contexts are cached at most once per investigation, after
/// gathering succeeds.
#[derive(Debug, Clone)]
pub struct InvestigationState {
    pub id: String,
    pub tenant_id: Uuid,
    pub alert: AnomalyAlert,
    pub events: Vec<Event>,
    pub schema_context: Option<SchemaResponse>,
    pub lineage_context: Option<LineageContext>,
}

impl InvestigationState {
    /// Create a fresh state with the alert and no events.
    pub fn new(id: impl Into<String>, tenant_id: Uuid, alert: AnomalyAlert) -> Self {
        Self {
            id: id.into(),
            tenant_id,
            alert,
            events: Vec::new(),
            schema_context: None,
            lineage_context: None,
        }
    }

    /// Return a new state with the event appended. No other field changes.
    pub fn append_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    /// Return a new state with the gathered contexts cached.
    pub fn with_context(
        mut self,
        schema_context: SchemaResponse,
        lineage_context: Option<LineageContext>,
    ) -> Self {
        self.schema_context = Some(schema_context);
        self.lineage_context = lineage_context;
        self
    }

    pub fn status(&self) -> RunStatus {
        status(&self.events)
    }

    pub fn retry_count(&self, hypothesis_id: &str) -> usize {
        retry_count(&self.events, hypothesis_id)
    }

    pub fn query_count(&self) -> usize {
        query_count(&self.events)
    }

    pub fn hypothesis_query_count(&self, hypothesis_id: &str) -> usize {
        hypothesis_query_count(&self.events, hypothesis_id)
    }

    pub fn failed_query_errors(&self, hypothesis_id: &str) -> Vec<String> {
        failed_query_errors(&self.events, hypothesis_id)
    }

    pub fn all_queries(&self, hypothesis_id: &str) -> Vec<String> {
        all_queries(&self.events, hypothesis_id)
    }

    pub fn consecutive_failures(&self) -> usize {
        consecutive_failures(&self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetricSpec;
    use pretty_assertions::assert_eq;

    fn alert() -> AnomalyAlert {
        AnomalyAlert {
            dataset_id: "sales.orders".to_string(),
            metric_spec: MetricSpec::from_column("user_id"),
            anomaly_type: "null_rate".to_string(),
            expected_value: 0.5,
            actual_value: 12.3,
            deviation_pct: 2360.0,
            anomaly_date: "2024-01-15".to_string(),
            severity: "high".to_string(),
            source_system: None,
            source_alert_id: None,
            source_url: None,
            metadata: None,
        }
    }

    fn state_with(events: Vec<Event>) -> InvestigationState {
        let mut state = InvestigationState::new("inv-1", Uuid::new_v4(), alert());
        for e in events {
            state = state.append_event(e);
        }
        state
    }

    #[test]
    fn test_status_progression() {
        let mut state = state_with(vec![]);
        assert_eq!(state.status(), RunStatus::Pending);

        state = state.append_event(Event::investigation_started("sales.orders"));
        assert_eq!(state.status(), RunStatus::InProgress);

        state = state.append_event(Event::synthesis_completed(Some("etl stall"), 0.88));
        assert_eq!(state.status(), RunStatus::Completed);
    }

    #[test]
    fn test_status_failed_terminal_events() {
        let state = state_with(vec![
            Event::investigation_started("sales.orders"),
            Event::schema_discovery_failed("No tables discovered"),
        ]);
        assert_eq!(state.status(), RunStatus::Failed);

        let state = state_with(vec![
            Event::investigation_started("sales.orders"),
            Event::investigation_failed("boom"),
        ]);
        assert_eq!(state.status(), RunStatus::Failed);
    }

    #[test]
    fn test_retry_count_is_per_hypothesis() {
        let state = state_with(vec![
            Event::reflexion_attempted("h1", 1),
            Event::reflexion_attempted("h2", 1),
            Event::reflexion_attempted("h1", 2),
        ]);
        assert_eq!(state.retry_count("h1"), 2);
        assert_eq!(state.retry_count("h2"), 1);
        assert_eq!(state.retry_count("h3"), 0);
    }

    #[test]
    fn test_query_counts() {
        let state = state_with(vec![
            Event::query_submitted("h1", "SELECT 1 LIMIT 1"),
            Event::query_submitted("h2", "SELECT 2 LIMIT 1"),
            Event::query_submitted("h1", "SELECT 3 LIMIT 1"),
        ]);
        assert_eq!(state.query_count(), 3);
        assert_eq!(state.hypothesis_query_count("h1"), 2);
        assert_eq!(state.hypothesis_query_count("h2"), 1);
    }

    #[test]
    fn test_failed_query_errors_for_reflexion() {
        let state = state_with(vec![
            Event::query_failed("h1", "SELECT * FROM sales.ordrs LIMIT 100", "relation \"sales.ordrs\" does not exist"),
            Event::query_failed("h2", "SELECT x LIMIT 1", "column x does not exist"),
        ]);
        let errors = state.failed_query_errors("h1");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("does not exist"));
    }

    #[test]
    fn test_all_queries_preserves_order() {
        let state = state_with(vec![
            Event::query_submitted("h1", "SELECT a LIMIT 1"),
            Event::query_submitted("h1", "SELECT b LIMIT 1"),
        ]);
        assert_eq!(
            state.all_queries("h1"),
            vec!["SELECT a LIMIT 1".to_string(), "SELECT b LIMIT 1".to_string()]
        );
    }

    #[test]
    fn test_consecutive_failures_stops_at_success() {
        let state = state_with(vec![
            Event::query_failed("h1", "q1", "e1"),
            Event::query_succeeded("h1", 10),
            Event::query_failed("h2", "q2", "e2"),
            Event::query_failed("h3", "q3", "e3"),
        ]);
        assert_eq!(state.consecutive_failures(), 2);
    }

    #[test]
    fn test_consecutive_failures_skips_non_query_events() {
        let state = state_with(vec![
            Event::query_failed("h1", "q1", "e1"),
            Event::reflexion_attempted("h1", 1),
            Event::query_failed("h1", "q2", "e2"),
        ]);
        assert_eq!(state.consecutive_failures(), 2);
    }

    #[test]
    fn test_with_context_sets_contexts_only() {
        use crate::datasource::SchemaResponse;

        let state = state_with(vec![Event::investigation_started("sales.orders")]);
        let events_before = state.events.clone();
        let state = state.with_context(SchemaResponse::new(Vec::new()), None);
        assert_eq!(state.events, events_before);
        assert!(state.schema_context.is_some());
        assert!(state.lineage_context.is_none());
    }

    #[test]
    fn test_event_payload_keys() {
        let e = Event::query_failed("h1", "SELECT 1", "syntax error");
        assert_eq!(e.hypothesis_id(), Some("h1"));
        assert_eq!(e.query(), Some("SELECT 1"));
        assert_eq!(e.error(), Some("syntax error"));

        let e = Event::context_gathered(2, true);
        assert_eq!(e.data["tables_found"], 2);
        assert_eq!(e.data["has_lineage"], true);

        let e = Event::reflexion_attempted("h1", 1);
        assert_eq!(e.data["retry_number"], 1);
    }

    #[test]
    fn test_event_serde_snake_case() {
        let e = Event::query_submitted("h1", "SELECT 1 LIMIT 1");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "query_submitted");
    }

    mod laws {
        use super::*;
        use proptest::prelude::*;

        // Small generator over event shapes that exercise the derived
        // queries.
        fn arb_event() -> impl Strategy<Value = Event> {
            let hid = prop_oneof![Just("h1"), Just("h2"), Just("h3")];
            (0u8..6, hid).prop_map(|(kind, h)| match kind {
                0 => Event::query_submitted(h, "SELECT 1 LIMIT 1"),
                1 => Event::query_succeeded(h, 1),
                2 => Event::query_failed(h, "SELECT 1 LIMIT 1", "err"),
                3 => Event::reflexion_attempted(h, 1),
                4 => Event::hypothesis_generated(h, "some title here", "data_quality"),
                _ => Event::investigation_started("sales.orders"),
            })
        }

        proptest! {
            /// Appending preserves the existing prefix and adds exactly one
            /// event.
            #[test]
            fn append_is_pure_prefix_extension(events in prop::collection::vec(arb_event(), 0..20)) {
                let state = state_with(events.clone());
                let extra = Event::query_submitted("h1", "SELECT 9 LIMIT 1");
                let appended = state.clone().append_event(extra.clone());
                prop_assert_eq!(appended.events.len(), events.len() + 1);
                prop_assert_eq!(&appended.events[..events.len()], &state.events[..]);
                prop_assert_eq!(appended.events.last().unwrap(), &extra);
            }

            /// Derived counters are pure: recomputing yields identical
            /// values, and they match a naive scan of the log.
            #[test]
            fn derivation_is_idempotent_and_counter_free(events in prop::collection::vec(arb_event(), 0..30)) {
                let state = state_with(events);

                let naive_queries = state
                    .events
                    .iter()
                    .filter(|e| e.event_type == EventType::QuerySubmitted)
                    .count();
                prop_assert_eq!(state.query_count(), naive_queries);
                prop_assert_eq!(state.query_count(), state.query_count());

                for h in ["h1", "h2", "h3"] {
                    let naive_retries = state
                        .events
                        .iter()
                        .filter(|e| {
                            e.event_type == EventType::ReflexionAttempted
                                && e.hypothesis_id() == Some(h)
                        })
                        .count();
                    prop_assert_eq!(state.retry_count(h), naive_retries);
                }
            }

            /// Consecutive failures never exceeds the total failure count.
            #[test]
            fn consecutive_failures_bounded(events in prop::collection::vec(arb_event(), 0..30)) {
                let state = state_with(events);
                let total_failures = state
                    .events
                    .iter()
                    .filter(|e| e.event_type == EventType::QueryFailed)
                    .count();
                prop_assert!(state.consecutive_failures() <= total_failures);
            }
        }
    }
}
