//! Observability for the replication layer
//!
//! - Structured JSON logging of typed events
//! - Lock-free counters
//!
//! Observability never changes replication behavior: logging failures are
//! swallowed and counters are write-only from the hot path.

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsSnapshot, ReplicationMetrics};

/// Log `event` at its own severity.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_does_not_panic() {
        log_event(Event::ServiceStarted, &[("member", "m1")]);
        log_event(Event::SessionGap, &[("expected", "3"), ("actual", "5")]);
    }

    #[test]
    fn test_event_line_format() {
        let line = logger::capture_log(
            Event::LeaderSwitch.severity(),
            Event::LeaderSwitch.as_str(),
            &[("leader", "none")],
        );
        assert!(line.starts_with("{\"event\":\"LEADER_SWITCH\",\"severity\":\"INFO\""));
    }
}
