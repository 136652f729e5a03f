//! Run state and statistics.

use std::time::Instant;

/// The current state of a replication session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting for a trigger.
    Idle,
    /// A pull-then-push run is executing.
    Running,
    /// The last run failed; a retry is scheduled.
    Retrying,
    /// The session was cancelled or completed its one-shot run. Terminal.
    Stopped,
}

impl RunState {
    /// Returns true while a run is executing.
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running)
    }

    /// Returns true once the session can no longer run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Stopped)
    }
}

/// Statistics about a replication session.
#[derive(Debug, Clone, Default)]
pub struct ReplicationStats {
    /// Runs executed.
    pub runs_started: u64,
    /// Runs that completed without error.
    pub runs_succeeded: u64,
    /// Runs that failed.
    pub runs_failed: u64,
    /// Retries fired by the retry timer.
    pub retries: u64,
    /// Pull pages requested.
    pub pages_pulled: u64,
    /// Documents written by pulls.
    pub documents_received: u64,
    /// Pulled rows rejected by validation.
    pub documents_rejected: u64,
    /// Push requests acknowledged.
    pub push_requests: u64,
    /// Rows acknowledged by the remote.
    pub documents_sent: u64,
    /// Local changes skipped because they were pulled from this endpoint.
    pub echoes_suppressed: u64,
    /// Rows dropped by a pull or push modifier.
    pub documents_dropped: u64,
    /// Time the last successful run finished.
    pub last_success: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Counters of one pull cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PullOutcome {
    pub pages: u64,
    pub received: u64,
    pub rejected: u64,
    pub dropped: u64,
}

/// Counters of one push cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PushOutcome {
    pub requests: u64,
    pub sent: u64,
    pub suppressed: u64,
    pub dropped: u64,
}

impl ReplicationStats {
    pub(crate) fn record_pull(&mut self, outcome: &PullOutcome) {
        self.pages_pulled += outcome.pages;
        self.documents_received += outcome.received;
        self.documents_rejected += outcome.rejected;
        self.documents_dropped += outcome.dropped;
    }

    pub(crate) fn record_push(&mut self, outcome: &PushOutcome) {
        self.push_requests += outcome.requests;
        self.documents_sent += outcome.sent;
        self.echoes_suppressed += outcome.suppressed;
        self.documents_dropped += outcome.dropped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_predicates() {
        assert!(RunState::Running.is_active());
        assert!(!RunState::Retrying.is_active());
        assert!(RunState::Stopped.is_terminal());
        assert!(!RunState::Idle.is_terminal());
    }

    #[test]
    fn stats_accumulate_outcomes() {
        let mut stats = ReplicationStats::default();
        stats.record_pull(&PullOutcome {
            pages: 2,
            received: 7,
            rejected: 1,
            dropped: 2,
        });
        stats.record_push(&PushOutcome {
            requests: 1,
            sent: 3,
            suppressed: 7,
            dropped: 0,
        });
        stats.record_push(&PushOutcome {
            requests: 1,
            sent: 2,
            ..Default::default()
        });

        assert_eq!(stats.pages_pulled, 2);
        assert_eq!(stats.documents_received, 7);
        assert_eq!(stats.documents_rejected, 1);
        assert_eq!(stats.push_requests, 2);
        assert_eq!(stats.documents_sent, 5);
        assert_eq!(stats.echoes_suppressed, 7);
        assert_eq!(stats.documents_dropped, 2);
    }
}
