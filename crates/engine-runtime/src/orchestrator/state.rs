use serde::Serialize;
use std::fmt;

/// Lifecycle of the run loop.
///
/// `Idle → Watching → BatchReady → Resolving → Executing → Reporting → Watching`,
/// with `Stopping → Stopped` reachable from anywhere. A batch whose ledger
/// query failed goes from `Resolving` straight back to `Watching`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Watching,
    BatchReady,
    Resolving,
    Executing,
    Reporting,
    Stopping,
    Stopped,
}

impl OrchestratorState {
    pub fn can_transition_to(self, next: OrchestratorState) -> bool {
        use OrchestratorState::*;
        match (self, next) {
            (Stopped, _) => false,
            (Stopping, Stopped) => true,
            (_, Stopping) => true,
            (Idle, Watching)
            | (Watching, BatchReady)
            | (BatchReady, Resolving)
            | (Resolving, Executing)
            | (Resolving, Watching)
            | (Executing, Reporting)
            | (Reporting, Watching) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == OrchestratorState::Stopped
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrchestratorState::Idle => "idle",
            OrchestratorState::Watching => "watching",
            OrchestratorState::BatchReady => "batch_ready",
            OrchestratorState::Resolving => "resolving",
            OrchestratorState::Executing => "executing",
            OrchestratorState::Reporting => "reporting",
            OrchestratorState::Stopping => "stopping",
            OrchestratorState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::OrchestratorState::*;

    #[test]
    fn happy_path_is_a_loop() {
        let path = [Idle, Watching, BatchReady, Resolving, Executing, Reporting, Watching];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn stopping_is_reachable_from_everywhere_but_stopped() {
        for state in [Idle, Watching, BatchReady, Resolving, Executing, Reporting] {
            assert!(state.can_transition_to(Stopping));
            assert!(!state.can_transition_to(Stopped));
        }
        assert!(Stopping.can_transition_to(Stopped));
        assert!(!Stopped.can_transition_to(Stopping));
    }

    #[test]
    fn skipping_stages_is_rejected() {
        assert!(!Watching.can_transition_to(Executing));
        assert!(!Executing.can_transition_to(Watching));
        assert!(!Idle.can_transition_to(BatchReady));
    }
}
