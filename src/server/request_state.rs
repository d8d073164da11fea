use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle of one chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Normalizing,
    Validating,
    ProviderResolved,
    BudgetResolved,
    Dispatched,
    Streaming,
    Completed,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    fn allows(&self, next: RequestState) -> bool {
        use RequestState::*;
        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        matches!(
            (self, next),
            (Idle, Normalizing)
                | (Normalizing, Validating)
                | (Validating, ProviderResolved)
                | (ProviderResolved, BudgetResolved)
                | (BudgetResolved, Dispatched)
                | (Dispatched, Streaming)
                | (Dispatched, Completed)
                | (Streaming, Completed)
        )
    }
}

/// Tracks and logs the state machine of a single request. Illegal transitions are logged and
/// ignored; terminal states never change.
#[derive(Debug)]
pub struct RequestTracker {
    id: Uuid,
    state: RequestState,
    started_at: DateTime<Utc>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RequestState::Idle,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }

    /// Returns whether the transition was applied.
    pub fn advance(&mut self, next: RequestState) -> bool {
        if !self.state.allows(next) {
            tracing::warn!(
                request_id = %self.id,
                "ignored illegal transition {:?} -> {:?}",
                self.state,
                next
            );
            return false;
        }
        tracing::debug!(request_id = %self.id, "state {:?} -> {:?}", self.state, next);
        self.state = next;
        true
    }

    pub fn fail(&mut self) -> bool {
        self.advance(RequestState::Failed)
    }
}
