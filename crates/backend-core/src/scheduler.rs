use crate::{
    error::FeedError,
    types::{FeedEvent, PollState},
};

/// Poll cadence state machine.
///
/// Tracks `Idle`/`Polling`/`Suspended` and the single outstanding poll. It
/// owns no timer: the runtime calls `on_tick` on every interval tick and
/// issues a request only when it returns `true`.
///
/// State transitions never touch the outstanding-poll marker. It is cleared
/// only when that poll reports back (`on_poll_result`) or when its request
/// has been cancelled (`abandon_poll`).
#[derive(Debug, Clone, Default)]
pub struct PollScheduler {
    state: PollState,
    in_flight: bool,
}

impl PollScheduler {
    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn poll_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Begin polling. Requires a credential.
    pub fn start(&mut self, has_credential: bool) -> Result<Vec<FeedEvent>, FeedError> {
        if self.state != PollState::Idle {
            return Err(FeedError::invalid_state(self.state, "start_polling"));
        }
        if !has_credential {
            return Err(FeedError::credential_missing());
        }
        Ok(self.transition(PollState::Polling))
    }

    /// Stop polling (view unmounted).
    pub fn stop(&mut self) -> Result<Vec<FeedEvent>, FeedError> {
        if self.state == PollState::Idle {
            return Err(FeedError::invalid_state(self.state, "stop_polling"));
        }
        Ok(self.transition(PollState::Idle))
    }

    /// Explicit sign-out: always ends in `Idle`.
    pub fn sign_out(&mut self) -> Vec<FeedEvent> {
        self.transition(PollState::Idle)
    }

    /// A fresh credential resumes a suspended scheduler.
    pub fn credential_restored(&mut self) -> Vec<FeedEvent> {
        if self.state != PollState::Suspended {
            return Vec::new();
        }
        self.transition(PollState::Polling)
    }

    /// The credential was rejected by some call.
    pub fn on_unauthorized(&mut self) -> Vec<FeedEvent> {
        if self.state != PollState::Polling {
            return Vec::new();
        }
        self.transition(PollState::Suspended)
    }

    /// Returns `true` when a poll should be issued now.
    ///
    /// Skips the tick while another poll is outstanding.
    pub fn on_tick(&mut self) -> bool {
        if self.state != PollState::Polling || self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    /// Forget the outstanding poll after its request was cancelled.
    pub fn abandon_poll(&mut self) {
        self.in_flight = false;
    }

    /// Record the completion of the outstanding poll.
    pub fn on_poll_result<T>(&mut self, result: &Result<T, FeedError>) -> Vec<FeedEvent> {
        self.in_flight = false;
        match result {
            Err(err) if err.is_unauthorized() => self.on_unauthorized(),
            _ => Vec::new(),
        }
    }

    fn transition(&mut self, next: PollState) -> Vec<FeedEvent> {
        if self.state == next {
            return Vec::new();
        }
        self.state = next;
        vec![FeedEvent::PollStateChanged { state: next }]
    }
}
