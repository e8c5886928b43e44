//! Transition events
use super::attempt::{AttemptSnapshot, PaymentStatus};

/// Emitted once for every change of the attempt's observable state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionEvent {
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub snapshot: AttemptSnapshot,
}

impl TransitionEvent {
    pub fn new(from: PaymentStatus, snapshot: AttemptSnapshot) -> Self {
        Self {
            from,
            to: snapshot.status,
            snapshot,
        }
    }
}
