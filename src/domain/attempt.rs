use super::order::InitializePaymentResponse;
use super::ports::{TimerCallback, TimerHandle, TimerScheduler};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle of a single payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Idle,
    Initializing,
    AwaitingRedirect,
    Verifying,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Idle => "idle",
            PaymentStatus::Initializing => "initializing",
            PaymentStatus::AwaitingRedirect => "awaiting_redirect",
            PaymentStatus::Verifying => "verifying",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    /// The window in which a timeout may be pending.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Initializing | PaymentStatus::AwaitingRedirect
        )
    }

    /// A gateway call is outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, PaymentStatus::Initializing | PaymentStatus::Verifying)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Validation,
    Timeout,
    RateLimit,
    RetryLimit,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::RetryLimit => "retry_limit",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last failure recorded against an attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptError {
    #[serde(rename = "type")]
    pub kind: ErrorKind,
    pub message: String,
}

impl AttemptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn retry_limit() -> Self {
        Self::new(
            ErrorKind::RetryLimit,
            "Maximum payment attempts exceeded. Please contact support.",
        )
    }

    pub fn rate_limit() -> Self {
        Self::new(
            ErrorKind::RateLimit,
            "Please wait a moment before trying again.",
        )
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!(
                "No payment confirmation received within {}s",
                after.as_secs()
            ),
        )
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Limits applied before a new initialization reaches the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Initializations allowed before the attempt is locked out.
    pub max_retries: u32,
    /// Minimum spacing between two initializations.
    pub cooldown: Duration,
}

/// Outcome of the guard checks run before an initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(AttemptError),
    /// The attempt is busy or finished; the call has no effect.
    Ignored,
}

struct PendingTimeout {
    id: u64,
    handle: Box<dyn TimerHandle>,
}

impl fmt::Debug for PendingTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTimeout").field("id", &self.id).finish()
    }
}

/// Read-only view of an attempt, handed to observers and callers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttemptSnapshot {
    pub status: PaymentStatus,
    pub error: Option<AttemptError>,
    pub authorization_url: Option<String>,
    pub reference: Option<String>,
    pub retry_count: u32,
    pub last_attempt_at: Option<Instant>,
    pub timeout_pending: bool,
}

/// The state of one payment attempt.
///
/// Every mutation goes through the transition methods below; each returns
/// `false` (or `None`) and leaves the attempt untouched when the transition
/// does not apply. Operations that await the gateway carry a sequence number
/// so a result that settles after a reset or a timeout is discarded.
#[derive(Debug, Default)]
pub struct PaymentAttempt {
    status: PaymentStatus,
    authorization_url: Option<String>,
    reference: Option<String>,
    error: Option<AttemptError>,
    retry_count: u32,
    last_attempt_at: Option<Instant>,
    pending_timeout: Option<PendingTimeout>,
    operation_seq: u64,
    timer_seq: u64,
}

impl PaymentAttempt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn error(&self) -> Option<&AttemptError> {
        self.error.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn has_pending_timeout(&self) -> bool {
        self.pending_timeout.is_some()
    }

    pub fn snapshot(&self) -> AttemptSnapshot {
        AttemptSnapshot {
            status: self.status,
            error: self.error.clone(),
            authorization_url: self.authorization_url.clone(),
            reference: self.reference.clone(),
            retry_count: self.retry_count,
            last_attempt_at: self.last_attempt_at,
            timeout_pending: self.pending_timeout.is_some(),
        }
    }

    /// Runs the initialization guards. The retry ceiling is checked before
    /// the cooldown.
    pub fn admit(&self, now: Instant, policy: &RetryPolicy) -> Admission {
        if self.status.is_in_flight() || self.status == PaymentStatus::Success {
            return Admission::Ignored;
        }

        if self.retry_count > policy.max_retries {
            return Admission::Rejected(AttemptError::retry_limit());
        }

        if let Some(last) = self.last_attempt_at
            && now.saturating_duration_since(last) < policy.cooldown
        {
            return Admission::Rejected(AttemptError::rate_limit());
        }

        Admission::Accepted
    }

    /// Records a guard rejection.
    ///
    /// An attempt still awaiting redirect keeps its status and its pending
    /// timeout, so the callback for the live reference can still verify it.
    /// From any other state the attempt moves to `failed`.
    pub fn reject(&mut self, error: AttemptError) {
        if self.status != PaymentStatus::AwaitingRedirect {
            self.cancel_timeout();
            self.status = PaymentStatus::Failed;
        }
        self.error = Some(error);
    }

    /// Enters `initializing` and returns the operation sequence number.
    /// The cooldown starts here, whatever the gateway answers.
    pub fn begin_initialize(&mut self, now: Instant) -> u64 {
        self.cancel_timeout();
        self.status = PaymentStatus::Initializing;
        self.error = None;
        self.last_attempt_at = Some(now);
        self.operation_seq += 1;
        self.operation_seq
    }

    pub fn complete_initialize(
        &mut self,
        seq: u64,
        response: InitializePaymentResponse,
        now: Instant,
    ) -> bool {
        if !self.is_current(seq, PaymentStatus::Initializing) {
            return false;
        }
        self.cancel_timeout();
        self.authorization_url = Some(response.authorization_url);
        self.reference = Some(response.reference);
        self.retry_count += 1;
        self.last_attempt_at = Some(now);
        self.status = PaymentStatus::AwaitingRedirect;
        self.error = None;
        true
    }

    pub fn fail_initialize(&mut self, seq: u64, error: AttemptError) -> bool {
        if !self.is_current(seq, PaymentStatus::Initializing) {
            return false;
        }
        self.cancel_timeout();
        self.status = PaymentStatus::Failed;
        self.error = Some(error);
        true
    }

    /// Enters `verifying` if `reference` belongs to the attempt awaiting
    /// redirect. Returns the operation sequence number.
    pub fn begin_verify(&mut self, reference: &str) -> Option<u64> {
        if self.status != PaymentStatus::AwaitingRedirect
            || self.reference.as_deref() != Some(reference)
        {
            return None;
        }
        self.cancel_timeout();
        self.status = PaymentStatus::Verifying;
        self.error = None;
        self.operation_seq += 1;
        Some(self.operation_seq)
    }

    pub fn complete_verify(&mut self, seq: u64, outcome: Result<(), AttemptError>) -> bool {
        if !self.is_current(seq, PaymentStatus::Verifying) {
            return false;
        }
        match outcome {
            Ok(()) => {
                self.status = PaymentStatus::Success;
                self.error = None;
            }
            Err(error) => {
                self.status = PaymentStatus::Failed;
                self.error = Some(error);
            }
        }
        true
    }

    /// Schedules the waiting-window timeout, replacing any pending one.
    ///
    /// `callback` receives the timer id that must be passed back to
    /// [`PaymentAttempt::expire`].
    pub fn arm_timeout<F>(&mut self, scheduler: &dyn TimerScheduler, delay: Duration, callback: F)
    where
        F: FnOnce(u64) -> TimerCallback,
    {
        self.cancel_timeout();
        self.timer_seq += 1;
        let id = self.timer_seq;
        let handle = scheduler.schedule(delay, callback(id));
        self.pending_timeout = Some(PendingTimeout { id, handle });
    }

    pub fn cancel_timeout(&mut self) {
        if let Some(pending) = self.pending_timeout.take() {
            pending.handle.cancel();
        }
    }

    /// Handles a fired timer. Anything but the currently armed timer is a
    /// leaked callback and is ignored.
    pub fn expire(&mut self, timer_id: u64, error: AttemptError) -> bool {
        match &self.pending_timeout {
            Some(pending) if pending.id == timer_id => {}
            _ => return false,
        }
        self.pending_timeout = None;
        if !self.status.is_waiting() {
            return false;
        }
        self.status = PaymentStatus::Failed;
        self.error = Some(error);
        true
    }

    /// Returns to `idle` with every field defaulted. Outstanding gateway
    /// results become stale.
    pub fn reset(&mut self) {
        self.cancel_timeout();
        self.status = PaymentStatus::Idle;
        self.authorization_url = None;
        self.reference = None;
        self.error = None;
        self.retry_count = 0;
        self.last_attempt_at = None;
        self.operation_seq += 1;
    }

    fn is_current(&self, seq: u64, expected: PaymentStatus) -> bool {
        self.operation_seq == seq && self.status == expected
    }
}
