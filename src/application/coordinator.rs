use crate::config::CoordinatorConfig;
use crate::domain::attempt::{
    Admission, AttemptError, AttemptSnapshot, ErrorKind, PaymentAttempt, PaymentStatus,
    RetryPolicy,
};
use crate::domain::events::TransitionEvent;
use crate::domain::order::{InitializePaymentRequest, OrderInfo};
use crate::domain::ports::{ClockRef, GatewayRef, SchedulerRef, TimerCallback};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

const EVENT_CAPACITY: usize = 64;

/// Drives one payment attempt through the hosted-checkout flow.
///
/// The coordinator owns the attempt, the waiting-window timeout and the
/// retry policy. Operations never fail: every gateway error is folded into
/// the attempt as an [`AttemptError`] and the resulting snapshot is
/// returned. Observers follow the attempt through [`PaymentCoordinator::subscribe`].
///
/// Cloning is cheap and every clone drives the same attempt.
#[derive(Clone)]
pub struct PaymentCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    gateway: GatewayRef,
    clock: ClockRef,
    scheduler: SchedulerRef,
    policy: RetryPolicy,
    redirect_timeout: Duration,
    attempt: Mutex<PaymentAttempt>,
    events: broadcast::Sender<TransitionEvent>,
}

impl PaymentCoordinator {
    pub fn new(
        config: &CoordinatorConfig,
        gateway: GatewayRef,
        clock: ClockRef,
        scheduler: SchedulerRef,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                gateway,
                clock,
                scheduler,
                policy: config.retry_policy(),
                redirect_timeout: config.redirect_timeout,
                attempt: Mutex::new(PaymentAttempt::new()),
                events,
            }),
        }
    }

    /// Receives one event per state change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitionEvent> {
        self.inner.events.subscribe()
    }

    pub fn snapshot(&self) -> AttemptSnapshot {
        self.inner.attempt.lock().snapshot()
    }

    /// Starts a new attempt for `order`.
    ///
    /// Guard rejections (`retry_limit`, then `rate_limit`) are recorded
    /// without calling the gateway; an attempt awaiting redirect stays live
    /// so its callback can still be verified. While a gateway call is outstanding, or
    /// once the payment succeeded, the call is ignored.
    #[instrument(skip(self, order), fields(order_id = order.order_id()))]
    pub async fn initialize(&self, order: OrderInfo) -> AttemptSnapshot {
        let request = InitializePaymentRequest::from(&order);

        let seq = {
            let mut attempt = self.inner.attempt.lock();
            let from = attempt.status();
            let now = self.inner.clock.now();
            match attempt.admit(now, &self.inner.policy) {
                Admission::Ignored => {
                    warn!(status = %from, "Ignoring initialize, attempt is {}", from);
                    return attempt.snapshot();
                }
                Admission::Rejected(error) => {
                    warn!(kind = %error.kind, retry_count = attempt.retry_count(), "Initialize rejected");
                    attempt.reject(error);
                    return self.inner.publish(from, &attempt);
                }
                Admission::Accepted => {}
            }
            let seq = attempt.begin_initialize(now);
            arm_timeout(&self.inner, &mut attempt);
            self.inner.publish(from, &attempt);
            seq
        };

        let result = self.inner.gateway.initialize_payment(&request).await;

        let mut attempt = self.inner.attempt.lock();
        let from = attempt.status();
        let applied = match result {
            Ok(response) => {
                let reference = response.reference.clone();
                let applied = attempt.complete_initialize(seq, response, self.inner.clock.now());
                if applied {
                    arm_timeout(&self.inner, &mut attempt);
                    info!(%reference, retry_count = attempt.retry_count(), "Payment initialized");
                }
                applied
            }
            Err(e) => {
                let applied = attempt
                    .fail_initialize(seq, AttemptError::new(ErrorKind::Network, e.to_string()));
                if applied {
                    warn!(error = %e, "Payment initialization failed");
                }
                applied
            }
        };

        if applied {
            self.inner.publish(from, &attempt)
        } else {
            debug!(status = %from, "Discarding stale initialize result");
            attempt.snapshot()
        }
    }

    /// Confirms the attempt identified by `reference`, as returned on the
    /// redirect callback. A reference that does not belong to the attempt
    /// awaiting redirect is ignored.
    #[instrument(skip(self))]
    pub async fn verify(&self, reference: &str) -> AttemptSnapshot {
        let seq = {
            let mut attempt = self.inner.attempt.lock();
            let from = attempt.status();
            match attempt.begin_verify(reference) {
                Some(seq) => {
                    self.inner.publish(from, &attempt);
                    seq
                }
                None => {
                    warn!(
                        status = %from,
                        expected = attempt.reference().unwrap_or("<none>"),
                        "Ignoring verification for a foreign or stale reference"
                    );
                    return attempt.snapshot();
                }
            }
        };

        let outcome = match self.inner.gateway.verify_payment(reference).await {
            Ok(response) if response.verified => Ok(()),
            Ok(_) => Err(AttemptError::new(
                ErrorKind::Validation,
                "Payment could not be verified",
            )),
            Err(e) => Err(AttemptError::new(ErrorKind::Validation, e.to_string())),
        };

        let mut attempt = self.inner.attempt.lock();
        let from = attempt.status();
        if let Err(error) = &outcome {
            warn!(error = %error, "Payment verification failed");
        }
        if attempt.complete_verify(seq, outcome) {
            self.inner.publish(from, &attempt)
        } else {
            debug!(status = %from, "Discarding stale verification result");
            attempt.snapshot()
        }
    }

    /// Returns the attempt to `idle`, cancelling any pending timeout. Safe in
    /// every state, including while a gateway call is outstanding.
    #[instrument(skip(self))]
    pub fn reset(&self) -> AttemptSnapshot {
        let mut attempt = self.inner.attempt.lock();
        let before = attempt.snapshot();
        attempt.reset();
        if attempt.snapshot() == before {
            return before;
        }
        info!(from = %before.status, "Payment attempt reset");
        self.inner.publish(before.status, &attempt)
    }
}

impl Inner {
    fn publish(&self, from: PaymentStatus, attempt: &PaymentAttempt) -> AttemptSnapshot {
        let snapshot = attempt.snapshot();
        debug!(%from, to = %snapshot.status, "Payment transition");
        // No subscribers is fine.
        let _ = self
            .events
            .send(TransitionEvent::new(from, snapshot.clone()));
        snapshot
    }

    fn on_timeout(&self, timer_id: u64) {
        let mut attempt = self.attempt.lock();
        let from = attempt.status();
        if attempt.expire(timer_id, AttemptError::timeout(self.redirect_timeout)) {
            warn!(
                status = %from,
                timeout_ms = u64::try_from(self.redirect_timeout.as_millis()).unwrap_or(u64::MAX),
                "Payment attempt timed out"
            );
            self.publish(from, &attempt);
        } else {
            debug!(timer_id, "Ignoring stale payment timeout");
        }
    }
}

fn arm_timeout(inner: &Arc<Inner>, attempt: &mut PaymentAttempt) {
    let weak = Arc::downgrade(inner);
    attempt.arm_timeout(
        inner.scheduler.as_ref(),
        inner.redirect_timeout,
        move |timer_id| -> TimerCallback {
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_timeout(timer_id);
                }
            })
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::simulated::{Outcome, SimulatedGateway};

    fn setup() -> (PaymentCoordinator, SimulatedGateway, ManualClock) {
        let gateway = SimulatedGateway::new("https://pay");
        let clock = ManualClock::new();
        let coordinator = PaymentCoordinator::new(
            &CoordinatorConfig::default(),
            Arc::new(gateway.clone()),
            Arc::new(clock.clone()),
            Arc::new(clock.clone()),
        );
        (coordinator, gateway, clock)
    }

    fn order() -> OrderInfo {
        OrderInfo::new(42, "USD", "a@b.com", "https://x/cb").unwrap()
    }

    /// Spawns `initialize` and lets it run up to the gateway call.
    async fn spawn_initialize(
        coordinator: &PaymentCoordinator,
    ) -> tokio::task::JoinHandle<AttemptSnapshot> {
        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.initialize(order()).await })
        };
        while coordinator.snapshot().status != PaymentStatus::Initializing {
            tokio::task::yield_now().await;
        }
        task
    }

    #[tokio::test]
    async fn test_initialize_then_verify() {
        let (coordinator, gateway, clock) = setup();

        let snapshot = coordinator.initialize(order()).await;
        assert_eq!(snapshot.status, PaymentStatus::AwaitingRedirect);
        assert_eq!(snapshot.reference.as_deref(), Some("REF1"));
        assert_eq!(snapshot.authorization_url.as_deref(), Some("https://pay/REF1"));
        assert_eq!(snapshot.retry_count, 1);
        assert!(snapshot.timeout_pending);
        assert_eq!(clock.pending_timers(), 1);
        assert_eq!(gateway.requests()[0].payment_currency, "USD");

        let snapshot = coordinator.verify("REF1").await;
        assert_eq!(snapshot.status, PaymentStatus::Success);
        assert!(snapshot.error.is_none());
        assert!(!snapshot.timeout_pending);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_verify_with_wrong_reference_is_noop() {
        let (coordinator, gateway, clock) = setup();
        let before = coordinator.initialize(order()).await;

        let after = coordinator.verify("WRONG").await;

        assert_eq!(after, before);
        assert_eq!(gateway.verify_calls(), 0);
        assert_eq!(clock.pending_timers(), 1);
    }

    #[tokio::test]
    async fn test_retry_limit_after_four_attempts() {
        let (coordinator, gateway, clock) = setup();

        for _ in 0..4 {
            let snapshot = coordinator.initialize(order()).await;
            assert_eq!(snapshot.status, PaymentStatus::AwaitingRedirect);
            clock.advance(Duration::from_millis(5_000));
        }

        let snapshot = coordinator.initialize(order()).await;
        assert_eq!(snapshot.status, PaymentStatus::AwaitingRedirect);
        assert_eq!(snapshot.error.unwrap().kind, ErrorKind::RetryLimit);
        assert_eq!(snapshot.reference.as_deref(), Some("REF4"));
        assert_eq!(gateway.initialize_calls(), 4);

        // The ceiling does not expire with time, even once the last
        // attempt has timed out.
        clock.advance(Duration::from_secs(3_600));
        assert_eq!(coordinator.snapshot().status, PaymentStatus::Failed);
        let snapshot = coordinator.initialize(order()).await;
        assert_eq!(snapshot.status, PaymentStatus::Failed);
        assert_eq!(snapshot.error.unwrap().kind, ErrorKind::RetryLimit);
        assert_eq!(gateway.initialize_calls(), 4);
    }

    #[tokio::test]
    async fn test_rate_limit_keeps_first_attempt() {
        let (coordinator, gateway, clock) = setup();
        coordinator.initialize(order()).await;
        clock.advance(Duration::from_millis(1_000));

        let snapshot = coordinator.initialize(order()).await;

        assert_eq!(snapshot.status, PaymentStatus::AwaitingRedirect);
        assert_eq!(snapshot.error.unwrap().kind, ErrorKind::RateLimit);
        assert_eq!(snapshot.reference.as_deref(), Some("REF1"));
        assert_eq!(snapshot.authorization_url.as_deref(), Some("https://pay/REF1"));
        assert_eq!(snapshot.retry_count, 1);
        assert!(snapshot.timeout_pending);
        assert_eq!(clock.pending_timers(), 1);
        assert_eq!(gateway.initialize_calls(), 1);
    }

    #[tokio::test]
    async fn test_callback_after_rate_limited_retry_still_verifies() {
        let (coordinator, gateway, clock) = setup();
        coordinator.initialize(order()).await;
        clock.advance(Duration::from_millis(1_000));
        coordinator.initialize(order()).await;

        let snapshot = coordinator.verify("REF1").await;

        assert_eq!(snapshot.status, PaymentStatus::Success);
        assert!(snapshot.error.is_none());
        assert!(!snapshot.timeout_pending);
        assert_eq!(gateway.verify_calls(), 1);
        assert_eq!(clock.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_attempt_still_times_out() {
        let (coordinator, _gateway, clock) = setup();
        coordinator.initialize(order()).await;
        clock.advance(Duration::from_millis(1_000));
        coordinator.initialize(order()).await;

        clock.advance(Duration::from_millis(299_000));
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.status, PaymentStatus::Failed);
        assert_eq!(snapshot.error.unwrap().kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_gateway_that_never_answers_times_out() {
        let (coordinator, gateway, clock) = setup();
        gateway.script_initialize(Outcome::Hang).unwrap();

        let task = spawn_initialize(&coordinator).await;
        clock.advance(Duration::from_millis(299_999));
        assert_eq!(coordinator.snapshot().status, PaymentStatus::Initializing);

        clock.advance(Duration::from_millis(1));
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.status, PaymentStatus::Failed);
        assert_eq!(snapshot.error.unwrap().kind, ErrorKind::Timeout);
        assert!(!snapshot.timeout_pending);
        task.abort();
    }

    #[tokio::test]
    async fn test_timeout_while_awaiting_redirect() {
        let (coordinator, gateway, clock) = setup();
        coordinator.initialize(order()).await;

        clock.advance(Duration::from_millis(300_000));
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.status, PaymentStatus::Failed);
        assert_eq!(snapshot.error.unwrap().kind, ErrorKind::Timeout);

        // The callback arrives too late to be acted on.
        coordinator.verify("REF1").await;
        assert_eq!(coordinator.snapshot().status, PaymentStatus::Failed);
        assert_eq!(gateway.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_verification_cancels_timeout() {
        let (coordinator, gateway, clock) = setup();
        coordinator.initialize(order()).await;
        gateway.script_verify(Outcome::Hang).unwrap();

        let task = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.verify("REF1").await })
        };
        while coordinator.snapshot().status != PaymentStatus::Verifying {
            tokio::task::yield_now().await;
        }

        assert_eq!(clock.pending_timers(), 0);
        clock.advance(Duration::from_secs(600));
        let snapshot = coordinator.snapshot();
        assert_eq!(snapshot.status, PaymentStatus::Verifying);
        assert!(snapshot.error.is_none());
        task.abort();
    }

    #[tokio::test]
    async fn test_verification_failures_are_validation_errors() {
        let (coordinator, gateway, clock) = setup();
        gateway.script_verify(Outcome::Unverified).unwrap();
        gateway.script_verify(Outcome::Fail).unwrap();

        coordinator.initialize(order()).await;
        let snapshot = coordinator.verify("REF1").await;
        assert_eq!(snapshot.status, PaymentStatus::Failed);
        assert_eq!(snapshot.error.unwrap().kind, ErrorKind::Validation);

        clock.advance(Duration::from_millis(5_000));
        coordinator.initialize(order()).await;
        let snapshot = coordinator.verify("REF2").await;
        assert_eq!(snapshot.status, PaymentStatus::Failed);
        let error = snapshot.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Validation);
        assert!(error.message.contains("REF2"));
    }

    #[tokio::test]
    async fn test_network_failure_starts_cooldown() {
        let (coordinator, gateway, clock) = setup();
        gateway.script_initialize(Outcome::Fail).unwrap();

        let snapshot = coordinator.initialize(order()).await;
        assert_eq!(snapshot.status, PaymentStatus::Failed);
        let error = snapshot.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Network);
        assert!(error.message.contains("order 42"));
        assert_eq!(snapshot.retry_count, 0);
        assert!(!snapshot.timeout_pending);

        let snapshot = coordinator.initialize(order()).await;
        assert_eq!(snapshot.status, PaymentStatus::Failed);
        assert_eq!(snapshot.error.unwrap().kind, ErrorKind::RateLimit);
        assert_eq!(gateway.initialize_calls(), 1);

        clock.advance(Duration::from_millis(5_000));
        let snapshot = coordinator.initialize(order()).await;
        assert_eq!(snapshot.status, PaymentStatus::AwaitingRedirect);
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.retry_count, 1);
    }

    #[tokio::test]
    async fn test_success_is_terminal_until_reset() {
        let (coordinator, gateway, clock) = setup();
        coordinator.initialize(order()).await;
        coordinator.verify("REF1").await;
        clock.advance(Duration::from_secs(10));

        let snapshot = coordinator.initialize(order()).await;
        assert_eq!(snapshot.status, PaymentStatus::Success);
        assert_eq!(gateway.initialize_calls(), 1);

        coordinator.reset();
        let snapshot = coordinator.initialize(order()).await;
        assert_eq!(snapshot.status, PaymentStatus::AwaitingRedirect);
        assert_eq!(snapshot.reference.as_deref(), Some("REF2"));
        assert_eq!(snapshot.retry_count, 1);
    }

    #[tokio::test]
    async fn test_reset_mid_flight() {
        let (coordinator, gateway, clock) = setup();
        gateway.script_initialize(Outcome::Hang).unwrap();
        let task = spawn_initialize(&coordinator).await;

        let snapshot = coordinator.reset();
        assert_eq!(snapshot, AttemptSnapshot::default());
        assert_eq!(clock.pending_timers(), 0);

        clock.advance(Duration::from_secs(600));
        assert_eq!(coordinator.snapshot(), AttemptSnapshot::default());
        assert_eq!(coordinator.reset(), AttemptSnapshot::default());
        task.abort();
    }

    #[tokio::test]
    async fn test_events_follow_transitions() {
        let (coordinator, _gateway, _clock) = setup();
        let mut events = coordinator.subscribe();

        coordinator.initialize(order()).await;
        coordinator.verify("REF1").await;
        coordinator.reset();
        coordinator.reset();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push((event.from, event.to));
        }
        assert_eq!(
            seen,
            vec![
                (PaymentStatus::Idle, PaymentStatus::Initializing),
                (PaymentStatus::Initializing, PaymentStatus::AwaitingRedirect),
                (PaymentStatus::AwaitingRedirect, PaymentStatus::Verifying),
                (PaymentStatus::Verifying, PaymentStatus::Success),
                (PaymentStatus::Success, PaymentStatus::Idle),
            ]
        );
    }
}
