use super::order::{InitializePaymentRequest, InitializePaymentResponse, VerifyPaymentResponse};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The remote hosted-checkout service.
///
/// Both calls may be slow or fail; a failure is any `Err`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn initialize_payment(
        &self,
        request: &InitializePaymentRequest,
    ) -> Result<InitializePaymentResponse>;
    async fn verify_payment(&self, reference: &str) -> Result<VerifyPaymentResponse>;
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Ownership of one scheduled callback.
pub trait TimerHandle: Send {
    /// Prevents the callback from running. Cancelling a timer that already
    /// fired does nothing.
    fn cancel(self: Box<Self>);
}

/// Runs a callback once after a delay.
///
/// Implementations must never invoke the callback from inside `schedule`.
pub trait TimerScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Box<dyn TimerHandle>;
}

pub type GatewayRef = Arc<dyn PaymentGateway>;
pub type ClockRef = Arc<dyn Clock>;
pub type SchedulerRef = Arc<dyn TimerScheduler>;
