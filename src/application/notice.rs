use crate::domain::attempt::{AttemptError, ErrorKind, PaymentStatus};
use crate::domain::events::TransitionEvent;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A user-facing message derived from a transition, with the actions the
/// UI should offer alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub retry_allowed: bool,
    pub contact_support: bool,
}

impl Notice {
    fn new(level: NoticeLevel, message: &str, retry_allowed: bool, contact_support: bool) -> Self {
        Self {
            level,
            message: message.to_string(),
            retry_allowed,
            contact_support,
        }
    }

    /// Only redirects, successes and failures are worth telling the user about.
    /// A recorded error wins over the status, since a rejected retry leaves a
    /// live attempt awaiting redirect.
    pub fn from_event(event: &TransitionEvent) -> Option<Self> {
        if let Some(error) = &event.snapshot.error {
            return Some(Self::for_error(error));
        }
        match event.to {
            PaymentStatus::AwaitingRedirect => Some(Self::new(
                NoticeLevel::Info,
                "Redirecting to secure checkout...",
                false,
                false,
            )),
            PaymentStatus::Success => Some(Self::new(
                NoticeLevel::Success,
                "Payment confirmed. Thank you for your order!",
                false,
                false,
            )),
            _ => None,
        }
    }

    pub fn for_error(error: &AttemptError) -> Self {
        match error.kind {
            ErrorKind::Network => Self::new(
                NoticeLevel::Error,
                "We couldn't start your payment. Please check your connection and try again.",
                true,
                false,
            ),
            ErrorKind::Timeout => Self::new(
                NoticeLevel::Error,
                "The payment took too long to complete. Please try again.",
                true,
                false,
            ),
            ErrorKind::Validation => Self::new(
                NoticeLevel::Error,
                "We couldn't confirm your payment. Try again, or contact support if you were charged.",
                true,
                true,
            ),
            ErrorKind::RateLimit => Self::new(
                NoticeLevel::Error,
                "Please wait a few seconds before trying again.",
                false,
                false,
            ),
            ErrorKind::RetryLimit => Self::new(
                NoticeLevel::Error,
                "Too many payment attempts. Please contact support to complete your order.",
                false,
                true,
            ),
        }
    }
}

/// Forwards the notice for each transition to `sink` until the coordinator
/// is dropped.
pub fn spawn_notifier<F>(mut events: broadcast::Receiver<TransitionEvent>, sink: F) -> JoinHandle<()>
where
    F: Fn(Notice) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(notice) = Notice::from_event(&event) {
                        sink(notice);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Notifier fell behind, skipping transitions");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
