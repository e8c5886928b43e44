//! Application layer coordinating the payment flow.
//!
//! `PaymentCoordinator` owns the single in-memory payment attempt and wraps
//! the gateway port with the retry, cooldown and timeout policy. Notices are
//! derived from its transition events by a separate observer task.

pub mod coordinator;
pub mod notice;
