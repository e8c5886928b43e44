//! Domain layer: the payment attempt, its inputs and the ports it depends on.

pub mod attempt;
pub mod events;
pub mod order;
pub mod ports;
