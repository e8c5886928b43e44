pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;

pub use application::coordinator::PaymentCoordinator;
pub use config::CoordinatorConfig;
pub use error::{PaymentError, Result};
