use crate::domain::order::{
    InitializePaymentRequest, InitializePaymentResponse, VerifyPaymentResponse,
};
use crate::domain::ports::PaymentGateway;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// How the simulated gateway answers one call.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Initialize succeeds.
    Ok,
    /// The call is rejected.
    Fail,
    /// The call never settles.
    Hang,
    /// Verify confirms the payment.
    Verified,
    /// Verify answers `verified: false`.
    Unverified,
}

#[derive(Default)]
struct GatewayState {
    initialize_script: VecDeque<Outcome>,
    verify_script: VecDeque<Outcome>,
    issued: HashSet<String>,
    requests: Vec<InitializePaymentRequest>,
    verifications: Vec<String>,
    next_reference: u64,
}

/// An in-process gateway for tests and offline scenario runs.
///
/// References are issued as `REF1`, `REF2`, ... Unscripted initializations
/// succeed; unscripted verifications confirm any reference this gateway
/// issued. Clones share state.
#[derive(Clone)]
pub struct SimulatedGateway {
    checkout_base: String,
    state: Arc<Mutex<GatewayState>>,
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new("https://checkout.simulated")
    }
}

impl SimulatedGateway {
    pub fn new(checkout_base: impl Into<String>) -> Self {
        Self {
            checkout_base: checkout_base.into(),
            state: Arc::new(Mutex::new(GatewayState::default())),
        }
    }

    /// Queues the outcome of the next unanswered initialize call.
    pub fn script_initialize(&self, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Ok | Outcome::Fail | Outcome::Hang => {
                self.state.lock().initialize_script.push_back(outcome);
                Ok(())
            }
            other => Err(PaymentError::ValidationError(format!(
                "{:?} is not an initialize outcome",
                other
            ))),
        }
    }

    /// Queues the outcome of the next unanswered verify call.
    pub fn script_verify(&self, outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Verified | Outcome::Unverified | Outcome::Fail | Outcome::Hang => {
                self.state.lock().verify_script.push_back(outcome);
                Ok(())
            }
            other => Err(PaymentError::ValidationError(format!(
                "{:?} is not a verify outcome",
                other
            ))),
        }
    }

    /// Drops scripted outcomes no call has consumed, so an outcome meant for
    /// a call that never reached the gateway cannot answer a later one.
    /// Returns how many were dropped.
    pub fn clear_script(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.initialize_script.len() + state.verify_script.len();
        state.initialize_script.clear();
        state.verify_script.clear();
        dropped
    }

    /// Initialize requests received so far.
    pub fn requests(&self) -> Vec<InitializePaymentRequest> {
        self.state.lock().requests.clone()
    }

    pub fn initialize_calls(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn verify_calls(&self) -> usize {
        self.state.lock().verifications.len()
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn initialize_payment(
        &self,
        request: &InitializePaymentRequest,
    ) -> Result<InitializePaymentResponse> {
        let outcome = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            let outcome = state.initialize_script.pop_front().unwrap_or(Outcome::Ok);
            if outcome == Outcome::Ok {
                state.next_reference += 1;
                let reference = format!("REF{}", state.next_reference);
                state.issued.insert(reference.clone());
                return Ok(InitializePaymentResponse {
                    authorization_url: format!("{}/{}", self.checkout_base, reference),
                    reference,
                });
            }
            outcome
        };

        match outcome {
            Outcome::Hang => std::future::pending().await,
            _ => Err(PaymentError::GatewayError(format!(
                "Unable to initialize payment for order {}",
                request.order_id
            ))),
        }
    }

    async fn verify_payment(&self, reference: &str) -> Result<VerifyPaymentResponse> {
        let outcome = {
            let mut state = self.state.lock();
            state.verifications.push(reference.to_string());
            match state.verify_script.pop_front() {
                Some(outcome) => outcome,
                None if state.issued.contains(reference) => Outcome::Verified,
                None => Outcome::Unverified,
            }
        };

        match outcome {
            Outcome::Verified => Ok(VerifyPaymentResponse { verified: true }),
            Outcome::Unverified => Ok(VerifyPaymentResponse { verified: false }),
            Outcome::Hang => std::future::pending().await,
            _ => Err(PaymentError::GatewayError(format!(
                "Unable to verify payment {}",
                reference
            ))),
        }
    }
}
