use crate::error::PaymentError;
use serde::{Deserialize, Serialize};

/// The order details needed to open a hosted checkout.
///
/// All four fields are required; construction through [`OrderInfo::new`]
/// rejects blank values so an invalid order never reaches the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderInfo {
    order_id: u64,
    currency: String,
    email: String,
    callback_url: String,
}

impl OrderInfo {
    pub fn new(
        order_id: u64,
        currency: impl Into<String>,
        email: impl Into<String>,
        callback_url: impl Into<String>,
    ) -> Result<Self, PaymentError> {
        let currency = currency.into().trim().to_uppercase();
        let email = email.into().trim().to_string();
        let callback_url = callback_url.into().trim().to_string();

        if order_id == 0 {
            return Err(PaymentError::ValidationError(
                "Order id must be positive".to_string(),
            ));
        }
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::ValidationError(format!(
                "Currency must be a three-letter code, got '{}'",
                currency
            )));
        }
        if !email.contains('@') {
            return Err(PaymentError::ValidationError(format!(
                "Invalid email address '{}'",
                email
            )));
        }
        if !(callback_url.starts_with("https://") || callback_url.starts_with("http://")) {
            return Err(PaymentError::ValidationError(format!(
                "Callback URL must be absolute, got '{}'",
                callback_url
            )));
        }

        Ok(Self {
            order_id,
            currency,
            email,
            callback_url,
        })
    }

    pub fn order_id(&self) -> u64 {
        self.order_id
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }
}

/// Body of the gateway's initialize call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializePaymentRequest {
    pub order_id: u64,
    pub payment_currency: String,
    pub email: String,
    pub callback_url: String,
}

impl From<&OrderInfo> for InitializePaymentRequest {
    fn from(order: &OrderInfo) -> Self {
        Self {
            order_id: order.order_id,
            payment_currency: order.currency.clone(),
            email: order.email.clone(),
            callback_url: order.callback_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializePaymentResponse {
    pub authorization_url: String,
    pub reference: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyPaymentResponse {
    pub verified: bool,
}
