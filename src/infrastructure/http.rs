use crate::domain::order::{
    InitializePaymentRequest, InitializePaymentResponse, VerifyPaymentResponse,
};
use crate::domain::ports::PaymentGateway;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::time::Duration;
use tracing::{instrument, warn};

/// Client for a payment gateway exposed over the storefront REST API.
///
/// * `POST {base}/payments/initialize` with an [`InitializePaymentRequest`]
/// * `GET {base}/payments/verify/{reference}`
///
/// Path segments are percent-encoded, so a reference cannot address another
/// endpoint.
#[derive(Clone)]
pub struct HttpGateway {
    base_url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self> {
        let base_url = base_url.into();
        let parsed = Url::parse(&base_url).map_err(|e| {
            PaymentError::ConfigError(format!("Invalid gateway URL {}: {}", base_url, e))
        })?;
        if parsed.cannot_be_a_base() {
            return Err(PaymentError::ConfigError(format!(
                "Gateway URL {} cannot carry a path",
                base_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            base_url: parsed,
            token,
            client,
        })
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                PaymentError::ConfigError(format!("Gateway URL {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, body = %body, "Gateway returned an error");
            return Err(PaymentError::GatewayError(format!(
                "Gateway responded {}: {}",
                status, body
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    #[instrument(skip(self, request), fields(order_id = request.order_id))]
    async fn initialize_payment(
        &self,
        request: &InitializePaymentRequest,
    ) -> Result<InitializePaymentResponse> {
        let url = self.endpoint(&["payments", "initialize"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await?;
        Self::read_json(response).await
    }

    #[instrument(skip(self))]
    async fn verify_payment(&self, reference: &str) -> Result<VerifyPaymentResponse> {
        let url = self.endpoint(&["payments", "verify", reference])?;
        let response = self.authorize(self.client.get(url)).send().await?;
        Self::read_json(response).await
    }
}
