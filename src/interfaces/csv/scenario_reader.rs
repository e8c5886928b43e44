use crate::domain::order::OrderInfo;
use crate::error::{PaymentError, Result};
use crate::infrastructure::simulated::Outcome;
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Initialize,
    Verify,
    Reset,
    /// Only moves time forward.
    Advance,
}

/// One scripted step of a checkout scenario.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct ScenarioStep {
    /// Offset from the start of the run.
    pub at_ms: u64,
    pub action: Action,
    #[serde(default)]
    pub order_id: Option<u64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    /// Scripted answer of the simulated gateway for this step.
    #[serde(default)]
    pub outcome: Option<Outcome>,
}

impl ScenarioStep {
    pub fn at(&self) -> Duration {
        Duration::from_millis(self.at_ms)
    }

    /// The order carried by an `initialize` step.
    pub fn order(&self) -> Result<OrderInfo> {
        OrderInfo::new(
            self.order_id.ok_or_else(|| missing("order_id"))?,
            self.currency.clone().ok_or_else(|| missing("currency"))?,
            self.email.clone().ok_or_else(|| missing("email"))?,
            self.callback_url.clone().ok_or_else(|| missing("callback_url"))?,
        )
    }

    /// The reference carried by a `verify` step.
    pub fn reference(&self) -> Result<&str> {
        self.reference.as_deref().ok_or_else(|| missing("reference"))
    }
}

fn missing(field: &str) -> PaymentError {
    PaymentError::ValidationError(format!("Missing field '{}'", field))
}

/// Reads scenario steps from a CSV source.
///
/// Columns: `at_ms, action, order_id, currency, email, callback_url,
/// reference, outcome`. Whitespace is trimmed and trailing empty columns may
/// be omitted.
pub struct ScenarioReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ScenarioReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes steps.
    pub fn steps(self) -> impl Iterator<Item = Result<ScenarioStep>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
