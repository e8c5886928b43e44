use crate::application::notice::Notice;
use crate::domain::attempt::{ErrorKind, PaymentStatus};
use crate::domain::events::TransitionEvent;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Csv,
    /// One JSON object per line.
    Json,
}

/// A transition as written to the run log.
#[derive(Debug, Serialize, PartialEq, Clone)]
pub struct EventRecord {
    pub at_ms: u64,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub reference: Option<String>,
    pub retry_count: u32,
    pub notice: Option<String>,
}

impl EventRecord {
    pub fn new(at: Duration, event: &TransitionEvent) -> Self {
        let error = event.snapshot.error.as_ref();
        Self {
            at_ms: u64::try_from(at.as_millis()).unwrap_or(u64::MAX),
            from: event.from,
            to: event.to,
            error_kind: error.map(|e| e.kind),
            error_message: error.map(|e| e.message.clone()),
            reference: event.snapshot.reference.clone(),
            retry_count: event.snapshot.retry_count,
            notice: Notice::from_event(event).map(|n| n.message),
        }
    }
}

enum Sink<W: Write> {
    Csv(csv::Writer<W>),
    Json(W),
}

/// Writes transition records as CSV (with a header row) or JSON lines.
pub struct EventWriter<W: Write> {
    sink: Sink<W>,
}

impl<W: Write> EventWriter<W> {
    pub fn new(target: W, format: OutputFormat) -> Self {
        let sink = match format {
            OutputFormat::Csv => Sink::Csv(csv::Writer::from_writer(target)),
            OutputFormat::Json => Sink::Json(target),
        };
        Self { sink }
    }

    pub fn write_record(&mut self, record: &EventRecord) -> Result<()> {
        match &mut self.sink {
            Sink::Csv(writer) => writer.serialize(record)?,
            Sink::Json(writer) => {
                serde_json::to_writer(&mut *writer, record).map_err(std::io::Error::from)?;
                writer.write_all(b"\n")?;
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        match &mut self.sink {
            Sink::Csv(writer) => writer.flush()?,
            Sink::Json(writer) => writer.flush()?,
        }
        Ok(())
    }
}
