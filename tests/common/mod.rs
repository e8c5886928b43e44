use std::io::{Error, Write};
use tempfile::NamedTempFile;

pub const HEADER: &str = "at_ms,action,order_id,currency,email,callback_url,reference,outcome";

/// An `initialize` row for order 42.
pub fn initialize(at_ms: u64, outcome: &str) -> String {
    format!(
        "{},initialize,42,USD,a@b.com,https://shop.example/cb,,{}",
        at_ms, outcome
    )
}

pub fn verify(at_ms: u64, reference: &str, outcome: &str) -> String {
    format!("{},verify,,,,,{},{}", at_ms, reference, outcome)
}

pub fn advance(at_ms: u64) -> String {
    format!("{},advance", at_ms)
}

/// Writes a scenario with the standard header to a temporary file.
pub fn write_scenario(rows: &[String]) -> Result<NamedTempFile, Error> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "{}", HEADER)?;
    for row in rows {
        writeln!(file, "{}", row)?;
    }
    file.flush()?;
    Ok(file)
}
