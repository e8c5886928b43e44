//! CSV scenario input and transition log output for the CLI.

pub mod event_writer;
pub mod scenario_reader;
