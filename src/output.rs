use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    AnnotateReport, ProgressEvent, ProgressSink, RulesReport, SurveyReport, UpdateReport,
};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_update(report: &UpdateReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_annotate(report: &AnnotateReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_survey(report: &SurveyReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_rules(report: &RulesReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards progress messages to the log instead of a terminal.
impl ProgressSink for JsonOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => {
                tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message)
            }
            None => tracing::debug!("{}", event.message),
        }
    }
}
