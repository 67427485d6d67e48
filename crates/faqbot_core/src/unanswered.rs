//! Append-only record of questions that fell below the confidence threshold.

use crate::error::{FaqError, Result};
use crate::model::UnansweredRecord;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

pub const LOG_HEADER: [&str; 2] = ["Question", "Score"];

pub trait UnansweredSink: Send + Sync {
    fn record(&self, question: &str, score: f32) -> Result<()>;
}

/// CSV file sink. Rows are rendered in memory and written with a single
/// append, one at a time.
#[derive(Debug)]
pub struct CsvUnansweredLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl CsvUnansweredLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }
}

fn render_row(record: &UnansweredRecord, with_header: bool) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if with_header {
        writer
            .write_record(LOG_HEADER)
            .map_err(|e| FaqError::LogWrite(format!("render header: {e}")))?;
    }
    writer
        .serialize(record)
        .map_err(|e| FaqError::LogWrite(format!("render row: {e}")))?;
    writer
        .into_inner()
        .map_err(|e| FaqError::LogWrite(format!("flush row: {e}")))
}

impl UnansweredSink for CsvUnansweredLog {
    fn record(&self, question: &str, score: f32) -> Result<()> {
        let record = UnansweredRecord {
            question: question.to_string(),
            score,
        };

        // A poisoned guard still serializes appends.
        let _lock = self.guard.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| FaqError::LogWrite(format!("open {}: {e}", self.path.display())))?;
        let is_new = file
            .metadata()
            .map_err(|e| FaqError::LogWrite(format!("stat {}: {e}", self.path.display())))?
            .len()
            == 0;

        let bytes = render_row(&record, is_new)?;
        file.write_all(&bytes)
            .map_err(|e| FaqError::LogWrite(format!("append {}: {e}", self.path.display())))?;

        tracing::debug!(path = %self.path.display(), score, "unanswered question logged");
        Ok(())
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryUnansweredLog {
    records: Mutex<Vec<UnansweredRecord>>,
}

impl MemoryUnansweredLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<UnansweredRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl UnansweredSink for MemoryUnansweredLog {
    fn record(&self, question: &str, score: f32) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(UnansweredRecord {
                question: question.to_string(),
                score,
            });
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullUnansweredLog;

impl UnansweredSink for NullUnansweredLog {
    fn record(&self, _question: &str, _score: f32) -> Result<()> {
        Ok(())
    }
}

impl<S: UnansweredSink + ?Sized> UnansweredSink for std::sync::Arc<S> {
    fn record(&self, question: &str, score: f32) -> Result<()> {
        (**self).record(question, score)
    }
}
