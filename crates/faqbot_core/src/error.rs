use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaqError {
    #[error("catalog error: {0}")]
    Config(String),

    #[error("failed to load embedding model from {}: {reason}", .path.display())]
    ModelLoad { path: PathBuf, reason: String },

    #[error(transparent)]
    Embedding(#[from] anyhow::Error),

    #[error("unanswered log write failed: {0}")]
    LogWrite(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FaqError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, FaqError>;
