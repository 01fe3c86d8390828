//! Domain error types.
//!
//! Application plumbing (terminal, config, startup) stays on `color_eyre::Result`;
//! these enums cover the failures callers are expected to match on.

use thiserror::Error;

/// Failure of a call to the remote API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
  #[error("server returned HTTP {status}: {message}")]
  Status { status: u16, message: String },

  #[error("request failed: {0}")]
  Transport(String),

  #[error("unexpected response payload: {0}")]
  InvalidPayload(String),
}

impl From<reqwest::Error> for NetworkError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      NetworkError::InvalidPayload(err.to_string())
    } else {
      NetworkError::Transport(err.to_string())
    }
  }
}

impl From<serde_json::Error> for NetworkError {
  fn from(err: serde_json::Error) -> Self {
    NetworkError::InvalidPayload(err.to_string())
  }
}

/// A single missing or malformed field that blocks a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
  pub field: String,
  pub message: String,
}

impl FieldIssue {
  pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      message: message.into(),
    }
  }
}

/// Required fields missing before save. Never reaches the network layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", summarize(.issues))]
pub struct ValidationError {
  pub issues: Vec<FieldIssue>,
}

impl ValidationError {
  pub fn has_field(&self, field: &str) -> bool {
    self.issues.iter().any(|i| i.field == field)
  }
}

fn summarize(issues: &[FieldIssue]) -> String {
  issues
    .iter()
    .map(|i| i.message.as_str())
    .collect::<Vec<_>>()
    .join("; ")
}

/// Failure of the key/value backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
  #[error("storage quota exceeded ({needed} bytes needed, {available} available)")]
  QuotaExceeded { needed: usize, available: usize },

  #[error("storage backend error: {0}")]
  Backend(String),
}

impl From<rusqlite::Error> for StoreError {
  fn from(err: rusqlite::Error) -> Self {
    StoreError::Backend(err.to_string())
  }
}

/// Outcome of a failed save: either rejected locally or by the server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SaveError {
  #[error("{0}")]
  Validation(#[from] ValidationError),

  #[error(transparent)]
  Network(#[from] NetworkError),
}

/// Rejected edits to the parecer list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
  #[error("a prévia holds at most {max} pareceres")]
  ParecerLimit { max: usize },

  #[error("a prévia must keep at least one parecer")]
  LastParecer,

  #[error("no parecer with id {0}")]
  UnknownParecer(u32),
}
