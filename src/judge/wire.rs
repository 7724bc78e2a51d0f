//! JSON bodies exchanged between the remote runner and the judge server.
//!
//! `check` answers with a [`CheckOutcome`](super::CheckOutcome), `run` with an
//! [`Execution`](super::Execution) and `sync` with a [`Verdict`](super::Verdict).
//! Any failure of the server's own environment is an [`ErrorBody`] with a
//! non-2xx status.

use crate::model::{Language, QuestionId, TestCase};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub language: Language,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub language: Language,
    pub source: String,
    pub test: TestCase,
    pub timeout_ms: u64,
    pub max_output_bytes: usize,
}

/// Evaluates a whole submission against a catalog question on the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub question_id: QuestionId,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub retryable: bool,
}
