use crate::model::{Language, QuestionId};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Could not read catalog file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse catalog: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Duplicate question id {0}")]
    DuplicateId(QuestionId),

    #[error("Question {id} is invalid: {reason}")]
    InvalidQuestion { id: QuestionId, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// The execution environment failed, independently of the submitted code.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationInfrastructureError {
    #[error("No runner available for {0}")]
    RunnerUnavailable(Language),

    #[error("Submission language {submitted} does not match question language {expected}")]
    LanguageMismatch {
        submitted: Language,
        expected: Language,
    },

    #[error("Question {0} has no test cases configured")]
    NoTests(QuestionId),

    #[error("Could not prepare the sandbox: {0}")]
    Sandbox(#[source] std::io::Error),

    #[error("Could not start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Lost contact with the running program: {0}")]
    Process(#[source] std::io::Error),

    #[error("Remote judge error: {0}")]
    Remote(String),
}

impl EvaluationInfrastructureError {
    /// Whether retrying the same submission may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sandbox(_) | Self::Spawn { .. } | Self::Process(_) | Self::Remote(_) => true,
            Self::RunnerUnavailable(_) | Self::LanguageMismatch { .. } | Self::NoTests(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error(transparent)]
    Infrastructure(#[from] EvaluationInfrastructureError),

    #[error("Evaluation cancelled")]
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressionStorageError {
    #[error("Storage I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt stored value for {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("Unknown question {0}")]
    UnknownQuestion(QuestionId),

    #[error(transparent)]
    Storage(#[from] ProgressionStorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Unknown question {0}")]
    UnknownQuestion(QuestionId),

    #[error("Question {0} is locked")]
    QuestionLocked(QuestionId),

    #[error("A run is already in progress for question {0}")]
    RunInProgress(QuestionId),

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Infrastructure(#[from] EvaluationInfrastructureError),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Infrastructure(err) => err.is_retryable(),
            Self::RunInProgress(_) | Self::Cancelled => true,
            Self::UnknownQuestion(_) | Self::QuestionLocked(_) => false,
        }
    }
}
