//! Error types shared by steps, the classifier and the scheduler.

/// What a workflow step can raise. The classifier turns these into
/// verdicts; nothing else inspects them.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Social service rejected the request. `codes` are the API error codes
    /// from the body, `status` the HTTP status.
    #[error("social api error (http {status}, codes {codes:?}): {message}")]
    Social {
        status: u16,
        codes: Vec<u32>,
        message: String,
    },

    /// Farm service rejected the request with an application code.
    #[error("farm api error (code={code}) {message}")]
    Farm { code: u16, message: String },

    /// A structured payload was expected and something else came back
    /// (usually an HTML error page).
    #[error("malformed response, expected {expected}: {snippet}")]
    Malformed {
        expected: &'static str,
        snippet: String,
    },

    /// Connection, proxy or timeout failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// Local failure (store, signing, programming error).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StepError {
    pub fn social(status: u16, codes: Vec<u32>, message: impl Into<String>) -> Self {
        StepError::Social {
            status,
            codes,
            message: message.into(),
        }
    }

    pub fn farm(code: u16, message: impl Into<String>) -> Self {
        StepError::Farm {
            code,
            message: message.into(),
        }
    }

    /// Keep the first 120 chars of an unexpected body.
    pub fn malformed(expected: &'static str, body: &str) -> Self {
        StepError::Malformed {
            expected,
            snippet: body.chars().take(120).collect(),
        }
    }
}

/// Invalid limits or settings, rejected before any task starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value}")]
    NonPositiveLimit { name: &'static str, value: i64 },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// Why a scheduler run aborted.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// A step failure classified as fatal; every other task was cancelled.
    #[error("batch aborted: {0}")]
    Fatal(#[source] StepError),

    /// A task panicked. Treated like a fatal verdict.
    #[error("task panicked: {0}")]
    Panicked(String),
}
