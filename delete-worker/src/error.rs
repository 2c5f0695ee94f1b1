use delete_common::queue::QueueError;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors acquiring a verifier token for a signal.
#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("invalid verifier url: {0}")]
    Url(#[from] url::ParseError),
    #[error("verifier request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("verifier responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("verifier response holds no token")]
    EmptyToken,
}

/// Errors submitting delete requests downstream. All of them leave the item queued, so it is
/// retried once its lease runs out.
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("invalid command url: {0}")]
    Url(#[from] url::ParseError),
    #[error("command request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("command service responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
}

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("invalid work item: {0}")]
    InvalidInput(String),
    #[error("partner error: {0}")]
    Partner(#[from] VerifierError),
}

/// Why a single drained item was not forwarded.
#[derive(Error, Debug)]
pub enum DrainError {
    #[error(transparent)]
    Fanout(#[from] FanoutError),
    #[error("partner error: {0}")]
    Forward(#[from] ForwardError),
    #[error("failed to complete item: {0}")]
    Queue(#[from] QueueError),
}

impl DrainError {
    /// Label used for the outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            DrainError::Fanout(FanoutError::InvalidInput(_)) => "invalid",
            DrainError::Fanout(FanoutError::Partner(_)) => "verifier_error",
            DrainError::Forward(_) => "forward_error",
            DrainError::Queue(_) => "complete_error",
        }
    }
}

/// Startup errors of the worker binary.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error(transparent)]
    Verifier(#[from] VerifierError),
    #[error(transparent)]
    Forwarder(#[from] ForwardError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}
