use thiserror::Error;

/// Failures of one upstream exchange or of a whole paginated fetch.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited by upstream{}", retry_hint(*cooldown_secs))]
    RateLimited { cooldown_secs: Option<u64> },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("gave up after {attempts} attempts: {last}")]
    ExhaustedRetries { attempts: u32, last: Box<FetchError> },

    #[error("request gate closed")]
    GateClosed,
}

fn retry_hint(cooldown_secs: Option<u64>) -> String {
    cooldown_secs
        .map(|secs| format!(" (retry in {}s)", secs))
        .unwrap_or_default()
}

impl FetchError {
    /// Failures that count against the retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::InvalidResponse(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Network(format!("request timed out: {}", err))
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Why a single table row was dropped by the extractor.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RowError {
    #[error("row has {0} cells, expected at least {1}")]
    TooFewCells(usize, usize),

    #[error("cell {cell} is missing its <{element}> element")]
    MissingElement { cell: usize, element: &'static str },
}
