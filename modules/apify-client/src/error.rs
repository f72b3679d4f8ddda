use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApifyError>;

#[derive(Debug, Error)]
pub enum ApifyError {
    /// The request never produced an HTTP response.
    #[error("Apify unreachable: {0}")]
    Network(String),

    /// 401/403: the API token is missing, wrong, or lacks access to the actor.
    #[error("Apify rejected the API token (status {status})")]
    Unauthorized { status: u16 },

    #[error("Apify API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// A 2xx response whose body was not the expected JSON.
    #[error("Unexpected Apify response: {0}")]
    Parse(String),
}

impl ApifyError {
    /// HTTP status, when the failure came with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApifyError::Unauthorized { status } | ApifyError::Api { status, .. } => Some(*status),
            ApifyError::Network(_) | ApifyError::Parse(_) => None,
        }
    }
}

impl From<reqwest::Error> for ApifyError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApifyError::Parse(err.to_string())
        } else {
            ApifyError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ApifyError {
    fn from(err: serde_json::Error) -> Self {
        ApifyError::Parse(err.to_string())
    }
}
