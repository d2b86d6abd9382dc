use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Upstream returned HTTP {status} for {url}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("Failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Bundle has no next link")]
    NoNextPage,

    #[error("Failed to create HTTP client: {0}")]
    Build(String),
}

impl ClientError {
    /// Transport failures, throttling and server-side errors are worth
    /// another attempt; everything else fails the same way twice.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport { .. } => true,
            ClientError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            ClientError::Decode { .. } | ClientError::NoNextPage | ClientError::Build(_) => false,
        }
    }
}
