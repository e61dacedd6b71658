use thiserror::Error;

/// How a failed network operation should be handled by the caller.
///
/// Jobs and pollers never see raw transport errors; they branch on this
/// classification only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff.
    Transient,
    /// HTTP 429. Terminal for this attempt; the caller decides whether to
    /// try again later.
    RateLimited,
    /// Permanent. Retrying cannot succeed.
    Terminal,
    /// The community server rejected unblinded authentication. Refresh
    /// capabilities and retry once with blinded auth.
    BlindingRequired,
}

/// Errors produced by the network layer.
#[derive(Error, Debug)]
pub enum NetError {
    /// Transport-level failure (connect, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status that has no more specific variant.
    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The server rejected our timestamp as too far from its own clock.
    #[error("Request timestamp out of sync with server clock")]
    ClockOutOfSync,

    /// The community server requires blinded ids for this operation.
    #[error("Server requires blinded ids")]
    BlindingRequired,

    /// Payload exceeds the storage network's message cap.
    #[error("Message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: usize, max: usize },

    /// Response body was not the JSON we expected.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Response payload was not valid base64.
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Response was structurally valid but semantically wrong
    /// (e.g. a batch reply count that does not match the call count).
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Signing or envelope failure while preparing a request.
    #[error("Crypto error: {0}")]
    Crypto(#[from] umbra_shared::CryptoError),
}

impl NetError {
    /// Classify this error for retry handling.
    ///
    /// Rules: 429 is rate-limited; clock skew, oversized payloads, crypto
    /// failures and any other 4xx are terminal; 5xx, transport faults and
    /// malformed responses are transient.
    pub fn classify(&self) -> ErrorClass {
        match self {
            NetError::BlindingRequired => ErrorClass::BlindingRequired,
            NetError::ClockOutOfSync => ErrorClass::Terminal,
            NetError::MessageTooLarge { .. } => ErrorClass::Terminal,
            NetError::Crypto(_) => ErrorClass::Terminal,
            NetError::Status { status: 429, .. } => ErrorClass::RateLimited,
            NetError::Status { status, .. } if (400..500).contains(status) => ErrorClass::Terminal,
            NetError::Status { .. } => ErrorClass::Transient,
            NetError::Http(_)
            | NetError::Json(_)
            | NetError::Base64(_)
            | NetError::InvalidResponse(_) => ErrorClass::Transient,
        }
    }

    /// True when [`NetError::classify`] is [`ErrorClass::Transient`].
    pub fn is_transient(&self) -> bool {
        self.classify() == ErrorClass::Transient
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_table() {
        let cases = [
            (
                NetError::Status {
                    status: 429,
                    body: String::new(),
                },
                ErrorClass::RateLimited,
            ),
            (
                NetError::Status {
                    status: 400,
                    body: String::new(),
                },
                ErrorClass::Terminal,
            ),
            (
                NetError::Status {
                    status: 404,
                    body: String::new(),
                },
                ErrorClass::Terminal,
            ),
            (
                NetError::Status {
                    status: 500,
                    body: String::new(),
                },
                ErrorClass::Transient,
            ),
            (NetError::ClockOutOfSync, ErrorClass::Terminal),
            (
                NetError::MessageTooLarge { size: 1, max: 0 },
                ErrorClass::Terminal,
            ),
            (NetError::BlindingRequired, ErrorClass::BlindingRequired),
            (
                NetError::InvalidResponse("bad".into()),
                ErrorClass::Transient,
            ),
        ];
        for (error, expected) in cases {
            assert_eq!(error.classify(), expected, "{error}");
        }
    }
}
