use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SdmClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Client request failed: {0}")]
    Generic(String),
}

impl SdmClientError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SdmClientError::Http(_) | SdmClientError::Auth(_) => true,
            SdmClientError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            SdmClientError::Decode(_) | SdmClientError::Io(_) | SdmClientError::Generic(_) => {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = SdmClientError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(err.is_transient());
        let err = SdmClientError::Status {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: String::new(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let err = SdmClientError::Status {
            status: StatusCode::NOT_FOUND,
            body: "no such device".into(),
        };
        assert!(!err.is_transient());
        assert!(!SdmClientError::Generic("boom".into()).is_transient());
    }
}
