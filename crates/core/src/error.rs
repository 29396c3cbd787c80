use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    /// Another principal holds the target's debugging capability.
    #[error("Cannot attach debugger: {0}")]
    CapabilityConflict(String),

    #[error("Attach failed: {0}")]
    AttachFailure(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("Navigation timed out: {0}")]
    NavigationTimeout(String),

    #[error("Content not ready: {0}")]
    ReadinessTimeout(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_capability_conflict(&self) -> bool {
        matches!(self, Error::CapabilityConflict(_))
    }

    /// Message suitable for showing to the person who triggered the capture.
    pub fn user_message(&self) -> String {
        match self {
            Error::CapabilityConflict(_) => {
                "Cannot attach debugger - another extension (like Ghostery, ad blockers) may be \
                 interfering. Try disabling other extensions for this site."
                    .to_string()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
