//! Error taxonomy for the binning-and-aggregation pipeline.
//!
//! Every stage returns [`Result`]; `main` wraps these into `anyhow`
//! errors with context before reporting them to the user.

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised anywhere between roster parsing and report assembly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed roster, month, diagnosis code, or other user input.
    #[error("Invalid input: {0}")]
    Format(String),

    /// Network or HTTP failure while talking to the extraction service.
    #[error("Remote fetch failed: {0}")]
    RemoteFetch(String),

    /// The extracted table is missing columns or holds unusable values.
    #[error("Unexpected table schema: {0}")]
    Schema(String),

    /// A count vector does not match the bucket layout it was built for.
    #[error("Vector length mismatch: expected {expected} buckets, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The aggregation round failed or the parties fell out of step.
    #[error("Aggregation protocol error: {0}")]
    Protocol(String),

    /// The requested analysis only extracts data so far.
    #[error("{0} analysis is not implemented yet")]
    NotImplemented(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn format(message: impl Into<String>) -> Self {
        Error::Format(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_mismatch_message() {
        let err = Error::LengthMismatch {
            expected: 10,
            actual: 9,
        };
        assert_eq!(
            err.to_string(),
            "Vector length mismatch: expected 10 buckets, got 9"
        );
    }

    #[test]
    fn test_not_implemented_message() {
        let err = Error::NotImplemented("Diagnosis coincidence");
        assert!(err.to_string().contains("not implemented"));
    }
}
