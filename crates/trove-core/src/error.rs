use thiserror::Error;

/// Top-level error type for the Trove system.
///
/// Validation and not-found conditions are recovered locally by callers and
/// surfaced as typed results. Index inconsistency triggers one automatic
/// repair attempt before it is surfaced. No variant is ever converted into a
/// silently empty result, so "no matches" and "failed to search" stay
/// distinguishable at every call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TroveError {
    /// Request rejected before any mutation (dimensionality mismatch,
    /// empty identifier, malformed weights).
    #[error("Validation error: {reason}")]
    Validation { reason: String },

    /// Get/delete of an absent (`id`, `model_tag`) key.
    #[error("Record not found")]
    NotFound,

    /// Upsert carried no vector; embedding generation is an external
    /// collaborator, so the pipeline rejects rather than proceeds.
    #[error("Upsert is missing a vector and no embedding provider is delegated")]
    MissingVector,

    /// Store and index disagree about reachability after a repair attempt.
    #[error("Index inconsistency: {detail}")]
    IndexInconsistency { detail: String },

    /// Query deadline exceeded; no partial ranked list is returned.
    #[error("Query deadline exceeded")]
    Timeout,

    /// Index for the partition has not been (re)built yet; queries fail
    /// fast instead of scanning the raw store.
    #[error("Index unavailable for model tag '{model_tag}'")]
    IndexUnavailable { model_tag: String },

    /// A rebuild for the partition is already running.
    #[error("Rebuild already in progress for model tag '{model_tag}'")]
    RebuildInProgress { model_tag: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TroveError {
    /// Shorthand for a [`TroveError::Validation`] with the given reason.
    pub fn validation(reason: impl Into<String>) -> Self {
        TroveError::Validation {
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for TroveError {
    fn from(err: toml::de::Error) -> Self {
        TroveError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for TroveError {
    fn from(err: toml::ser::Error) -> Self {
        TroveError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TroveError {
    fn from(err: serde_json::Error) -> Self {
        TroveError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Trove operations.
pub type Result<T> = std::result::Result<T, TroveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TroveError::validation("vector dimensionality mismatch");
        assert_eq!(
            err.to_string(),
            "Validation error: vector dimensionality mismatch"
        );
    }

    #[test]
    fn test_not_found_display() {
        assert_eq!(TroveError::NotFound.to_string(), "Record not found");
    }

    #[test]
    fn test_index_unavailable_names_partition() {
        let err = TroveError::IndexUnavailable {
            model_tag: "minilm-l6".to_string(),
        };
        assert!(err.to_string().contains("minilm-l6"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let trove_err: TroveError = io_err.into();
        assert!(matches!(trove_err, TroveError::Io(_)));
        assert!(trove_err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let bad_json = "{ invalid json }";
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str(bad_json);
        let trove_err: TroveError = err.unwrap_err().into();
        assert!(matches!(trove_err, TroveError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let bad_toml = "invalid = [[[";
        let err: std::result::Result<toml::Value, _> = toml::from_str(bad_toml);
        let trove_err: TroveError = err.unwrap_err().into();
        assert!(matches!(trove_err, TroveError::Config(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }

        assert_eq!(inner().unwrap(), "success");
    }
}
