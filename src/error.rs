use std::fmt;

use thiserror::Error;

use crate::catalog::FoodId;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// One item that could not be indexed during `CatalogIndex::build`.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildFailure {
    pub id: FoodId,
    pub reason: String,
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("index build failed for {} item(s): {}", .failures.len(), format_failures(.failures))]
    IndexBuild { failures: Vec<BuildFailure> },

    #[error("catalog index has not been built")]
    IndexNotBuilt,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("upstream {call} call failed ({context}): {source}")]
    UpstreamUnavailable {
        call: &'static str,
        context: String,
        #[source]
        source: BoxError,
    },
}

impl RagError {
    pub fn upstream(call: &'static str, context: impl Into<String>, source: anyhow::Error) -> Self {
        RagError::UpstreamUnavailable {
            call,
            context: context.into(),
            source: source.into(),
        }
    }

    /// Only upstream failures are worth retrying; everything else is a caller bug.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::UpstreamUnavailable { .. })
    }
}

fn format_failures(failures: &[BuildFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, RagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_lists_every_failing_id() {
        let err = RagError::IndexBuild {
            failures: vec![
                BuildFailure { id: FoodId::from("3"), reason: "empty text".into() },
                BuildFailure { id: FoodId::from("7"), reason: "NaN in embedding".into() },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 item(s)"), "{msg}");
        assert!(msg.contains("3: empty text"), "{msg}");
        assert!(msg.contains("7: NaN in embedding"), "{msg}");
        assert!(!err.is_retryable());
    }

    #[test]
    fn upstream_errors_are_retryable() {
        let err = RagError::upstream("embed", "query 'soup'", anyhow::anyhow!("model offline"));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("upstream embed call failed (query 'soup')"));
    }
}
