#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum TrialMatchError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    #[error("API error from {api}: {message}")]
    Api { api: String, message: String },

    #[error("API JSON error from {api}: {source}")]
    ApiJson {
        api: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Registry unavailable while searching '{keyword}': {message}")]
    RegistryUnavailable { keyword: String, message: String },

    #[error("Request to {api} timed out after {millis}ms")]
    Timeout { api: String, millis: u128 },

    #[error("Match run was cancelled before completion")]
    Cancelled,

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrialMatchError {
    /// Wraps any registry-layer failure for `keyword` into the
    /// `RegistryUnavailable` category. Cancellation passes through unchanged.
    pub(crate) fn for_keyword(self, keyword: &str) -> Self {
        match self {
            Self::Cancelled | Self::RegistryUnavailable { .. } => self,
            other => Self::RegistryUnavailable {
                keyword: keyword.to_string(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TrialMatchError;

    #[test]
    fn registry_unavailable_display_includes_keyword() {
        let err = TrialMatchError::RegistryUnavailable {
            keyword: "BRAF".to_string(),
            message: "HTTP 503".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("'BRAF'"));
        assert!(msg.contains("HTTP 503"));
    }

    #[test]
    fn for_keyword_wraps_api_errors() {
        let err = TrialMatchError::Api {
            api: "clinicaltrials.gov".to_string(),
            message: "HTTP 500: upstream failure".to_string(),
        }
        .for_keyword("KRAS");

        match err {
            TrialMatchError::RegistryUnavailable { keyword, message } => {
                assert_eq!(keyword, "KRAS");
                assert!(message.contains("clinicaltrials.gov"));
                assert!(message.contains("HTTP 500"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn for_keyword_keeps_cancellation_and_existing_keyword() {
        assert!(matches!(
            TrialMatchError::Cancelled.for_keyword("BRAF"),
            TrialMatchError::Cancelled
        ));

        let err = TrialMatchError::RegistryUnavailable {
            keyword: "EGFR".into(),
            message: "timeout".into(),
        }
        .for_keyword("BRAF");
        assert!(err.to_string().contains("'EGFR'"));
    }

    #[test]
    fn timeout_display_includes_api_and_duration() {
        let err = TrialMatchError::Timeout {
            api: "clinicaltrials.gov".to_string(),
            millis: 30_000,
        };

        let msg = err.to_string();
        assert!(msg.contains("clinicaltrials.gov"));
        assert!(msg.contains("30000ms"));
    }
}
