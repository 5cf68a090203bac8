/// Shared error type used across all Manifold crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("validation: {0}")]
    Validation(String),

    #[error("index: {0}")]
    Index(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error looks like a model-id "not found" failure.
    ///
    /// Providers report unknown model ids inconsistently (404 status,
    /// `model_not_found` codes, plain prose); a substring match over the
    /// display form covers all of them and drives candidate fallback.
    pub fn is_model_not_found(&self) -> bool {
        let s = self.to_string().to_lowercase();
        s.contains("not_found") || s.contains("not found") || s.contains("404")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_not_found_matches_variants() {
        let e = Error::Provider {
            provider: "openai".into(),
            message: "HTTP 404 - model `gpt-x` does not exist".into(),
        };
        assert!(e.is_model_not_found());

        let e = Error::Http("model_not_found: gpt-x".into());
        assert!(e.is_model_not_found());

        let e = Error::Timeout("provider timed out after 12000ms".into());
        assert!(!e.is_model_not_found());
    }
}
