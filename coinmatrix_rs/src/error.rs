//! Fatal error taxonomy for design-matrix runs.
//!
//! Library functions return `anyhow::Result`; failures that belong to this
//! taxonomy are raised as a [`PipelineError`] so callers can recover the
//! category with `err.downcast_ref::<PipelineError>()`. Non-fatal data
//! quality issues live in [`crate::quality`] instead.

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid parameter, detected before any asset is loaded.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A derived step was invoked before the step it depends on.
    #[error("'{step}' requires '{prerequisite}' to run first")]
    Sequencing {
        step: &'static str,
        prerequisite: &'static str,
    },

    /// Loading one asset failed; the whole run is aborted.
    #[error("Failed to load asset '{asset}'")]
    UpstreamLoad {
        asset: String,
        #[source]
        source: anyhow::Error,
    },

    /// A matrix operation referenced a column that does not exist.
    #[error("Missing column '{0}'")]
    MissingColumn(String),
}

impl PipelineError {
    pub fn configuration(message: impl Into<String>) -> Self {
        PipelineError::Configuration(message.into())
    }

    pub fn upstream(asset: impl Into<String>, source: anyhow::Error) -> Self {
        PipelineError::UpstreamLoad {
            asset: asset.into(),
            source,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }

    pub fn is_sequencing(&self) -> bool {
        matches!(self, PipelineError::Sequencing { .. })
    }

    pub fn is_upstream_load(&self) -> bool {
        matches!(self, PipelineError::UpstreamLoad { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequencing_error_names_both_steps() {
        let err = PipelineError::Sequencing {
            step: "relative_lag_indicator",
            prerequisite: "standardize",
        };
        assert_eq!(
            err.to_string(),
            "'relative_lag_indicator' requires 'standardize' to run first"
        );
        assert!(err.is_sequencing());
    }

    #[test]
    fn upstream_error_keeps_its_source() {
        let err = PipelineError::upstream("btc", anyhow::anyhow!("file not found"));
        assert!(err.is_upstream_load());
        let source = std::error::Error::source(&err).expect("source");
        assert_eq!(source.to_string(), "file not found");
    }
}
