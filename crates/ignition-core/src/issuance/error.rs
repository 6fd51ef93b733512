//! Error types for machine configuration issuance.

use ignition_abstraction::GenerationError;
use thiserror::Error;

use crate::state::StoreError;

/// Errors returned by [`super::MachineConfigService::handle_request`].
///
/// None of these are cached; the machine's next boot request retries.
#[derive(Error, Debug)]
pub enum IssuanceError {
    /// Rendering the configuration failed.
    #[error("Config generation failed: {0}")]
    Generation(#[from] GenerationError),

    /// The new record could not be persisted, so it was not kept.
    #[error("Failed to persist node record: {0}")]
    Store(#[from] StoreError),

    /// No cluster parameters have been collected yet.
    #[error("Cluster parameters have not been provided")]
    MissingParams,

    /// The request did not identify the machine.
    #[error("Request is missing the machine identity")]
    MissingIdentity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_error_conversion() {
        let err: IssuanceError = GenerationError::Render("bad template".to_string()).into();
        assert!(matches!(err, IssuanceError::Generation(GenerationError::Render(_))));
        assert!(err.to_string().contains("bad template"));
    }
}
