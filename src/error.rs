use thiserror::Error;

/// Errors raised while wiring an engine or coordinator together.
///
/// These are the only failures surfaced by the crate: once built, every
/// operation degrades to a logged state transition instead of an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A required collaborator was not supplied to the builder.
    #[error("missing required collaborator: {collaborator}")]
    MissingCollaborator {
        /// Name of the collaborator that was left unset.
        collaborator: &'static str,
    },
    /// No Tokio runtime is available to drive the cancellation timer.
    #[error("no tokio runtime available for the cancellation timer")]
    NoRuntime,
}

impl BuildError {
    /// Construct a [`BuildError::MissingCollaborator`] for `collaborator`.
    pub fn missing(collaborator: &'static str) -> Self {
        BuildError::MissingCollaborator { collaborator }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_collaborator_names_the_field() {
        let err = BuildError::missing("disable sink");
        assert_eq!(err.to_string(), "missing required collaborator: disable sink");
    }
}
