use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParticipantError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Unknown mesh error: {0}")]
    UnknownMesh(String),
    #[error("Initialization error: {0}")]
    Initialization(String),
    #[error("Collaborator call error in {operation}: {message}")]
    CollaboratorCall {
        operation: &'static str,
        message: String,
    },
    #[error("Field shape error: {0}")]
    FieldShape(String),
}

impl ParticipantError {
    pub fn call(operation: &'static str, message: impl Into<String>) -> Self {
        ParticipantError::CollaboratorCall {
            operation,
            message: message.into(),
        }
    }
}
