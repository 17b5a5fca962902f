use thiserror::Error;

pub type AudienceResult<T> = Result<T, AudienceError>;

#[derive(Error, Debug)]
pub enum AudienceError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Segment name already exists: {0}")]
    DuplicateName(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AudienceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AudienceError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AudienceError::NotFound { .. })
    }
}
