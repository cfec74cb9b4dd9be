/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid account id: {0}")]
    InvalidAccountId(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unknown relation: {0}")]
    InvalidRelation(String),
}
