use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),
    #[error("User already exists")]
    DuplicateEmail,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Stale reference: {0}")]
    StaleReference(String),
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    #[error("password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Whether the message is meant to be shown next to the form that caused it.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::DuplicateEmail
                | Error::InvalidCredentials
                | Error::StaleReference(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
