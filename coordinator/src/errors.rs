use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

impl From<toml::ser::Error> for CoordinatorError {
    fn from(e: toml::ser::Error) -> Self {
        CoordinatorError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for CoordinatorError {
    fn from(e: toml::de::Error) -> Self {
        CoordinatorError::Serialization(e.to_string())
    }
}
