use thiserror::Error;

#[derive(Debug, Error)]
pub enum HourglassError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HourglassError {
    /// Short error code string, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            HourglassError::Config(_) => "CONFIG_ERROR",
            HourglassError::Io(_) => "IO_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, HourglassError>;
