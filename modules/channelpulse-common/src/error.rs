use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelPulseError {
    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
