use std::io;
use thiserror::Error;

/// Everything that can go wrong while building or querying a
/// [`Landscape`](crate::landscape::Landscape).
#[derive(Error, Debug)]
pub enum TerrainError {
    #[error("failed to read heightmap source")]
    Io(#[from] io::Error),
    #[error("failed to decode heightmap image")]
    Image(#[from] image::ImageError),
    #[error("heightmap source is malformed: {0}")]
    Format(String),
    #[error("invalid terrain configuration: {0}")]
    Configuration(String),
    #[error("failed to parse terrain configuration")]
    ConfigFile(#[from] ron::error::SpannedError),
    #[error("{what} {value} is outside of the valid range 0..{limit}")]
    OutOfRange {
        what: &'static str,
        value: f32,
        limit: f32,
    },
}

impl TerrainError {
    /// Whether the error stems from an unreadable or undecodable height source.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            TerrainError::Io(_) | TerrainError::Image(_) | TerrainError::Format(_)
        )
    }

    /// Whether the error stems from an invalid terrain configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            TerrainError::Configuration(_) | TerrainError::ConfigFile(_)
        )
    }
}

pub type TerrainResult<T> = Result<T, TerrainError>;
