use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RawError {
    /// Any fault while opening or developing the RAW data itself
    #[error("Could not decode {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// User-facing failure surfaced by a node
    #[error("Failed to load RAW image: {0}")]
    LoadFailed(String),

    #[error("LibRaw error {code}: {message}")]
    Library { code: i32, message: String },

    #[error("Unsupported embedded image: {0}")]
    UnsupportedThumbnail(String),

    #[error("Resize failed: {0}")]
    Resize(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RawError>;
