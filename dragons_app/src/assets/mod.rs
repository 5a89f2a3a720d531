//! Asset loading: Wavefront OBJ meshes and PNG textures

pub mod image_loader;
pub mod obj_loader;

use thiserror::Error;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// File could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// OBJ line could not be parsed
    #[error("Parse error on line {line}: {reason}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// What was wrong
        reason: String,
    },

    /// File parsed but holds nothing drawable
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Image decoding failed
    #[error("Failed to load image: {0}")]
    LoadFailed(String),
}
