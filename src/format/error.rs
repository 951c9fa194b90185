//! Codec-level errors.

use thiserror::Error;

/// Failure while encoding or decoding annotations, masks or embedding
/// tables.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Pascal VOC document could not be read or written
    #[error("XML error: {0}")]
    Xml(String),

    /// Content that does not follow the expected layout
    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    /// A field or archive entry that must be present is absent
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// Box or polygon values out of range or not finite
    #[error("Invalid coordinates: {message}")]
    InvalidCoordinates { message: String },

    /// Run lengths that do not cover the declared mask size
    #[error("Invalid RLE: {message}")]
    InvalidRle { message: String },

    /// PNG mask or image header
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// `.npy` embedding array
    #[error("NumPy array error: {0}")]
    Npy(String),

    /// Archive written by an incompatible format version
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },
}

impl FormatError {
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_coordinates(message: impl Into<String>) -> Self {
        Self::InvalidCoordinates {
            message: message.into(),
        }
    }

    pub fn invalid_rle(message: impl Into<String>) -> Self {
        Self::InvalidRle {
            message: message.into(),
        }
    }
}

impl From<quick_xml::DeError> for FormatError {
    fn from(e: quick_xml::DeError) -> Self {
        FormatError::Xml(e.to_string())
    }
}
