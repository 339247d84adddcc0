//! Utility modules

pub mod upload;

pub use upload::{sanitize_filename, upload_path, validate_extension, validate_size, UploadError};
