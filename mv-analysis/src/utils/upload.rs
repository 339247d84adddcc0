//! Upload validation and filename sanitization

use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Longest filename kept after sanitization
const MAX_FILENAME_LEN: usize = 255;

const UNSAFE_CHARS: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*', '\0'];

#[derive(Debug, Error, PartialEq)]
pub enum UploadError {
    #[error("No file provided")]
    MissingFile,

    #[error("Uploaded file has no filename")]
    MissingFilename,

    #[error("Unsupported file type '{extension}'. Allowed: {allowed}")]
    UnsupportedExtension { extension: String, allowed: String },

    #[error("Uploaded file is empty")]
    Empty,

    #[error("File too large: {size} bytes (max {max} bytes)")]
    TooLarge { size: u64, max: u64 },
}

/// Replace path separators, `..` and shell-hostile characters with `_`
///
/// The result is capped at 255 bytes on a char boundary, keeping the
/// extension when possible.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .replace("..", "_")
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    let trimmed = replaced.trim();

    if trimmed.is_empty() {
        return "upload".to_string();
    }
    if trimmed.len() <= MAX_FILENAME_LEN {
        return trimmed.to_string();
    }

    let extension = Path::new(trimmed)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| e.len() < 16)
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    let mut stem_budget = MAX_FILENAME_LEN - extension.len();
    while !trimmed.is_char_boundary(stem_budget) {
        stem_budget -= 1;
    }
    format!("{}{}", &trimmed[..stem_budget], extension)
}

/// Lowercased extension without the dot
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn validate_extension(filename: &str, allowed: &[String]) -> Result<String, UploadError> {
    let extension = file_extension(filename).unwrap_or_default();
    if allowed.iter().any(|a| a.eq_ignore_ascii_case(&extension)) {
        Ok(extension)
    } else {
        Err(UploadError::UnsupportedExtension {
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                extension
            },
            allowed: allowed.join(", "),
        })
    }
}

/// Size must satisfy `0 < size <= max`
pub fn validate_size(size: u64, max: u64) -> Result<(), UploadError> {
    if size == 0 {
        return Err(UploadError::Empty);
    }
    if size > max {
        return Err(UploadError::TooLarge { size, max });
    }
    Ok(())
}

/// Storage location for an uploaded file: `<dir>/<job_id>_<sanitized name>`
pub fn upload_path(dir: &Path, job_id: Uuid, sanitized_name: &str) -> PathBuf {
    dir.join(format!("{}_{}", job_id, sanitized_name))
}
