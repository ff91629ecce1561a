//! Pre-flight file checks. Pure and synchronous: no disk or network access.

use crate::error::ValidationError;
use crate::model::FileMeta;

pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["csv", "xls", "xlsx"];

/// 50 MiB.
pub const MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Check a file against the acceptance rules. The first failing rule wins.
pub fn check(file: &FileMeta) -> Result<(), ValidationError> {
    let accepted = file
        .extension
        .as_deref()
        .is_some_and(|ext| ACCEPTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    if !accepted {
        return Err(ValidationError::UnsupportedType);
    }
    if file.size > MAX_UPLOAD_BYTES {
        return Err(ValidationError::TooLarge);
    }
    Ok(())
}

/// Like [`check`], with the empty-selection precondition in front.
pub fn check_selection(file: Option<&FileMeta>) -> Result<(), ValidationError> {
    match file {
        Some(f) => check(f),
        None => Err(ValidationError::NoFileSelected),
    }
}
