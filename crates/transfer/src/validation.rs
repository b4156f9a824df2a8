use crate::TransferError;

/// Validates a blob name before it is turned into a storage key or a file
/// inside a blob container directory.
///
/// Rejects:
/// - Empty names
/// - `.` and `..`
/// - Path separators (`/` or `\`)
/// - NUL and other control characters
pub fn validate_blob_name(name: &str) -> Result<(), TransferError> {
    if name.is_empty() {
        return Err(TransferError::InvalidPath("empty blob name".into()));
    }

    if name == "." || name == ".." {
        return Err(TransferError::InvalidPath(format!(
            "reserved blob name: {name}"
        )));
    }

    if let Some(c) = name.chars().find(|c| matches!(c, '/' | '\\')) {
        return Err(TransferError::InvalidPath(format!(
            "separator {c:?} not allowed in blob name: {name}"
        )));
    }

    if name.chars().any(char::is_control) {
        return Err(TransferError::InvalidPath(format!(
            "control character in blob name: {name:?}"
        )));
    }

    Ok(())
}
