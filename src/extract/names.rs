//! Validation of names that become path components under `containers/`.

use crate::error::{ExtractError, ExtractResult};

/// Reject anything that is not a single, ordinary path segment.
///
/// `what` names the offending field in the error message.
pub fn validate_segment(what: &str, name: &str) -> ExtractResult<()> {
    if is_plain_segment(name) {
        Ok(())
    } else {
        Err(ExtractError::InvalidConfiguration(format!(
            "{what} {name:?} must be a plain file name"
        )))
    }
}

pub(crate) fn is_plain_segment(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Reduce an untrusted filename (e.g. from `Content-Disposition`) to its last
/// segment.  Returns `None` when nothing usable remains.
pub fn last_segment(name: &str) -> Option<String> {
    let candidate = name
        .trim()
        .trim_matches('"')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    is_plain_segment(candidate).then(|| candidate.to_string())
}
