//! Timestamp marker parsing.
//!
//! Replication servers publish a small `state.txt` next to each extract:
//!
//! ```text
//! #Sun Jan 01 00:00:02 UTC 2023
//! sequenceNumber=4821
//! timestamp=2023-01-01T00\:00\:00Z
//! ```
//!
//! The last non-blank line carries the authoritative snapshot timestamp in
//! Java-properties escaping.

/// Value after the final `=` of the last non-blank line, with backslash
/// escapes removed.  `None` for a blank document or an empty value.
pub fn parse_timestamp_marker(document: &str) -> Option<String> {
    let line = document.lines().rev().find(|l| !l.trim().is_empty())?;
    let raw = line.rsplit('=').next().unwrap_or(line);
    let value = raw.trim().replace('\\', "");
    (!value.is_empty()).then_some(value)
}
