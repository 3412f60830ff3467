//! Version markers in artifact filenames.
//!
//! A cataloged filename ends in `.v` followed by one to three dot-separated
//! decimal components, e.g. `service.v1.4.2`. Missing minor/patch components
//! are zero.

use crate::error::{Error, Result};
use semver::Version;
use std::path::Path;

/// Literal that introduces the version marker.
const VERSION_MARKER: &str = ".v";

/// Extract the semantic version from a filename or path.
///
/// # Errors
///
/// Returns [`Error::Version`] if the name has no valid version suffix.
pub fn parse_version(file_name: &str) -> Result<Version> {
    let name = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(file_name);

    let not_found = || Error::Version(format!("not found version in {name}"));

    let start = name.rfind(VERSION_MARKER).ok_or_else(not_found)?;
    let suffix = &name[start + VERSION_MARKER.len()..];

    let mut parts = [0u64; 3];
    let mut count = 0;
    for component in suffix.split('.') {
        if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
            return Err(not_found());
        }
        if count == parts.len() {
            return Err(Error::Version(format!(
                "too many version components in {name}"
            )));
        }
        parts[count] = component
            .parse()
            .map_err(|e| Error::Version(format!("invalid version component in {name}: {e}")))?;
        count += 1;
    }

    Ok(Version::new(parts[0], parts[1], parts[2]))
}
