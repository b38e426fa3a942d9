use semver::Version;

use crate::stack::error::StackSystemError;

/// Major component of a tool version string.
///
/// Full semantic versions are parsed with `semver`; anything else falls back to the
/// leading number of the part before the first `-`.
pub fn major_version(version: &str) -> Option<u64> {
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed.major);
    }
    version.split('-').next()?.split('.').next()?.parse().ok()
}

/// Refuse to move a stack across a major version boundary.
///
/// When either side cannot be parsed the check is skipped.
pub fn check_compatible(stack: &str, existing: &str, current: &str) -> Result<(), StackSystemError> {
    let (old_major, new_major) = match (major_version(existing), major_version(current)) {
        (Some(old_major), Some(new_major)) => (old_major, new_major),
        (old_major, new_major) => {
            if old_major.is_none() {
                log::warn!("Unable to parse major number for existing stack: {existing}");
            }
            if new_major.is_none() {
                log::warn!("Unable to parse major number for mu: {current}");
            }
            return Ok(());
        }
    };

    log::debug!("comparing stack versions old:{old_major} new:{new_major}");

    let direction = if old_major < new_major {
        "newer"
    } else if old_major > new_major {
        "older"
    } else {
        return Ok(());
    };

    Err(StackSystemError::VersionIncompatible {
        stack: stack.to_string(),
        existing: existing.to_string(),
        current: current.to_string(),
        direction: direction.to_string(),
    })
}
