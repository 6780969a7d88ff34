use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

const VERSION_NAME_FIELD: &str = "versionName";

/// The latest version as reported by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_name: String,
    /// Build number. Release feeds never carry one and manifests may omit it.
    pub version_code: Option<u64>,
    pub download_url: String,
    pub release_notes: Option<String>,
}

/// The version currently installed on the host, read by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledVersion {
    pub version_name: String,
    pub version_code: u64,
}

impl InstalledVersion {
    pub fn new(version_name: impl Into<String>, version_code: u64) -> Self {
        Self {
            version_name: version_name.into(),
            version_code,
        }
    }
}

/// Decide whether `latest` is newer than what is installed.
///
/// The version code is authoritative whenever the source supplied one; the
/// version name is only consulted when it did not.
///
/// # Errors
/// Returns [`UpdateError::Parse`] when the fallback name comparison meets a
/// segment that is not a plain number.
pub fn is_update_available(
    installed: &InstalledVersion,
    latest: &VersionRecord,
) -> Result<bool, UpdateError> {
    match latest.version_code {
        Some(code) => Ok(code > installed.version_code),
        None => Ok(
            compare_version_names(&latest.version_name, &installed.version_name)?
                == Ordering::Greater,
        ),
    }
}

/// Compare two dotted numeric version names segment by segment.
///
/// Missing trailing segments count as zero, so `1.2` and `1.2.0` are equal.
/// One leading `v` or `V` is ignored on either side, matching release tags.
///
/// # Errors
/// Returns [`UpdateError::Parse`] when either name has an empty or
/// non-numeric segment.
pub fn compare_version_names(left: &str, right: &str) -> Result<Ordering, UpdateError> {
    let left = parse_segments(left)?;
    let right = parse_segments(right)?;

    let len = left.len().max(right.len());
    for idx in 0..len {
        let l = left.get(idx).copied().unwrap_or(0);
        let r = right.get(idx).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => {}
            other => return Ok(other),
        }
    }

    Ok(Ordering::Equal)
}

fn parse_segments(name: &str) -> Result<Vec<u64>, UpdateError> {
    let trimmed = name.trim();
    let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(UpdateError::parse(VERSION_NAME_FIELD, "version name is empty"));
    }

    trimmed
        .split('.')
        .map(|segment| {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return Err(UpdateError::parse(
                    VERSION_NAME_FIELD,
                    format!("segment '{segment}' of '{trimmed}' is not numeric"),
                ));
            }
            segment.parse::<u64>().map_err(|error| {
                UpdateError::parse(
                    VERSION_NAME_FIELD,
                    format!("segment '{segment}' of '{trimmed}': {error}"),
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use super::*;

    fn installed(name: &str, code: u64) -> InstalledVersion {
        InstalledVersion::new(name, code)
    }

    fn latest(name: &str, code: Option<u64>) -> VersionRecord {
        VersionRecord {
            version_name: name.to_string(),
            version_code: code,
            download_url: "https://example.com/app".to_string(),
            release_notes: None,
        }
    }

    #[test]
    fn version_code_is_strictly_ordered() {
        for installed_code in 0..6_u64 {
            for latest_code in 0..6_u64 {
                let available = is_update_available(
                    &installed("1.0", installed_code),
                    &latest("1.0", Some(latest_code)),
                )
                .expect("codes always compare");
                assert_eq!(
                    available,
                    latest_code > installed_code,
                    "installed={installed_code} latest={latest_code}"
                );
            }
        }
    }

    #[test]
    fn equal_codes_ignore_name_differences() {
        let relabeled = latest("2.0-relabel", Some(7));
        assert!(!is_update_available(&installed("1.0", 7), &relabeled).unwrap());
        assert!(!is_update_available(&installed("9.9", 7), &latest("1.0", Some(7))).unwrap());
    }

    #[test]
    fn code_overrides_name() {
        assert!(is_update_available(&installed("3.0", 10), &latest("2.0", Some(11))).unwrap());
        assert!(!is_update_available(&installed("1.0", 10), &latest("2.0", Some(9))).unwrap());
    }

    #[test]
    fn name_fallback_treats_missing_segments_as_zero() {
        assert!(!is_update_available(&installed("1.2.0", 0), &latest("1.2", None)).unwrap());
        assert!(!is_update_available(&installed("1.2", 0), &latest("1.2.0", None)).unwrap());
        assert_eq!(compare_version_names("1.2", "1.2.0").unwrap(), Ordering::Equal);
    }

    #[test]
    fn name_fallback_compares_numerically() {
        assert!(is_update_available(&installed("1.2.9", 0), &latest("1.3", None)).unwrap());
        assert!(is_update_available(&installed("1.9", 0), &latest("1.10", None)).unwrap());
        assert!(!is_update_available(&installed("2.0.1", 0), &latest("2.0", None)).unwrap());
    }

    #[test]
    fn name_fallback_rejects_malformed_segments() {
        let result = is_update_available(&installed("1.2", 0), &latest("1.a", None));
        assert!(
            matches!(result, Err(UpdateError::Parse { ref field, .. }) if field == "versionName"),
            "expected versionName parse error, got {result:?}"
        );

        assert!(compare_version_names("1.2", "1..2").is_err());
        assert!(compare_version_names("", "1.0").is_err());
        assert!(compare_version_names("1.0-beta", "1.0").is_err());
    }

    #[test]
    fn name_fallback_ignores_tag_prefix() {
        assert!(!is_update_available(&installed("v1.2.0", 0), &latest("1.2", None)).unwrap());
        assert!(is_update_available(&installed("V1.2.0", 0), &latest("1.3.0", None)).unwrap());
        assert_eq!(compare_version_names("v2.0", "2.0.0").unwrap(), Ordering::Equal);
        assert!(compare_version_names("v", "1.0").is_err());
        assert!(compare_version_names("vv1.0", "1.0").is_err());
    }

    #[test]
    fn comparison_leaves_inputs_untouched() {
        let installed = installed("1.0", 1);
        let latest = latest("1.1", None);
        let before = (installed.clone(), latest.clone());

        is_update_available(&installed, &latest).unwrap();

        assert_eq!((installed, latest), before);
    }
}
