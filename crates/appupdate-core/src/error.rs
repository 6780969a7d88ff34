use thiserror::Error;

/// Every way a single update check can fail.
///
/// All variants are terminal for the check that produced them: the checker
/// reports exactly one of them and never retries on its own.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    #[error("Invalid source configuration: {reason}")]
    InvalidSourceConfig { reason: String },

    #[error("Network error{}: {details}", timeout_suffix(.timeout))]
    Network { timeout: bool, details: String },

    #[error("Failed to parse `{field}`: {details}")]
    Parse { field: String, details: String },

    #[error("The {source_kind} source cannot report the latest version on this platform")]
    SourceLimitedByPlatform { source_kind: &'static str },

    #[error("Throttle state unavailable: {details}")]
    Storage { details: String },
}

impl UpdateError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidSourceConfig {
            reason: reason.into(),
        }
    }

    pub fn network(details: impl Into<String>) -> Self {
        Self::Network {
            timeout: false,
            details: details.into(),
        }
    }

    pub fn timeout(details: impl Into<String>) -> Self {
        Self::Network {
            timeout: true,
            details: details.into(),
        }
    }

    /// Map a transport error, keeping track of whether the client gave up on
    /// a timeout.
    pub fn network_from(error: &reqwest::Error) -> Self {
        Self::Network {
            timeout: error.is_timeout(),
            details: error.to_string(),
        }
    }

    pub fn parse(field: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Parse {
            field: field.into(),
            details: details.into(),
        }
    }

    pub fn storage(details: impl Into<String>) -> Self {
        Self::Storage {
            details: details.into(),
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Network { timeout: true, .. })
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn timeout_suffix(timeout: &bool) -> &'static str {
    if *timeout { " (timed out)" } else { "" }
}

impl From<std::io::Error> for UpdateError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(format!("{}: {err}", err.kind()))
    }
}

#[cfg(test)]
mod tests {
    use super::UpdateError;

    #[test]
    fn io_error_conversion_maps_to_storage_variant() {
        let mapped = UpdateError::from(std::io::Error::other("disk full"));
        assert!(
            matches!(mapped, UpdateError::Storage { ref details } if details.contains("disk full"))
        );
    }

    #[test]
    fn network_display_mentions_timeout_only_when_timed_out() {
        let timed_out = UpdateError::timeout("no response after 10s");
        assert_eq!(
            timed_out.to_string(),
            "Network error (timed out): no response after 10s"
        );
        assert!(timed_out.is_timeout());

        let refused = UpdateError::network("connection refused");
        assert_eq!(refused.to_string(), "Network error: connection refused");
        assert!(!refused.is_timeout());
    }

    #[test]
    fn parse_display_names_the_field() {
        let error = UpdateError::parse("versionCode", "expected an integer");
        assert_eq!(
            error.to_string(),
            "Failed to parse `versionCode`: expected an integer"
        );
    }
}
