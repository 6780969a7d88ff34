//! Update detection for installed applications.
//!
//! This crate holds the whole detection pipeline and no presentation:
//! - Version sources: app-store listing, GitHub-style release feed, and
//!   self-hosted XML/JSON manifests.
//! - Manifest parsing into a normalized version record.
//! - Version comparison by build code, falling back to dotted version names.
//! - Show-frequency throttling backed by a durable counter.
//! - A cancellable checker that reports one outcome per check.

mod checker;
mod error;
mod manifest;
mod source;
mod throttle;
mod version;

/// Background check orchestration and its outcome types.
pub use checker::{
    CheckOutcome, CheckerConfig, CheckerState, DEFAULT_FETCH_TIMEOUT, LatestVersion,
    UpdateChecker, check_latest,
};
/// Error type shared by every stage of a check.
pub use error::UpdateError;
/// Manifest formats, configurable field names, and the parser.
pub use manifest::{ManifestFields, ManifestFormat, parse_manifest};
/// Source configuration, the source trait, and its implementations.
pub use source::{
    DEFAULT_GITHUB_API, ManifestSource, ReleaseFeedSource, SourceConfig, SourceKind,
    StoreListingSource, VersionSource, build_source,
};
/// Show-frequency policy and counter stores.
pub use throttle::{FileThrottleStore, MemoryThrottleStore, ShowEvery, ThrottleStore, is_able_to_show};
/// Version records and comparison.
pub use version::{InstalledVersion, VersionRecord, compare_version_names, is_update_available};
