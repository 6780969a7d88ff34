use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::UpdateError;
use crate::source::{SourceConfig, VersionSource, build_source};
use crate::throttle::{ShowEvery, ThrottleStore, is_able_to_show};
use crate::version::{InstalledVersion, VersionRecord, is_update_available};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one checker needs, fixed before [`UpdateChecker::start`].
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    pub source: SourceConfig,
    pub installed: InstalledVersion,
    /// Surface every Nth detected update. Must be at least 1.
    pub show_every: i64,
    pub fetch_timeout: Duration,
}

impl CheckerConfig {
    #[must_use]
    pub fn new(source: SourceConfig, installed: InstalledVersion, show_every: i64) -> Self {
        Self {
            source,
            installed,
            show_every,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// The single terminal result of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// A newer version exists. `show` is false when the throttle policy
    /// suppresses this particular detection.
    UpdateAvailable { record: VersionRecord, show: bool },
    NoUpdate { latest: VersionRecord },
    Failed(UpdateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckerState {
    Idle,
    Running,
    Completed,
    Cancelled,
}

/// Lifecycle as tracked by the background task. `Delivering` spans claiming
/// a result, recording it in the throttle store and calling the listener; it
/// reads as [`CheckerState::Running`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Delivering,
    Completed,
    Cancelled,
}

impl Phase {
    fn public(self) -> CheckerState {
        match self {
            Self::Idle => CheckerState::Idle,
            Self::Running | Self::Delivering => CheckerState::Running,
            Self::Completed => CheckerState::Completed,
            Self::Cancelled => CheckerState::Cancelled,
        }
    }

    fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Delivering)
    }
}

/// Result of the un-throttled part of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestVersion {
    pub record: VersionRecord,
    pub update_available: bool,
}

/// Fetch, parse and compare against the installed version.
///
/// # Errors
/// Returns the source's network or parse error, [`UpdateError::Network`] with
/// `timeout` set when the fetch takes longer than `fetch_timeout`, or a parse
/// error from the version comparison.
pub async fn check_latest(
    source: &dyn VersionSource,
    installed: &InstalledVersion,
    fetch_timeout: Duration,
) -> Result<LatestVersion, UpdateError> {
    let payload = match tokio::time::timeout(fetch_timeout, source.fetch()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(UpdateError::timeout(format!(
                "{} fetch exceeded {fetch_timeout:?}",
                source.kind()
            )));
        }
    };

    let record = source.parse(&payload)?;
    let update_available = is_update_available(installed, &record)?;
    debug!(
        "Latest {} version {} (code {:?}), installed {} (code {}), update available: {update_available}",
        source.kind(),
        record.version_name,
        record.version_code,
        installed.version_name,
        installed.version_code,
    );

    Ok(LatestVersion {
        record,
        update_available,
    })
}

enum SourceSelection {
    FromConfig(reqwest::Client),
    Fixed(Arc<dyn VersionSource>),
}

/// Runs one background update check at a time and reports its outcome once.
///
/// A checker moves `Idle → Running → Completed | Cancelled`. After finishing
/// it stays inert until [`UpdateChecker::reset`]. Dropping a running checker
/// cancels it.
pub struct UpdateChecker {
    config: CheckerConfig,
    store: Arc<dyn ThrottleStore>,
    source: SourceSelection,
    phase: Arc<Mutex<Phase>>,
    cancel_token: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl UpdateChecker {
    /// Checker whose source is built from `config.source` using `client`.
    #[must_use]
    pub fn new(
        config: CheckerConfig,
        store: Arc<dyn ThrottleStore>,
        client: reqwest::Client,
    ) -> Self {
        Self::with_selection(config, store, SourceSelection::FromConfig(client))
    }

    /// Checker that queries `source` instead of building one. `config.source`
    /// is still validated before every start.
    #[must_use]
    pub fn with_source(
        config: CheckerConfig,
        store: Arc<dyn ThrottleStore>,
        source: Arc<dyn VersionSource>,
    ) -> Self {
        Self::with_selection(config, store, SourceSelection::Fixed(source))
    }

    fn with_selection(
        config: CheckerConfig,
        store: Arc<dyn ThrottleStore>,
        source: SourceSelection,
    ) -> Self {
        Self {
            config,
            store,
            source,
            phase: Arc::new(Mutex::new(Phase::Idle)),
            cancel_token: None,
            task: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CheckerConfig {
        &self.config
    }

    /// Current state. A check stays `Running` until its listener has
    /// returned.
    #[must_use]
    pub fn state(&self) -> CheckerState {
        lock_phase(&self.phase).public()
    }

    fn prepare(&self) -> Result<(Arc<dyn VersionSource>, ShowEvery), UpdateError> {
        let show_every = ShowEvery::new(self.config.show_every)?;
        let source = match &self.source {
            SourceSelection::FromConfig(client) => build_source(&self.config.source, client)?,
            SourceSelection::Fixed(source) => {
                self.config.source.validate()?;
                Arc::clone(source)
            }
        };
        Ok((source, show_every))
    }

    /// Start a check; `listener` receives its outcome exactly once, unless the
    /// check is stopped first.
    ///
    /// Only valid from [`CheckerState::Idle`]; other calls are ignored.
    /// Configuration errors are delivered to `listener` before this returns,
    /// without any network request.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn start<F>(&mut self, listener: F)
    where
        F: FnOnce(CheckOutcome) + Send + 'static,
    {
        let mut phase = lock_phase(&self.phase);
        if *phase != Phase::Idle {
            warn!("Ignoring start of update check in state {:?}", phase.public());
            return;
        }

        let (source, show_every) = match self.prepare() {
            Ok(prepared) => prepared,
            Err(error) => {
                *phase = Phase::Completed;
                drop(phase);
                warn!("Update check not started: {error}");
                listener(CheckOutcome::Failed(error));
                return;
            }
        };

        *phase = Phase::Running;
        drop(phase);

        info!(
            "Checking for updates via {} (installed {})",
            source.kind(),
            self.config.installed.version_name
        );

        let cancel_token = CancellationToken::new();
        self.cancel_token = Some(cancel_token.clone());
        self.task = Some(tokio::spawn(run_check(
            CheckTask {
                source,
                installed: self.config.installed.clone(),
                fetch_timeout: self.config.fetch_timeout,
                show_every,
                store: Arc::clone(&self.store),
                phase: Arc::clone(&self.phase),
                cancel_token,
            },
            listener,
        )));
    }

    /// Cancel a running check. No outcome is delivered and the throttle state
    /// is not touched afterwards, even if the fetch already finished in the
    /// background. An increment already underway when this is called still
    /// lands.
    pub fn stop(&mut self) {
        {
            let mut phase = lock_phase(&self.phase);
            if !phase.is_active() {
                return;
            }
            *phase = Phase::Cancelled;
            if let Some(token) = self.cancel_token.take() {
                token.cancel();
            }
        }

        info!("Update check cancelled");
    }

    /// Return a finished checker to `Idle` so it can be started again.
    pub fn reset(&mut self) {
        let mut phase = lock_phase(&self.phase);
        if phase.is_active() {
            warn!("Ignoring reset of a running update check");
            return;
        }
        *phase = Phase::Idle;
        self.cancel_token = None;
        self.task = None;
    }

    /// Wait for the background task, if any, to finish.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.take()
            && let Err(error) = task.await
        {
            warn!("Update check task did not complete: {error}");
        }
    }

    /// Start a check and wait for its outcome. Returns `None` when the check
    /// was not started or was cancelled.
    pub async fn run_to_completion(&mut self) -> Option<CheckOutcome> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.start(move |outcome| {
            let _ = tx.send(outcome);
        });
        self.wait().await;
        rx.await.ok()
    }
}

impl Drop for UpdateChecker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock_phase(phase: &Mutex<Phase>) -> std::sync::MutexGuard<'_, Phase> {
    phase.lock().unwrap_or_else(PoisonError::into_inner)
}

struct CheckTask {
    source: Arc<dyn VersionSource>,
    installed: InstalledVersion,
    fetch_timeout: Duration,
    show_every: ShowEvery,
    store: Arc<dyn ThrottleStore>,
    phase: Arc<Mutex<Phase>>,
    cancel_token: CancellationToken,
}

impl CheckTask {
    /// Move from `from` to `to` unless this check was stopped or the checker
    /// has moved on to another check.
    fn advance(&self, from: Phase, to: Phase) -> bool {
        let mut phase = lock_phase(&self.phase);
        if self.cancel_token.is_cancelled() || *phase != from {
            return false;
        }
        *phase = to;
        true
    }

    fn still_delivering(&self) -> bool {
        self.advance(Phase::Delivering, Phase::Delivering)
    }
}

async fn run_check<F>(task: CheckTask, listener: F)
where
    F: FnOnce(CheckOutcome) + Send + 'static,
{
    let result = tokio::select! {
        biased;
        () = task.cancel_token.cancelled() => {
            debug!("Update check task stopped by cancellation");
            return;
        }
        result = check_latest(task.source.as_ref(), &task.installed, task.fetch_timeout) => result,
    };

    if !task.advance(Phase::Running, Phase::Delivering) {
        debug!("Discarding update check result that arrived after cancellation");
        return;
    }

    let outcome = match result {
        Ok(LatestVersion {
            record,
            update_available: true,
        }) => {
            if !task.still_delivering() {
                debug!("Update check stopped before it was recorded");
                return;
            }
            match record_positive_check(Arc::clone(&task.store), task.show_every).await {
                Ok(show) => {
                    info!(
                        "Update {} available (shown: {show})",
                        record.version_name
                    );
                    CheckOutcome::UpdateAvailable { record, show }
                }
                Err(error) => {
                    warn!("Could not record update check: {error}");
                    CheckOutcome::Failed(error)
                }
            }
        }
        Ok(LatestVersion { record, .. }) => {
            info!("No update available (latest {})", record.version_name);
            CheckOutcome::NoUpdate { latest: record }
        }
        Err(error) => {
            warn!("Update check failed: {error}");
            CheckOutcome::Failed(error)
        }
    };

    if !task.still_delivering() {
        debug!("Discarding update check outcome, the check was stopped");
        return;
    }
    listener(outcome);
    task.advance(Phase::Delivering, Phase::Completed);
}

/// Count a positive check and decide, from the count before it, whether it
/// is shown.
async fn record_positive_check(
    store: Arc<dyn ThrottleStore>,
    show_every: ShowEvery,
) -> Result<bool, UpdateError> {
    let previous = tokio::task::spawn_blocking(move || store.increment())
        .await
        .map_err(|error| UpdateError::storage(format!("throttle update task failed: {error}")))??;
    Ok(is_able_to_show(previous, show_every))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::throttle::MemoryThrottleStore;

    struct StaticSource(Result<&'static str, UpdateError>);

    #[async_trait]
    impl VersionSource for StaticSource {
        fn kind(&self) -> crate::source::SourceKind {
            crate::source::SourceKind::Manifest
        }

        async fn fetch(&self) -> Result<String, UpdateError> {
            self.0.clone().map(str::to_string)
        }

        fn parse(&self, payload: &str) -> Result<VersionRecord, UpdateError> {
            crate::manifest::parse_manifest(
                crate::manifest::ManifestFormat::Json,
                &crate::manifest::ManifestFields::default(),
                payload,
            )
        }
    }

    fn installed(code: u64) -> InstalledVersion {
        InstalledVersion::new("1.0", code)
    }

    #[tokio::test]
    async fn check_latest_reports_availability() {
        let source = StaticSource(Ok(r#"{"versionName":"2.0","versionCode":5,"url":"https://x/y"}"#));

        let newer = check_latest(&source, &installed(4), DEFAULT_FETCH_TIMEOUT)
            .await
            .expect("check succeeds");
        assert!(newer.update_available);
        assert_eq!(newer.record.version_code, Some(5));

        let same = check_latest(&source, &installed(5), DEFAULT_FETCH_TIMEOUT)
            .await
            .expect("check succeeds");
        assert!(!same.update_available);
    }

    #[tokio::test]
    async fn check_latest_propagates_fetch_errors() {
        let source = StaticSource(Err(UpdateError::network("connection refused")));
        let result = check_latest(&source, &installed(1), DEFAULT_FETCH_TIMEOUT).await;
        assert_eq!(result, Err(UpdateError::network("connection refused")));
    }

    #[tokio::test]
    async fn record_positive_check_uses_pre_increment_value() {
        let store: Arc<dyn ThrottleStore> = Arc::new(MemoryThrottleStore::new(0));
        let every = ShowEvery::new(2).expect("valid interval");

        let shown: Vec<bool> = {
            let mut shown = Vec::new();
            for _ in 0..4 {
                shown.push(
                    record_positive_check(Arc::clone(&store), every)
                        .await
                        .expect("memory store never fails"),
                );
            }
            shown
        };

        assert_eq!(shown, vec![true, false, true, false]);
        assert_eq!(store.get().expect("memory store never fails"), 4);
    }

    #[test]
    fn config_defaults_fetch_timeout() {
        let config = CheckerConfig::new(
            SourceConfig::StoreListing {
                package_id: "com.example".to_string(),
            },
            installed(1),
            1,
        );
        assert_eq!(config.fetch_timeout, DEFAULT_FETCH_TIMEOUT);
    }
}
