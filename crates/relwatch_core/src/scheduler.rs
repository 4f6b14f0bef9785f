use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use secrecy::SecretString;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::channel;
use crate::error::TrackError;
use crate::model::{NotificationEvent, SaveVerdict, TrackerConfig, TrackerStatus};
use crate::notify;
use crate::store::Store;
use crate::trackers::Tracker;

/// Window for scheduled and interactive checks. Wide enough to cover
/// several channels of a high-frequency upstream.
const PERIODIC_FETCH_LIMIT: usize = 30;
/// The startup sweep touches every tracker at once, so it asks for less.
const SWEEP_FETCH_LIMIT: usize = 10;

const SESSION_CLEANUP_PERIOD: Duration = Duration::from_secs(3600);

/// Owns one periodic job per tracker and runs the per-check pipeline:
/// resolve credential, fetch, channel-filter, save, notify, record
/// status.
///
/// Each job is a task that runs its checks inline, so at most one check
/// per tracker is ever in flight; a check that overruns its period delays
/// the next tick instead of stacking. Jobs are independent tasks, so a
/// slow tracker never blocks a fast one. Cheap to clone and share.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                jobs: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn store(&self) -> &Store {
        &self.inner.store
    }

    /// Loads every persisted tracker and creates its periodic job. Jobs
    /// first fire one full period from now; the immediate pass belongs to
    /// [`Scheduler::start`].
    pub async fn initialize(&self) -> Result<(), TrackError> {
        let configs = self.store().get_all_tracker_configs().await?;
        let count = configs.len();
        for config in &configs {
            self.spawn_job(config).await;
        }
        info!("scheduler initialized with {count} tracker job(s)");
        Ok(())
    }

    /// Runs the initial sweep across all trackers in parallel and starts
    /// the session-cleanup tick. Per-tracker failures are swallowed into
    /// status rows.
    pub async fn start(&self) {
        info!("scheduler started");
        self.check_all(SWEEP_FETCH_LIMIT).await;
        self.spawn_session_cleanup();
    }

    /// Stops scheduling new checks. In-flight checks finish on their own.
    pub fn shutdown(&self) {
        info!("scheduler shutting down");
        self.inner.shutdown.cancel();
    }

    /// Recreates the job for a tracker so config edits (period, kind,
    /// channels) take effect. Idempotent; unknown names are a no-op.
    pub async fn refresh_tracker(&self, name: &str) -> Result<(), TrackError> {
        match self.store().get_tracker_config(name).await? {
            Some(config) => self.spawn_job(&config).await,
            None => warn!("refresh requested for unknown tracker {name}"),
        }
        Ok(())
    }

    /// Stops and forgets the tracker's job.
    pub async fn remove_tracker(&self, name: &str) {
        if let Some(handle) = self.inner.jobs.lock().await.remove(name) {
            handle.abort();
        }
    }

    /// Interactive out-of-band check. Adapter and store failures are
    /// persisted as an error-bearing status row and returned rather than
    /// raised; a missing credential is the exception, so interactive
    /// callers can see a 400.
    pub async fn check_now(&self, name: &str) -> Result<TrackerStatus, TrackError> {
        let Some(config) = self.store().get_tracker_config(name).await? else {
            return Err(TrackError::Config(format!("tracker {name} not found")));
        };
        match self.run_check(&config, PERIODIC_FETCH_LIMIT).await {
            Ok(status) => {
                self.store().update_tracker_status(&status).await?;
                Ok(status)
            }
            Err(e) => {
                let status = error_status(&config, e.to_string());
                self.store().update_tracker_status(&status).await?;
                match e {
                    TrackError::AuthRequired(_) => Err(e),
                    _ => Ok(status),
                }
            }
        }
    }

    async fn check_all(&self, limit: usize) {
        let names: Vec<String> = self.inner.jobs.lock().await.keys().cloned().collect();
        join_all(names.iter().map(|name| self.check_periodic(name, limit))).await;
    }

    /// Periodic entry point: nothing may escape the dispatcher.
    async fn check_periodic(&self, name: &str, limit: usize) {
        let config = match self.store().get_tracker_config(name).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                warn!("job fired for unknown tracker {name}");
                return;
            }
            Err(e) => {
                error!("cannot load config for tracker {name}: {e}");
                return;
            }
        };
        let status = match self.run_check(&config, limit).await {
            Ok(status) => status,
            Err(e) => {
                warn!("check failed for {name}: {e}");
                error_status(&config, e.to_string())
            }
        };
        if let Err(e) = self.store().update_tracker_status(&status).await {
            error!("cannot record status for {name}: {e}");
        }
    }

    /// The pipeline for a single tracker invocation.
    #[instrument(skip(self, config), fields(tracker = %config.name))]
    async fn run_check(
        &self,
        config: &TrackerConfig,
        limit: usize,
    ) -> Result<TrackerStatus, TrackError> {
        let now = Utc::now();

        if !config.enabled {
            return Ok(TrackerStatus {
                name: config.name.clone(),
                kind: config.kind.label().to_string(),
                enabled: false,
                last_check: Some(now),
                last_version: None,
                error: Some("disabled".to_string()),
                channel_count: config.channels.len(),
            });
        }

        let token = self.resolve_credential(config).await?;
        let tracker = Tracker::from_config(config, token)?;

        let mut drafts = tracker.fetch_all(limit).await?;
        if drafts.is_empty()
            && let Some(single) = tracker.fetch_latest().await?
        {
            drafts.push(single);
        }

        let previous_version = self
            .store()
            .get_tracker_status(&config.name)
            .await?
            .and_then(|s| s.last_version);

        if drafts.is_empty() {
            return Ok(TrackerStatus {
                name: config.name.clone(),
                kind: config.kind.label().to_string(),
                enabled: true,
                last_check: Some(now),
                last_version: previous_version,
                error: Some("no versions found".to_string()),
                channel_count: config.channels.len(),
            });
        }

        for release in channel::select_for_save(&config.channels, &drafts) {
            match self.store().save_release(&release).await? {
                SaveVerdict::New => {
                    info!(
                        "new release: {} -> {}",
                        release.tracker_name, release.version
                    );
                    notify::dispatch(self.store(), NotificationEvent::NewRelease, &release).await;
                }
                SaveVerdict::Republish { old_commit } => {
                    info!(
                        "republish detected: {} -> {} (commit: {} -> {})",
                        release.tracker_name,
                        release.version,
                        short_sha(old_commit.as_deref()),
                        short_sha(release.commit_sha.as_deref()),
                    );
                    notify::dispatch(self.store(), NotificationEvent::Republish, &release).await;
                }
                SaveVerdict::Metadata => {}
            }
        }

        // Headline version comes from the whole window, saved or not.
        let last_version = drafts
            .iter()
            .max_by_key(|d| d.published_at)
            .map(|d| d.version.clone())
            .or(previous_version);

        Ok(TrackerStatus {
            name: config.name.clone(),
            kind: config.kind.label().to_string(),
            enabled: true,
            last_check: Some(now),
            last_version,
            error: None,
            channel_count: config.channels.len(),
        })
    }

    /// Credential resolver: a tracker that names no credential polls
    /// anonymously; a dangling reference degrades to anonymous with a
    /// warning and leaves the refusal to the adapter.
    async fn resolve_credential(
        &self,
        config: &TrackerConfig,
    ) -> Result<Option<SecretString>, TrackError> {
        let Some(credential_name) = &config.credential_name else {
            return Ok(None);
        };
        match self.store().get_credential_by_name(credential_name).await? {
            Some(credential) => Ok(Some(SecretString::from(credential.token))),
            None => {
                warn!(
                    "credential {credential_name:?} referenced by tracker {} not found, \
                     using anonymous access",
                    config.name
                );
                Ok(None)
            }
        }
    }

    async fn spawn_job(&self, config: &TrackerConfig) {
        let name = config.name.clone();
        let period = Duration::from_secs(u64::from(config.interval_minutes) * 60);
        let scheduler = self.clone();
        let token = self.inner.shutdown.clone();
        let job_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.check_periodic(&job_name, PERIODIC_FETCH_LIMIT).await;
                    }
                }
            }
        });

        if let Some(old) = self.inner.jobs.lock().await.insert(name, handle) {
            old.abort();
        }
    }

    fn spawn_session_cleanup(&self) {
        let store = self.store().clone();
        let token = self.inner.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(
                Instant::now() + SESSION_CLEANUP_PERIOD,
                SESSION_CLEANUP_PERIOD,
            );
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.delete_expired_sessions().await {
                            Ok(0) => {}
                            Ok(n) => info!("removed {n} expired session(s)"),
                            Err(e) => error!("session cleanup failed: {e}"),
                        }
                    }
                }
            }
        });
    }
}

fn error_status(config: &TrackerConfig, message: String) -> TrackerStatus {
    TrackerStatus {
        name: config.name.clone(),
        kind: config.kind.label().to_string(),
        enabled: config.enabled,
        last_check: Some(Utc::now()),
        last_version: None,
        error: Some(message),
        channel_count: config.channels.len(),
    }
}

fn short_sha(sha: Option<&str>) -> &str {
    match sha {
        Some(s) if s.len() >= 7 => &s[..7],
        Some(s) => s,
        None => "unknown",
    }
}
