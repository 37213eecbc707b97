// src/scheduler.rs
//! Runs one [`ChangeDetector`] task per configured source and shuts them down
//! together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::cache::CacheStore;
use crate::change_detector::ChangeDetector;
use crate::config::AppConfig;
use crate::notify::NotifierMux;

pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct SchedulerCfg {
    pub cache_dir: PathBuf,
    /// `false` keeps caches in memory only.
    pub use_cache: bool,
    pub test_mode: bool,
    pub grace: Duration,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            use_cache: true,
            test_mode: false,
            grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

pub struct Scheduler {
    detectors: Vec<ChangeDetector>,
    mux: Arc<NotifierMux>,
    grace: Duration,
}

impl Scheduler {
    pub fn new(mux: Arc<NotifierMux>, detectors: Vec<ChangeDetector>) -> Self {
        Self {
            detectors,
            mux,
            grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Build the mux and every source loop. A bad push method only loses that
    /// destination; a bad source fails the whole startup.
    pub fn from_config(cfg: &AppConfig, opts: &SchedulerCfg) -> Result<Self> {
        let mux = Arc::new(NotifierMux::from_config(&cfg.push_methods, opts.test_mode));
        tracing::info!(
            destinations = %mux.names().collect::<Vec<_>>().join(", "),
            test_mode = opts.test_mode,
            "push methods loaded"
        );

        let mut detectors = Vec::with_capacity(cfg.sources.len());
        for (name, source_cfg) in &cfg.sources {
            let cache = if opts.use_cache {
                CacheStore::in_dir(&opts.cache_dir, name)
            } else {
                CacheStore::disabled()
            };
            let detector = ChangeDetector::from_config(name, source_cfg, cache, mux.clone())?;
            tracing::info!(source = %name, kind = %source_cfg.kind, interval = ?detector.check_interval(), "loaded stream checker");
            detectors.push(detector);
        }

        Ok(Self::new(mux, detectors).with_grace(opts.grace))
    }

    pub fn mux(&self) -> &Arc<NotifierMux> {
        &self.mux
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.detectors.iter().map(ChangeDetector::name)
    }

    /// Run until `shutdown` flips to true, then give the loops `grace` to
    /// finish their current cycle before aborting them. The mux is closed last.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Self {
            detectors,
            mux,
            grace,
        } = self;

        mux.verify_all().await;

        let mut set = JoinSet::new();
        for detector in detectors {
            set.spawn(detector.run(shutdown.clone()));
        }

        loop {
            tokio::select! {
                res = set.join_next() => match res {
                    Some(Ok(())) => {}
                    Some(Err(e)) => tracing::error!(error = %e, "source loop panicked"),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
        }

        if !set.is_empty() {
            tracing::info!(running = set.len(), grace = ?grace, "waiting for source loops to stop");
            let wait = async {
                while let Some(res) = set.join_next().await {
                    if let Err(e) = res {
                        tracing::error!(error = %e, "source loop panicked");
                    }
                }
            };
            if tokio::time::timeout(grace, wait).await.is_err() {
                tracing::warn!(remaining = set.len(), "source loops did not stop in time, aborting");
                set.abort_all();
            }
        }

        mux.close().await;
        tracing::info!("scheduler stopped");
    }
}
