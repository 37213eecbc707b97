// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod antiflutter;
pub mod cache;
pub mod change_detector;
pub mod checkers;
pub mod config;
pub mod metrics;
pub mod notify;
pub mod rules;
pub mod scheduler;
pub mod snapshot;
pub mod template;

// ---- Re-exports for stable public API ----
pub use crate::cache::CacheStore;
pub use crate::change_detector::{ChangeDetector, CycleOutcome};
pub use crate::checkers::{SnapshotSource, SourceKind};
pub use crate::config::{load_config, AppConfig, ConfigError};
pub use crate::notify::{BackendKind, DispatchSummary, Notifier, NotifierMux, Report};
pub use crate::rules::{Cancelled, PushRule, Verdict};
pub use crate::scheduler::{Scheduler, SchedulerCfg};
pub use crate::snapshot::{Field, Snapshot};
pub use crate::template::{Template, TemplateContext, TemplateError};
