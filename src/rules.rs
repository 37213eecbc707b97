// src/rules.rs
//! Push rule evaluation: notify, suppress, or cancel with a reason.
//!
//! Every source type provides its own rule struct; [`PushRule`] dispatches to
//! them. A [`Cancelled`] outcome is surfaced to the operator as a report while
//! a [`Verdict::Suppress`] is silent.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::checkers::{debug::DebugRule, twitch::TwitchRule, twitter::TwitterRule, youtube::YoutubeRule};
use crate::snapshot::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Notify,
    Suppress,
}

/// Push vetoed for a reason the operator should see.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct Cancelled {
    pub reason: String,
}

impl Cancelled {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub type Evaluation = Result<Verdict, Cancelled>;

/// Rule logic over typed source records.
pub trait RecordRule {
    type Record: DeserializeOwned + Default;

    /// Raw field naming the item a snapshot describes. When it is set and
    /// unchanged the snapshot is suppressed before the record is read.
    fn identity_field(&self) -> Option<&'static str> {
        None
    }

    fn check(&self, previous: &Self::Record, current: &Self::Record) -> Evaluation;
}

/// Read both snapshots as `R::Record` and run the rule.
///
/// An unchanged identity is suppressed first, whatever the rest of the
/// snapshot holds. An unreadable previous snapshot counts as empty; an
/// unreadable current one is cancelled so the anomaly gets reported once.
pub fn evaluate_records<R: RecordRule>(
    rule: &R,
    previous: &Snapshot,
    current: &Snapshot,
) -> Evaluation {
    if let Some(field) = rule.identity_field() {
        if same_identity(previous, current, field) {
            return Ok(Verdict::Suppress);
        }
    }
    let prev = previous.view::<R::Record>().unwrap_or_else(|e| {
        tracing::debug!(error = %e, "previous snapshot unreadable, treating as empty");
        R::Record::default()
    });
    let cur = current
        .view::<R::Record>()
        .map_err(|e| Cancelled::new(format!("Unreadable snapshot: {e:#}")))?;
    rule.check(&prev, &cur)
}

fn same_identity(previous: &Snapshot, current: &Snapshot, field: &str) -> bool {
    match previous.get_json(field) {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) if s.is_empty() => false,
        Some(prev) => current.get_json(field) == Some(prev),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushRule {
    Debug(DebugRule),
    Twitch(TwitchRule),
    Youtube(YoutubeRule),
    Twitter(TwitterRule),
}

impl PushRule {
    pub fn evaluate(&self, previous: &Snapshot, current: &Snapshot) -> Evaluation {
        match self {
            PushRule::Debug(r) => evaluate_records(r, previous, current),
            PushRule::Twitch(r) => evaluate_records(r, previous, current),
            PushRule::Youtube(r) => evaluate_records(r, previous, current),
            PushRule::Twitter(r) => evaluate_records(r, previous, current),
        }
    }
}
