//! Per-environment advisory deploy lock.
//!
//! The lock is a document at `environment/{env}/lock.json`. A holder keeps
//! it until it releases or its expiry passes; an expired lock may be taken
//! over by anyone. Every change to the lock is its own store commit, so two
//! processes racing for it are serialized by the store's version check.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::store::{DocumentStore, StoreError, Transaction, paths};

/// Default lifetime of a freshly acquired lock.
pub const DEFAULT_TTL: TimeDelta = TimeDelta::minutes(5);

/// `environment/{env}/lock.json`. No holder means unlocked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until_timestamp_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LockRecord {
    pub fn is_held(&self) -> bool {
        self.holder.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// Held, but its expiry is in the past. A lock with no expiry never
    /// goes stale.
    pub fn is_stale(&self, now_ms: i64) -> bool {
        self.is_held() && self.until_timestamp_ms.is_some_and(|until| until < now_ms)
    }
}

/// Result of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDecision {
    /// The lock was free and is now ours.
    Acquired { until_timestamp_ms: i64 },
    /// We already held it; nothing was written and the expiry is unchanged.
    Reacquired { until_timestamp_ms: Option<i64> },
    /// Someone else's lock had expired and is now ours.
    TookOver {
        previous_holder: String,
        previous_description: Option<String>,
        expired_at: i64,
        until_timestamp_ms: i64,
    },
    /// A live lock belongs to someone else.
    HeldByOther {
        holder: String,
        description: Option<String>,
        until_timestamp_ms: Option<i64>,
    },
}

impl LockDecision {
    pub fn is_held(&self) -> bool {
        !matches!(self, LockDecision::HeldByOther { .. })
    }
}

/// Result of a release attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotHeld,
    HeldByOther { holder: String },
}

/// Decide what acquiring `current` as `holder` at `now_ms` would do.
pub fn decide(current: &LockRecord, holder: &str, now_ms: i64, ttl: TimeDelta) -> LockDecision {
    let until = now_ms + ttl.num_milliseconds();
    let Some(existing) = current.holder.as_deref().filter(|h| !h.is_empty()) else {
        return LockDecision::Acquired {
            until_timestamp_ms: until,
        };
    };
    if current.is_stale(now_ms) {
        return LockDecision::TookOver {
            previous_holder: existing.to_string(),
            previous_description: current.description.clone(),
            expired_at: current.until_timestamp_ms.unwrap_or_default(),
            until_timestamp_ms: until,
        };
    }
    if existing == holder {
        return LockDecision::Reacquired {
            until_timestamp_ms: current.until_timestamp_ms,
        };
    }
    LockDecision::HeldByOther {
        holder: existing.to_string(),
        description: current.description.clone(),
        until_timestamp_ms: current.until_timestamp_ms,
    }
}

/// Lock handle for one environment.
pub struct DeployLock<'s> {
    store: &'s dyn DocumentStore,
    env: String,
    ttl: TimeDelta,
}

impl<'s> DeployLock<'s> {
    pub fn new(store: &'s dyn DocumentStore, env: impl Into<String>) -> Self {
        Self {
            store,
            env: env.into(),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Current lock document.
    pub fn status(&self) -> Result<LockRecord, StoreError> {
        let mut txn = Transaction::begin(self.store)?;
        txn.read_or_default(&paths::deploy_lock(&self.env))
    }

    pub fn acquire(&self, deploy: &str, holder: &str) -> Result<LockDecision, StoreError> {
        self.acquire_at(deploy, holder, Utc::now())
    }

    /// Acquire as `holder` for `deploy`, using `now` as the clock.
    pub fn acquire_at(
        &self,
        deploy: &str,
        holder: &str,
        now: DateTime<Utc>,
    ) -> Result<LockDecision, StoreError> {
        let path = paths::deploy_lock(&self.env);
        let mut txn = Transaction::begin(self.store)?;
        let current: LockRecord = txn.read_or_default(&path)?;
        let decision = decide(&current, holder, now.timestamp_millis(), self.ttl);

        let until = match &decision {
            LockDecision::Acquired { until_timestamp_ms } => *until_timestamp_ms,
            LockDecision::TookOver {
                previous_holder,
                expired_at,
                until_timestamp_ms,
                ..
            } => {
                warn!(
                    env = %self.env,
                    previous_holder = %previous_holder,
                    expired_at = *expired_at,
                    "taking over stale deploy lock"
                );
                *until_timestamp_ms
            }
            LockDecision::Reacquired { .. } => {
                debug!(env = %self.env, holder, "deploy lock already held");
                return Ok(decision);
            }
            LockDecision::HeldByOther { holder: other, .. } => {
                debug!(env = %self.env, holder = %other, "deploy lock held by another operator");
                return Ok(decision);
            }
        };

        txn.write(
            &path,
            &LockRecord {
                holder: Some(holder.to_string()),
                until_timestamp_ms: Some(until),
                description: Some(deploy.to_string()),
            },
        )?;
        txn.commit(&format!("[{}] acquire deploy lock ({deploy})", self.env))?;
        info!(env = %self.env, holder, until, "acquired deploy lock");
        Ok(decision)
    }

    /// Release the lock if `holder` owns it.
    pub fn release(&self, deploy: &str, holder: &str) -> Result<ReleaseOutcome, StoreError> {
        let path = paths::deploy_lock(&self.env);
        let mut txn = Transaction::begin(self.store)?;
        let current: LockRecord = txn.read_or_default(&path)?;

        let Some(existing) = current.holder.as_deref().filter(|h| !h.is_empty()) else {
            debug!(env = %self.env, "deploy lock not held; nothing to release");
            return Ok(ReleaseOutcome::NotHeld);
        };
        if existing != holder {
            warn!(
                env = %self.env,
                holder = %existing,
                "not releasing deploy lock held by another operator"
            );
            return Ok(ReleaseOutcome::HeldByOther {
                holder: existing.to_string(),
            });
        }

        txn.write(&path, &LockRecord::default())?;
        txn.commit(&format!("[{}] release deploy lock ({deploy})", self.env))?;
        info!(env = %self.env, holder, "released deploy lock");
        Ok(ReleaseOutcome::Released)
    }
}
