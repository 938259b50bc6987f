//! Runs deploys step by step under the environment lock.
//!
//! Every step follows the same cycle: take the lock, open a transaction at
//! the store's head, dispatch to the handler for the current phase (which
//! commits), release the lock. A step that loses a commit race is redone
//! from fresh state a bounded number of times.

use std::path::PathBuf;

use chrono::TimeDelta;
use semver::Version;
use tracing::{info, warn};

use super::error::{DriverError, StepError};
use super::handlers::{self, system};
use super::model::Deploy;
use super::phase::{self, Phase};
use super::session::Session;
use crate::environment;
use crate::lock::{self, DeployLock, LockDecision};
use crate::store::{DocumentStore, Transaction, paths};
use crate::upgrade::{PathChoice, UpgradeCatalog, choose_path, find_upgrade_paths};

/// Default number of attempts for a step that keeps hitting conflicts.
pub const DEFAULT_CONFLICT_ATTEMPTS: u32 = 3;

pub struct Driver<'a> {
    store: &'a dyn DocumentStore,
    session: &'a Session,
    holder: String,
    upgrades_dir: PathBuf,
    lock_ttl: TimeDelta,
    conflict_attempts: u32,
}

impl<'a> Driver<'a> {
    pub fn new(
        store: &'a dyn DocumentStore,
        session: &'a Session,
        holder: impl Into<String>,
        upgrades_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            session,
            holder: holder.into(),
            upgrades_dir: upgrades_dir.into(),
            lock_ttl: lock::DEFAULT_TTL,
            conflict_attempts: DEFAULT_CONFLICT_ATTEMPTS,
        }
    }

    pub fn with_lock_ttl(mut self, ttl: TimeDelta) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_conflict_attempts(mut self, attempts: u32) -> Self {
        self.conflict_attempts = attempts.max(1);
        self
    }

    fn lock(&self, env: &str) -> DeployLock<'a> {
        DeployLock::new(self.store, env).with_ttl(self.lock_ttl)
    }

    /// Run `work` while holding the environment lock, releasing it even
    /// when `work` fails.
    fn with_lock<T>(
        &self,
        env: &str,
        description: &str,
        work: impl FnOnce() -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let lock = self.lock(env);
        match lock.acquire_at(description, &self.holder, self.session.now())? {
            LockDecision::HeldByOther {
                holder,
                description,
                until_timestamp_ms,
            } => {
                return Err(DriverError::Locked {
                    env: env.to_string(),
                    holder,
                    description,
                    until_timestamp_ms,
                });
            }
            LockDecision::TookOver {
                previous_holder,
                previous_description,
                ..
            } => {
                warn!(
                    env,
                    previous_holder = %previous_holder,
                    previous = previous_description.as_deref().unwrap_or("-"),
                    "took over a stale lock; the previous operation may have been interrupted"
                );
            }
            LockDecision::Acquired { .. } | LockDecision::Reacquired { .. } => {}
        }

        let result = work();
        if let Err(err) = lock.release(description, &self.holder) {
            warn!(env, error = %err, "failed to release deploy lock");
            if result.is_ok() {
                return Err(err.into());
            }
        }
        result
    }

    /// Create a deploy of `upgrade` for `env` and point the environment at it.
    pub fn start(&self, env: &str, upgrade: &str) -> Result<Deploy, DriverError> {
        self.with_lock(env, &format!("start {upgrade}"), || {
            let mut txn = Transaction::begin(self.store)?;
            if let Some(active) = environment::active_deploy(&mut txn, env)? {
                return Err(DriverError::AlreadyInProgress {
                    env: env.to_string(),
                    active,
                });
            }
            let manifest = environment::load(&mut txn, env)?;
            let Some(template) = UpgradeCatalog::find(&mut txn, upgrade)? else {
                return Err(DriverError::UnknownUpgrade(upgrade.to_string()));
            };
            if !template.from.matches(&manifest.deployed_version) {
                return Err(DriverError::NotApplicable {
                    upgrade: upgrade.to_string(),
                    range: template.from.to_string(),
                    env: env.to_string(),
                    version: manifest.deployed_version.to_string(),
                });
            }

            let deploy = Deploy::new(
                env,
                manifest.chain_id,
                &template,
                self.upgrades_dir.join(&template.name),
                self.session.now(),
            );
            if txn
                .optional_document(&paths::deploy(env, &deploy.name))?
                .exists()
            {
                return Err(DriverError::DeployExists(deploy.name));
            }
            phase::persist(&deploy, &mut txn)?;
            environment::set_active_deploy(&mut txn, env, Some(&deploy.name))?;
            txn.commit(&format!(
                "[{env}] {}: created from upgrade {upgrade}",
                deploy.name
            ))?;
            info!(env, deploy = %deploy.name, upgrade, segments = deploy.segments.len(), "deploy created");
            Ok(deploy)
        })
    }

    /// Pick the upgrade sequence taking `env` to `to`.
    pub fn plan(&self, env: &str, to: &Version) -> Result<Vec<String>, DriverError> {
        let paths = self.candidate_paths(env, to)?;
        match choose_path(&paths) {
            PathChoice::Unique(path) => Ok(path),
            PathChoice::Ambiguous(paths) => Err(DriverError::AmbiguousPath { paths }),
            PathChoice::Unreachable => Err(DriverError::NoPath {
                from: self.deployed_version(env)?.to_string(),
                to: to.to_string(),
            }),
        }
    }

    /// Every upgrade path from `env`'s deployed version to `to`.
    pub fn candidate_paths(&self, env: &str, to: &Version) -> Result<Vec<Vec<String>>, DriverError> {
        let mut txn = Transaction::begin(self.store)?;
        let manifest = environment::load(&mut txn, env)?;
        let catalog = UpgradeCatalog::load(&mut txn)?;
        Ok(find_upgrade_paths(&manifest.deployed_version, to, &catalog))
    }

    fn deployed_version(&self, env: &str) -> Result<Version, DriverError> {
        let mut txn = Transaction::begin(self.store)?;
        Ok(environment::load(&mut txn, env)?.deployed_version)
    }

    /// Run the active deploy of `env` until it finishes.
    pub fn resume(&self, env: &str) -> Result<Deploy, DriverError> {
        let name = self.active(env)?;
        self.run(env, &name)
    }

    /// Start and run each upgrade of `path` in turn. Stops after a deploy
    /// that does not complete.
    pub fn run_path(&self, env: &str, path: &[String]) -> Result<Vec<Deploy>, DriverError> {
        let mut finished = Vec::new();
        for upgrade in path {
            let deploy = self.start(env, upgrade)?;
            let deploy = self.run(env, &deploy.name)?;
            let completed = deploy.phase == Phase::Complete;
            finished.push(deploy);
            if !completed {
                break;
            }
        }
        Ok(finished)
    }

    /// Step `name` until it reaches a terminal phase and is closed out.
    /// Pauses and halts surface as [`DriverError::Step`].
    pub fn run(&self, env: &str, name: &str) -> Result<Deploy, DriverError> {
        loop {
            let deploy = self.step(env, name)?;
            if deploy.phase.is_terminal() && deploy.is_finished() {
                info!(deploy = %deploy.name, phase = %deploy.phase, "deploy finished");
                return Ok(deploy);
            }
        }
    }

    /// Perform one step of `name` under the lock.
    pub fn step(&self, env: &str, name: &str) -> Result<Deploy, DriverError> {
        self.with_lock(env, name, || {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.try_step(env, name) {
                    Ok(deploy) => return Ok(deploy),
                    Err(err) if err.is_conflict() && attempt < self.conflict_attempts => {
                        warn!(deploy = name, attempt, "store moved during step; retrying");
                    }
                    Err(err) if err.is_conflict() => {
                        return Err(DriverError::ConflictRetriesExhausted { attempts: attempt });
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        })
    }

    fn try_step(&self, env: &str, name: &str) -> Result<Deploy, StepError> {
        let mut txn = Transaction::begin(self.store)?;
        let mut deploy: Deploy = txn.read(&paths::deploy(env, name))?;
        if deploy.phase.is_terminal() && deploy.is_finished() {
            return Ok(deploy);
        }
        let handler = handlers::handler_for(&deploy)?;
        let loaded = deploy.clone();
        handler
            .execute(&mut deploy, &mut txn, self.session)
            .map_err(|err| err.or_halt(&loaded))?;
        Ok(deploy)
    }

    /// Cancel the active deploy of `env`.
    pub fn cancel(&self, env: &str) -> Result<Deploy, DriverError> {
        let name = self.active(env)?;
        self.with_lock(env, &name, || {
            let mut txn = Transaction::begin(self.store)?;
            let mut deploy: Deploy = txn.read(&paths::deploy(env, &name))?;
            if deploy.phase.is_terminal() {
                return Err(DriverError::AlreadyFinished {
                    name: deploy.name,
                    phase: deploy.phase.to_string(),
                });
            }
            let handler = handlers::handler_for(&deploy)?;
            let loaded = deploy.clone();
            handler
                .cancel(&mut deploy, &mut txn, self.session)
                .map_err(|err| err.or_halt(&loaded))?;
            deploy.phase = Phase::Cancelled;
            system::close_out(&mut deploy, &mut txn, self.session)?;
            info!(env, deploy = %deploy.name, "deploy cancelled");
            Ok(deploy)
        })
    }

    /// The active deploy record, if any.
    pub fn status(&self, env: &str) -> Result<Option<Deploy>, DriverError> {
        let mut txn = Transaction::begin(self.store)?;
        environment::load(&mut txn, env)?;
        let Some(name) = environment::active_deploy(&mut txn, env)? else {
            return Ok(None);
        };
        Ok(Some(txn.read(&paths::deploy(env, &name))?))
    }

    fn active(&self, env: &str) -> Result<String, DriverError> {
        let mut txn = Transaction::begin(self.store)?;
        environment::active_deploy(&mut txn, env)?
            .ok_or_else(|| DriverError::NoActiveDeploy(env.to_string()))
    }
}
