use super::model::Deploy;
use super::phase::PhaseError;
use crate::environment::EnvironmentError;
use crate::store::StoreError;

/// Why a single phase step did not complete.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Operator action is required before the deploy can continue.
    #[error("deploy {} halted: {reason}", .deploy.name)]
    Halt { deploy: Box<Deploy>, reason: String },

    /// Waiting on something outside our control; run again later.
    #[error("deploy {} paused: {reason}", .deploy.name)]
    Pause { deploy: Box<Deploy>, reason: String },

    #[error(transparent)]
    Phase(#[from] PhaseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StepError {
    pub fn halt(deploy: &Deploy, reason: impl Into<String>) -> Self {
        StepError::Halt {
            deploy: Box::new(deploy.clone()),
            reason: reason.into(),
        }
    }

    pub fn pause(deploy: &Deploy, reason: impl Into<String>) -> Self {
        StepError::Pause {
            deploy: Box::new(deploy.clone()),
            reason: reason.into(),
        }
    }

    /// Turn a failed call into a script runner, signer or chain client into
    /// a halt on `deploy`, so it carries the reason and a resume command.
    pub(crate) fn or_halt(self, deploy: &Deploy) -> Self {
        match self {
            StepError::Other(err) => StepError::halt(deploy, format!("{err:#}")),
            other => other,
        }
    }

    /// The command that continues the deploy, for halts and pauses.
    pub fn resume_command(&self) -> Option<String> {
        match self {
            StepError::Halt { deploy, .. } | StepError::Pause { deploy, .. } => {
                Some(deploy.resume_command())
            }
            _ => None,
        }
    }

    /// Whether the step lost a commit race and can be redone from fresh
    /// state.
    pub fn is_conflict(&self) -> bool {
        match self {
            StepError::Store(err) => err.is_conflict(),
            StepError::Environment(EnvironmentError::Store(err)) => err.is_conflict(),
            _ => false,
        }
    }
}

/// Errors surfaced by the deploy driver.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("environment {env} is locked by {holder}{}", describe_lock(.description, .until_timestamp_ms))]
    Locked {
        env: String,
        holder: String,
        description: Option<String>,
        until_timestamp_ms: Option<i64>,
    },

    #[error("no deploy is in progress for environment {0}")]
    NoActiveDeploy(String),

    #[error("deploy {active} is already in progress for {env}; resume or cancel it first")]
    AlreadyInProgress { env: String, active: String },

    #[error("deploy {0} already exists")]
    DeployExists(String),

    #[error("deploy {name} is already {phase}")]
    AlreadyFinished { name: String, phase: String },

    #[error("upgrade {0} is not registered")]
    UnknownUpgrade(String),

    #[error("upgrade {upgrade} applies to {range}, but {env} is at {version}")]
    NotApplicable {
        upgrade: String,
        range: String,
        env: String,
        version: String,
    },

    #[error("no upgrade path from {from} to {to}")]
    NoPath { from: String, to: String },

    #[error("{} upgrade paths tie for shortest; pick one with --upgrade", .paths.len())]
    AmbiguousPath { paths: Vec<Vec<String>> },

    #[error("gave up after {attempts} conflicting commits")]
    ConflictRetriesExhausted { attempts: u32 },

    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn describe_lock(description: &Option<String>, until: &Option<i64>) -> String {
    let mut text = String::new();
    if let Some(description) = description {
        text.push_str(&format!(" ({description})"));
    }
    if let Some(until) = until.and_then(chrono::DateTime::from_timestamp_millis) {
        text.push_str(&format!(" until {}", until.to_rfc3339()));
    }
    text
}

impl From<PhaseError> for DriverError {
    fn from(err: PhaseError) -> Self {
        DriverError::Step(StepError::Phase(err))
    }
}
