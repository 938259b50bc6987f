//! Stagehand Core Library
//!
//! Drives versioned smart-contract upgrades through their deploy phases,
//! with all state kept in a versioned document store.

pub mod chain;
pub mod commands;
pub mod config;
pub mod context;
pub mod deploy;
pub mod environment;
pub mod lock;
pub mod runner;
pub mod signing;
pub mod store;
pub mod types;
pub mod upgrade;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ConfigScope, ConfigStore, StagehandConfig, StoreBackend};
    pub use crate::context::AppContext;

    // Store
    pub use crate::store::{
        DocumentStore, FsStore, GitStore, MemoryStore, StoreError, Transaction, VersionToken,
    };

    // Deploys
    pub use crate::deploy::{
        Deploy, Driver, DriverError, Phase, PollPolicy, Session, StepError, StepOptions,
    };
    pub use crate::environment::EnvironmentManifest;
    pub use crate::lock::{DeployLock, LockDecision, LockRecord};
    pub use crate::types::{DeployReference, DeployedContract, SegmentKind, StateMutation};
    pub use crate::upgrade::{Upgrade, UpgradeCatalog, VersionRange};

    // Collaborators
    pub use crate::chain::{ChainClient, Receipt};
    pub use crate::runner::{RunMode, RunOutput, RunRequest, ScriptRunner};
    pub use crate::signing::{MultisigStrategy, SigningResult, SigningStrategy};
}
