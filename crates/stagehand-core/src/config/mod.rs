//! Configuration: stagehand.toml parsing, layering and storage

pub mod merge;
pub mod parser;
pub mod paths;
pub mod schema;
pub mod store;

pub use merge::merge_configs;
pub use parser::{parse_stagehand_toml, parse_stagehand_toml_str, to_toml};
pub use paths::{CONFIG_FILE, ConfigScope};
pub use schema::{
    ChainSection, LockSection, MultisigSection, PollSection, RunnerSection, SignerEntry,
    StagehandConfig, StoreBackend, StoreSection,
};
pub use store::{ConfigStore, global_config_dir};

/// Who to record as lock holder: the configured name, then git's
/// `user.email`, then `$USER`.
pub fn resolve_holder(config: &StagehandConfig) -> String {
    if let Some(holder) = &config.lock.holder {
        return holder.clone();
    }
    if let Ok(git) = git2::Config::open_default() {
        if let Ok(email) = git.get_string("user.email") {
            if !email.trim().is_empty() {
                return email;
            }
        }
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
