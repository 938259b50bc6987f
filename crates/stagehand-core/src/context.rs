//! Application context: resolved configuration and the collaborators built
//! from it.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::chain::rpc::RpcChainClient;
use crate::config::{
    ConfigScope, ConfigStore, StagehandConfig, StoreBackend, global_config_dir, merge_configs,
    resolve_holder,
};
use crate::deploy::session::SignerPrompt;
use crate::deploy::{Driver, Session, StepOptions};
use crate::runner::process::ProcessScriptRunner;
use crate::signing::runner::RunnerSigningStrategy;
use crate::signing::safe::SafeServiceMultisig;
use crate::store::fs::FsStore;
use crate::store::git::GitStore;
use crate::store::memory::MemoryStore;
use crate::store::DocumentStore;

/// Frontends create this once per invocation and hand it to commands.
#[derive(Debug, Clone)]
pub struct AppContext {
    project_root: PathBuf,
    global_config_dir: PathBuf,
    config: StagehandConfig,
}

impl AppContext {
    /// Load global and project configuration for `project_root`.
    pub fn new(project_root: PathBuf) -> anyhow::Result<Self> {
        Self::with_global_config_dir(project_root, global_config_dir()?)
    }

    /// Create context with a custom global config directory (for testing).
    pub fn with_global_config_dir(
        project_root: PathBuf,
        global_config_dir: PathBuf,
    ) -> anyhow::Result<Self> {
        let global = ConfigStore::from_paths(ConfigScope::Global, &global_config_dir, &project_root)
            .load()?;
        let project = ConfigStore::from_paths(ConfigScope::Project, &global_config_dir, &project_root)
            .load()?;
        let config = merge_configs(Some(global), Some(project))?;
        Ok(Self {
            project_root,
            global_config_dir,
            config,
        })
    }

    /// Context around an already-resolved configuration.
    pub fn from_config(project_root: PathBuf, config: StagehandConfig) -> Self {
        Self {
            global_config_dir: project_root.join(".stagehand"),
            project_root,
            config,
        }
    }

    /// Context for the current working directory.
    pub fn from_current_dir() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        Self::new(cwd)
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn global_config_dir(&self) -> &Path {
        &self.global_config_dir
    }

    pub fn config(&self) -> &StagehandConfig {
        &self.config
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    /// Upgrade script directories, resolved against the project root.
    pub fn upgrades_dir(&self) -> PathBuf {
        self.resolve(&self.config.upgrades_dir())
    }

    /// Identity recorded in the deploy lock.
    pub fn holder(&self) -> String {
        resolve_holder(&self.config)
    }

    /// Open the configured state store.
    pub fn open_store(&self) -> anyhow::Result<Box<dyn DocumentStore>> {
        let path = self.resolve(&self.config.store_path());
        debug!(backend = ?self.config.store_backend(), path = %path.display(), "opening state store");
        Ok(match self.config.store_backend() {
            StoreBackend::Git => Box::new(
                GitStore::open_or_init(&path, self.config.store_branch()).with_context(|| {
                    format!("Failed to open state repository: {}", path.display())
                })?,
            ),
            StoreBackend::Fs => Box::new(FsStore::open(&path).with_context(|| {
                format!("Failed to open state directory: {}", path.display())
            })?),
            StoreBackend::Memory => Box::new(MemoryStore::new()),
        })
    }

    /// Build the collaborators one invocation's steps share.
    pub fn session(
        &self,
        mut options: StepOptions,
        signer_prompt: Option<SignerPrompt>,
    ) -> anyhow::Result<Session> {
        let config = &self.config;
        let mut runner = ProcessScriptRunner::new(config.runner.command.clone().unwrap_or_default())
            .with_working_dir(&self.project_root);
        if let Some(test_command) = &config.runner.test_command {
            runner = runner.with_test_command(test_command.clone());
        }

        if options.rpc_url.is_none() {
            options.rpc_url = config.chain.rpc_url.clone();
        }
        let mut session = Session::new(Box::new(runner)).with_poll(config.poll_policy());

        for (id, signer) in &config.signers {
            session = session.with_signer(Box::new(RunnerSigningStrategy::new(
                id.clone(),
                signer.account.clone(),
            )));
        }

        if let Some(service_url) = &config.multisig.service_url {
            let proposer = config
                .multisig
                .proposer
                .clone()
                .ok_or_else(|| anyhow::anyhow!("[multisig] proposer is required with service_url"))?;
            session = session.with_multisig(Box::new(SafeServiceMultisig::new(
                "safe",
                proposer,
                service_url.clone(),
            )?));
        }

        if let Some(rpc_url) = &options.rpc_url {
            session = session.with_chain(Box::new(RpcChainClient::new(rpc_url.clone())?));
        }

        if let Some(prompt) = signer_prompt {
            session = session.with_signer_prompt(prompt);
        }
        Ok(session.with_options(options))
    }

    /// A driver over `store` and `session` with this context's lock settings.
    pub fn driver<'a>(&self, store: &'a dyn DocumentStore, session: &'a Session) -> Driver<'a> {
        Driver::new(store, session, self.holder(), self.upgrades_dir())
            .with_lock_ttl(self.config.lock_ttl())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn project_config_overrides_global() {
        let temp = TempDir::new().expect("tempdir should succeed");
        let global = temp.path().join("global");
        let project = temp.path().join("project");
        std::fs::create_dir_all(&global).expect("mkdir should succeed");
        std::fs::create_dir_all(&project).expect("mkdir should succeed");
        std::fs::write(global.join("stagehand.toml"), "[lock]\nholder = \"alice\"\nttl_secs = 30\n")
            .expect("write should succeed");
        std::fs::write(project.join("stagehand.toml"), "[lock]\nttl_secs = 90\n")
            .expect("write should succeed");

        let ctx = AppContext::with_global_config_dir(project.clone(), global)
            .expect("context should load");
        assert_eq!(ctx.holder(), "alice");
        assert_eq!(ctx.config().lock.ttl_secs, Some(90));
        assert_eq!(ctx.upgrades_dir(), project.join("upgrades"));
    }

    #[test]
    fn opens_fs_store_under_project() {
        let temp = TempDir::new().expect("tempdir should succeed");
        let mut config = StagehandConfig::new();
        config.store.backend = Some(StoreBackend::Fs);
        let ctx = AppContext::from_config(temp.path().to_path_buf(), config);

        let store = ctx.open_store().expect("store should open");
        store.head().expect("head should succeed");
        assert!(temp.path().join(".stagehand/state").exists());
    }

    #[test]
    fn session_registers_configured_signers() {
        let temp = TempDir::new().expect("tempdir should succeed");
        let config = crate::config::parse_stagehand_toml_str(
            "[runner]\ncommand = [\"true\"]\n\n[signers.a]\naccount = \"one\"\n\n[signers.b]\naccount = \"two\"\n",
        )
        .expect("config should parse");
        let ctx = AppContext::from_config(temp.path().to_path_buf(), config);

        let session = ctx
            .session(StepOptions::default(), None)
            .expect("session should build");
        let ids: Vec<&str> = session.signers.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(session.multisig.is_none());
        assert!(session.chain.is_none());
    }
}
