#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use semver::Version;
use serde_json::json;
use tempfile::TempDir;

use stagehand_core::chain::{ChainClient, Receipt};
use stagehand_core::commands::{EnvCommand, NewEnvOptions, UpgradeCommand};
use stagehand_core::deploy::{Driver, PollPolicy, Session};
use stagehand_core::runner::{RunMode, RunOutput, RunRequest, ScriptRunner};
use stagehand_core::signing::{
    ApprovalStatus, ExecutionStatus, MultisigCancel, MultisigStrategy, Proposal,
    RunnerSigningStrategy,
};
use stagehand_core::store::MemoryStore;

type Respond = dyn Fn(&RunRequest) -> RunOutput + Send + Sync;

/// Script runner answering from a closure and recording every request.
#[derive(Clone)]
pub struct FakeRunner {
    respond: Arc<Respond>,
    error: Option<String>,
    calls: Arc<Mutex<Vec<RunRequest>>>,
}

impl FakeRunner {
    pub fn new(respond: impl Fn(&RunRequest) -> RunOutput + Send + Sync + 'static) -> Self {
        Self {
            respond: Arc::new(respond),
            error: None,
            calls: Arc::default(),
        }
    }

    /// Every run fails to launch with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Self::succeeding()
        }
    }

    /// Every run succeeds with nothing to report.
    pub fn succeeding() -> Self {
        Self::new(|_| success())
    }

    pub fn calls(&self) -> Vec<RunRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn modes(&self) -> Vec<RunMode> {
        self.calls().iter().map(|call| call.mode).collect()
    }
}

impl ScriptRunner for FakeRunner {
    fn run(&self, request: &RunRequest) -> anyhow::Result<RunOutput> {
        self.calls.lock().unwrap().push(request.clone());
        if let Some(message) = &self.error {
            anyhow::bail!("{message}");
        }
        Ok((self.respond)(request))
    }
}

pub fn success() -> RunOutput {
    RunOutput {
        success: true,
        ..RunOutput::default()
    }
}

/// Chain whose receipts are set by the test.
#[derive(Clone, Default)]
pub struct FakeChain {
    receipts: Arc<Mutex<HashMap<String, Receipt>>>,
}

impl FakeChain {
    pub fn mine(&self, hash: &str, success: bool) {
        self.receipts.lock().unwrap().insert(
            hash.to_string(),
            Receipt {
                transaction_hash: hash.to_string(),
                block_number: 100,
                success,
            },
        );
    }
}

impl ChainClient for FakeChain {
    fn transaction_receipt(&self, hash: &str) -> anyhow::Result<Option<Receipt>> {
        Ok(self.receipts.lock().unwrap().get(hash).cloned())
    }
}

#[derive(Default)]
struct MultisigState {
    confirmations: u32,
    threshold: u32,
    executed: Option<String>,
    rejections: Vec<String>,
    approve_after: Option<u32>,
    approval_checks: u32,
    execution_checks: u32,
    cancel_unsupported: bool,
}

/// Multisig that proposes through the runner and reports test-set approvals.
#[derive(Clone, Default)]
pub struct FakeMultisig {
    state: Arc<Mutex<MultisigState>>,
}

impl FakeMultisig {
    pub fn approve(&self, confirmations: u32, threshold: u32) {
        let mut state = self.state.lock().unwrap();
        state.confirmations = confirmations;
        state.threshold = threshold;
    }

    /// Report 1 of 1 approvals from the `checks`-th approval check onward.
    pub fn approve_after(&self, checks: u32) {
        self.state.lock().unwrap().approve_after = Some(checks);
    }

    /// Make `cancel` answer that rejection is not possible.
    pub fn refuse_cancel(&self) {
        self.state.lock().unwrap().cancel_unsupported = true;
    }

    pub fn approval_checks(&self) -> u32 {
        self.state.lock().unwrap().approval_checks
    }

    pub fn execution_checks(&self) -> u32 {
        self.state.lock().unwrap().execution_checks
    }

    pub fn execute(&self, transaction_hash: &str) {
        self.state.lock().unwrap().executed = Some(transaction_hash.to_string());
    }

    pub fn rejections(&self) -> Vec<String> {
        self.state.lock().unwrap().rejections.clone()
    }
}

impl MultisigStrategy for FakeMultisig {
    fn id(&self) -> &str {
        "fake-safe"
    }

    fn propose(&self, runner: &dyn ScriptRunner, mut request: RunRequest) -> anyhow::Result<Proposal> {
        request.mode = RunMode::Propose;
        request.signer = Some("proposer".to_string());
        let output = runner.run(&request)?;
        Ok(Proposal {
            signer: "proposer".to_string(),
            safe_address: output
                .safe_address
                .clone()
                .unwrap_or_else(|| "0xsafe".to_string()),
            safe_tx_hash: output.safe_tx_hash.clone(),
            output,
        })
    }

    fn approvals(&self, _safe_address: &str, _safe_tx_hash: &str) -> anyhow::Result<ApprovalStatus> {
        let mut state = self.state.lock().unwrap();
        state.approval_checks += 1;
        if let Some(after) = state.approve_after {
            if state.approval_checks >= after {
                state.confirmations = 1;
                state.threshold = 1;
            }
        }
        Ok(ApprovalStatus {
            confirmations: state.confirmations,
            threshold: state.threshold,
        })
    }

    fn execution(&self, _safe_address: &str, _safe_tx_hash: &str) -> anyhow::Result<ExecutionStatus> {
        let mut state = self.state.lock().unwrap();
        state.execution_checks += 1;
        Ok(ExecutionStatus {
            executed: state.executed.is_some(),
            transaction_hash: state.executed.clone(),
        })
    }

    fn cancel(&self, _safe_address: &str, safe_tx_hash: &str) -> anyhow::Result<MultisigCancel> {
        let mut state = self.state.lock().unwrap();
        if state.cancel_unsupported {
            return Ok(MultisigCancel::Unsupported(
                "rejections must be proposed from the Safe app".to_string(),
            ));
        }
        state.rejections.push(safe_tx_hash.to_string());
        Ok(MultisigCancel::Rejected {
            safe_tx_hash: format!("{safe_tx_hash}-reject"),
            transaction_hash: None,
        })
    }
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
}

/// Session wired to fakes, with one signer and instant polling.
pub fn session(runner: &FakeRunner, chain: &FakeChain, multisig: &FakeMultisig) -> Session {
    Session::new(Box::new(runner.clone()))
        .with_signer(Box::new(RunnerSigningStrategy::new("deployer", "0xdeployer")))
        .with_multisig(Box::new(multisig.clone()))
        .with_chain(Box::new(chain.clone()))
        .with_poll(PollPolicy {
            attempts: 2,
            delay: Duration::ZERO,
        })
        .with_fixed_clock(fixed_now())
}

/// A memory store plus a directory of upgrade scripts.
pub struct Fixture {
    pub temp: TempDir,
    pub store: Arc<MemoryStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            temp: TempDir::new().expect("tempdir should succeed"),
            store: Arc::new(MemoryStore::new()),
        }
    }

    pub fn upgrades_dir(&self) -> PathBuf {
        self.temp.path().join("upgrades")
    }

    pub fn create_env(&self, name: &str, version: &str) {
        EnvCommand::new(&*self.store)
            .create(
                &NewEnvOptions::new(name, 31337)
                    .with_version(Version::parse(version).expect("version should parse")),
            )
            .expect("create env should succeed");
    }

    /// Write `upgrade.json` and empty scripts for each `(type, filename)`
    /// phase, then register it.
    pub fn register(&self, name: &str, from: &str, to: &str, phases: &[(&str, &str)]) {
        let dir = self.upgrades_dir().join(name);
        std::fs::create_dir_all(&dir).expect("mkdir should succeed");
        for (_, filename) in phases {
            if !filename.is_empty() {
                std::fs::write(dir.join(filename), "// script\n").expect("write should succeed");
            }
        }
        self.register_only(&dir, name, from, to, phases);
    }

    /// Register without creating script files.
    pub fn register_only(
        &self,
        dir: &Path,
        name: &str,
        from: &str,
        to: &str,
        phases: &[(&str, &str)],
    ) {
        std::fs::create_dir_all(dir).expect("mkdir should succeed");
        let phases: Vec<_> = phases
            .iter()
            .map(|(kind, filename)| json!({"type": kind, "filename": filename}))
            .collect();
        let manifest = json!({
            "name": name,
            "from": from,
            "to": to,
            "phases": phases,
            "commit": format!("{name}-commit"),
        });
        std::fs::write(dir.join("upgrade.json"), manifest.to_string())
            .expect("write should succeed");
        UpgradeCommand::new(&*self.store)
            .register(dir)
            .expect("register should succeed");
    }

    pub fn driver<'a>(&'a self, session: &'a Session) -> Driver<'a> {
        Driver::new(&*self.store, session, "tester@example.com", self.upgrades_dir())
    }

    pub fn read(&self, path: &str) -> serde_json::Value {
        let contents = self
            .store
            .file(path)
            .unwrap_or_else(|| panic!("{path} should exist"));
        serde_json::from_str(&contents).expect("document should be JSON")
    }
}
