//! Per-invocation collaborators and options shared by every step.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use super::model::{Deploy, Segment};
use crate::chain::ChainClient;
use crate::runner::{RunMode, RunRequest, ScriptRunner};
use crate::signing::{MultisigStrategy, SigningStrategy};

/// Bounded receipt polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            delay: Duration::from_secs(3),
        }
    }
}

/// Flags from the command line.
#[derive(Debug, Clone, Default)]
pub struct StepOptions {
    /// Never prompt; fail where a choice is needed.
    pub non_interactive: bool,
    /// Preferred signing strategy id.
    pub signer: Option<String>,
    pub rpc_url: Option<Url>,
    /// Passed to scripts as `STAGEHAND_FORK`.
    pub fork: Option<String>,
    /// Close out a cancel even when an open multisig proposal cannot be
    /// rejected automatically.
    pub force_cancel: bool,
}

/// Picks a signer from the offered ids; `None` aborts.
pub type SignerPrompt = Box<dyn Fn(&[&str]) -> Option<usize>>;

/// Values resolved at most once per invocation.
#[derive(Debug, Default)]
pub struct SessionCache {
    signer: OnceLock<usize>,
}

/// Everything a phase handler may call out to.
pub struct Session {
    pub runner: Box<dyn ScriptRunner>,
    pub signers: Vec<Box<dyn SigningStrategy>>,
    pub multisig: Option<Box<dyn MultisigStrategy>>,
    pub chain: Option<Box<dyn ChainClient>>,
    pub options: StepOptions,
    pub poll: PollPolicy,
    signer_prompt: Option<SignerPrompt>,
    clock: Option<DateTime<Utc>>,
    cache: SessionCache,
}

impl Session {
    pub fn new(runner: Box<dyn ScriptRunner>) -> Self {
        Self {
            runner,
            signers: Vec::new(),
            multisig: None,
            chain: None,
            options: StepOptions::default(),
            poll: PollPolicy::default(),
            signer_prompt: None,
            clock: None,
            cache: SessionCache::default(),
        }
    }

    pub fn with_signer(mut self, signer: Box<dyn SigningStrategy>) -> Self {
        self.signers.push(signer);
        self
    }

    pub fn with_multisig(mut self, multisig: Box<dyn MultisigStrategy>) -> Self {
        self.multisig = Some(multisig);
        self
    }

    pub fn with_chain(mut self, chain: Box<dyn ChainClient>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_signer_prompt(mut self, prompt: SignerPrompt) -> Self {
        self.signer_prompt = Some(prompt);
        self
    }

    /// Freeze the clock, for reproducible records.
    pub fn with_fixed_clock(mut self, now: DateTime<Utc>) -> Self {
        self.clock = Some(now);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    /// The EOA signer for this invocation.
    ///
    /// An explicit `--signer` wins; a single configured signer is used as
    /// is; otherwise the operator is prompted once and the answer reused.
    pub fn signer(&self) -> anyhow::Result<&dyn SigningStrategy> {
        if let Some(index) = self.cache.signer.get() {
            return Ok(self.signers[*index].as_ref());
        }
        let index = self.choose_signer()?;
        let _ = self.cache.signer.set(index);
        Ok(self.signers[index].as_ref())
    }

    fn choose_signer(&self) -> anyhow::Result<usize> {
        if self.signers.is_empty() {
            anyhow::bail!("No EOA signer is configured");
        }
        if let Some(wanted) = &self.options.signer {
            return self
                .signers
                .iter()
                .position(|s| s.id() == wanted)
                .ok_or_else(|| anyhow::anyhow!("Unknown signer '{}'", wanted));
        }
        if self.signers.len() == 1 {
            return Ok(0);
        }
        let ids: Vec<&str> = self.signers.iter().map(|s| s.id()).collect();
        match (&self.signer_prompt, self.options.non_interactive) {
            (Some(prompt), false) => {
                prompt(&ids)
                    .filter(|index| *index < ids.len())
                    .ok_or_else(|| anyhow::anyhow!("No signer selected"))
            }
            _ => anyhow::bail!(
                "Several signers are configured ({}); pass --signer",
                ids.join(", ")
            ),
        }
    }

    /// Build a runner request for `segment` of `deploy`.
    pub fn request(
        &self,
        deploy: &Deploy,
        segment: &Segment,
        mode: RunMode,
        env: &BTreeMap<String, String>,
    ) -> RunRequest {
        let mut request = RunRequest::new(deploy.script_path(segment), mode);
        request.arguments = segment.arguments.clone();
        request.rpc_url = self.options.rpc_url.clone();
        request.env = env.clone();
        if let Some(fork) = &self.options.fork {
            request.env.insert("STAGEHAND_FORK".to_string(), fork.clone());
        }
        request
    }

    /// Sleep between receipt polls.
    pub(crate) fn poll_delay(&self) {
        if !self.poll.delay.is_zero() {
            std::thread::sleep(self.poll.delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunOutput;
    use crate::signing::SigningResult;
    use std::cell::Cell;
    use std::rc::Rc;

    struct NoRunner;

    impl ScriptRunner for NoRunner {
        fn run(&self, _request: &RunRequest) -> anyhow::Result<RunOutput> {
            Ok(RunOutput::default())
        }
    }

    struct Named(&'static str);

    impl SigningStrategy for Named {
        fn id(&self) -> &str {
            self.0
        }

        fn request_new(
            &self,
            _runner: &dyn ScriptRunner,
            _request: RunRequest,
        ) -> anyhow::Result<SigningResult> {
            anyhow::bail!("not used")
        }
    }

    #[test]
    fn explicit_signer_wins() {
        let mut session = Session::new(Box::new(NoRunner))
            .with_signer(Box::new(Named("ledger")))
            .with_signer(Box::new(Named("keystore")));
        session.options.signer = Some("keystore".into());
        assert_eq!(session.signer().unwrap().id(), "keystore");
    }

    #[test]
    fn ambiguous_signer_needs_flag_when_non_interactive() {
        let mut session = Session::new(Box::new(NoRunner))
            .with_signer(Box::new(Named("ledger")))
            .with_signer(Box::new(Named("keystore")));
        session.options.non_interactive = true;
        assert!(session.signer().is_err());
    }

    #[test]
    fn prompt_is_asked_once() {
        let asked = Rc::new(Cell::new(0));
        let counter = asked.clone();
        let session = Session::new(Box::new(NoRunner))
            .with_signer(Box::new(Named("ledger")))
            .with_signer(Box::new(Named("keystore")))
            .with_signer_prompt(Box::new(move |_| {
                counter.set(counter.get() + 1);
                Some(1)
            }));
        assert_eq!(session.signer().unwrap().id(), "keystore");
        assert_eq!(session.signer().unwrap().id(), "keystore");
        assert_eq!(asked.get(), 1);
    }
}
