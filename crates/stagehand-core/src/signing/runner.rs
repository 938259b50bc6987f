//! EOA signing delegated to the script runner's broadcast mode.

use tracing::info;

use super::{SigningResult, SigningStrategy};
use crate::runner::{RunMode, RunRequest, ScriptRunner};

/// Signs by asking the runner to broadcast as a named account.
#[derive(Debug, Clone)]
pub struct RunnerSigningStrategy {
    id: String,
    account: String,
}

impl RunnerSigningStrategy {
    /// `id` selects the strategy; `account` is what the runner signs as
    /// (a keystore name, ledger path or address, depending on the runner).
    pub fn new(id: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            account: account.into(),
        }
    }
}

impl SigningStrategy for RunnerSigningStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn request_new(
        &self,
        runner: &dyn ScriptRunner,
        mut request: RunRequest,
    ) -> anyhow::Result<SigningResult> {
        request.mode = RunMode::Broadcast;
        request.signer = Some(self.account.clone());
        info!(signer = %self.id, script = %request.script.display(), "requesting signature");
        let output = runner.run(&request)?;
        Ok(SigningResult {
            ready: output.success,
            signer: self.account.clone(),
            output,
        })
    }
}
