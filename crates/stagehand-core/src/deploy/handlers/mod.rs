//! Segment phase handlers.
//!
//! A step validates its preconditions, does at most one piece of external
//! work, records evidence next to the deploy, advances the phase and commits
//! everything in one transaction.

pub mod eoa;
pub mod multisig;
pub mod script;
pub mod system;

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::error::StepError;
use super::model::{Deploy, Segment};
use super::phase::{self, Phase, PhaseError};
use super::session::Session;
use crate::chain::Receipt;
use crate::environment;
use crate::runner::{RunMode, RunOutput};
use crate::store::{Transaction, paths};
use crate::types::{DeployReference, DeployedContract, SegmentKind, StateMutation};

pub trait PhaseHandler {
    /// Perform the step for the deploy's current phase.
    fn execute(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError>;

    /// Undo or withdraw whatever this segment kind has outstanding. The
    /// caller marks the deploy cancelled afterwards.
    fn cancel(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError>;
}

/// Handler owning `phase`.
pub fn handler_for(deploy: &Deploy) -> Result<&'static dyn PhaseHandler, PhaseError> {
    match deploy.phase.segment_kind() {
        Some(SegmentKind::Eoa) => Ok(&eoa::EoaHandler),
        Some(SegmentKind::Multisig) => Ok(&multisig::MultisigHandler),
        Some(SegmentKind::Script) => Ok(&script::ScriptHandler),
        Some(SegmentKind::System) => Ok(&system::SystemHandler),
        None => Err(PhaseError::UnknownPhase {
            deploy: deploy.name.clone(),
            phase: deploy.phase.as_str().to_string(),
        }),
    }
}

/// Persist the deploy and commit the step.
pub(crate) fn commit_step(
    deploy: &Deploy,
    txn: &mut Transaction<'_>,
    summary: &str,
) -> Result<(), StepError> {
    phase::persist(deploy, txn)?;
    txn.commit(&format!("[{}] {}: {}", deploy.env, deploy.name, summary))?;
    Ok(())
}

/// The current segment and its index; a phase without one is corrupt.
pub(crate) fn current_segment(deploy: &Deploy) -> Result<(usize, Segment), StepError> {
    match (deploy.segment_index(), deploy.current_segment()) {
        (Some(index), Some(segment)) => Ok((index, segment.clone())),
        _ => Err(StepError::halt(
            deploy,
            format!(
                "phase {} has no current segment (segmentId {})",
                deploy.phase, deploy.segment_id
            ),
        )),
    }
}

/// Skip a segment whose script file does not exist. Returns true if skipped.
pub(crate) fn skip_if_missing(
    deploy: &mut Deploy,
    segment: &Segment,
    txn: &mut Transaction<'_>,
) -> Result<bool, StepError> {
    let script = deploy.script_path(segment);
    if script.exists() {
        return Ok(false);
    }
    warn!(deploy = %deploy.name, script = %script.display(), "script missing; skipping segment");
    phase::advance_segment(deploy);
    commit_step(
        deploy,
        txn,
        &format!("skip segment {} ({} not found)", segment.id, segment.filename),
    )?;
    Ok(true)
}

pub(crate) fn write_evidence<T: Serialize>(
    deploy: &Deploy,
    index: usize,
    file: &str,
    value: &T,
    txn: &mut Transaction<'_>,
) -> Result<(), StepError> {
    txn.write(&paths::segment_file(&deploy.env, &deploy.name, index, file), value)?;
    Ok(())
}

/// Run the segment's tests, halting on failure after recording the report.
pub(crate) fn run_tests(
    deploy: &Deploy,
    index: usize,
    segment: &Segment,
    txn: &mut Transaction<'_>,
    session: &Session,
) -> Result<(), StepError> {
    let env = script_env(deploy, txn)?;
    let request = session.request(deploy, segment, RunMode::Test, &env);
    let report = session.runner.run(&request)?;
    write_evidence(deploy, index, paths::evidence::TEST_RUN, &report, txn)?;
    if report.success {
        return Ok(());
    }
    commit_step(deploy, txn, &format!("tests failed for segment {index}"))?;
    Err(StepError::halt(
        deploy,
        format!(
            "tests for {} failed{}",
            segment.filename,
            report
                .error
                .as_deref()
                .map(|e| format!(": {e}"))
                .unwrap_or_default()
        ),
    ))
}

/// Environment variables handed to scripts.
pub(crate) fn script_env(
    deploy: &Deploy,
    txn: &mut Transaction<'_>,
) -> Result<BTreeMap<String, String>, StepError> {
    let manifest = environment::load(txn, &deploy.env)?;
    let mut vars = BTreeMap::new();
    vars.insert("STAGEHAND_ENV".to_string(), deploy.env.clone());
    vars.insert("STAGEHAND_DEPLOY".to_string(), deploy.name.clone());
    vars.insert(
        "STAGEHAND_ENV_VERSION".to_string(),
        manifest.deployed_version.to_string(),
    );
    vars.insert("STAGEHAND_CHAIN_ID".to_string(), deploy.chain_id.to_string());

    let parameters: Map<String, Value> = txn.read_or_default(&paths::parameters(&deploy.env))?;
    for (name, value) in parameters {
        let text = match value {
            Value::String(text) => text,
            other => other.to_string(),
        };
        vars.insert(format!("STAGEHAND_ENV_{}", env_key(&name)), text);
    }

    let mut addresses: BTreeMap<String, String> = manifest
        .contracts
        .singletons
        .iter()
        .map(|(name, record)| (name.clone(), record.address.clone()))
        .collect();
    let fresh: Vec<DeployedContract> =
        txn.read_or_default(&paths::deployed_contracts(&deploy.env, &deploy.name))?;
    for record in fresh.into_iter().filter(|c| c.singleton) {
        addresses.insert(record.contract, record.address);
    }
    for (name, address) in addresses {
        vars.insert(format!("STAGEHAND_DEPLOYED_{}", env_key(&name)), address);
    }
    Ok(vars)
}

fn env_key(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Append a run's deployments and mutations to the deploy's records.
/// Returns the deployments stamped with their origin.
pub(crate) fn record_outputs(
    deploy: &Deploy,
    index: usize,
    signer: &str,
    output: &RunOutput,
    txn: &mut Transaction<'_>,
) -> Result<Vec<DeployedContract>, StepError> {
    let stamped: Vec<DeployedContract> = output
        .deployments
        .iter()
        .cloned()
        .map(|mut record| {
            record.deployed_in = Some(DeployReference {
                deploy: deploy.name.clone(),
                segment: index,
                signer: signer.to_string(),
            });
            record
        })
        .collect();

    if !stamped.is_empty() {
        let path = paths::deployed_contracts(&deploy.env, &deploy.name);
        let mut all: Vec<DeployedContract> = txn.read_or_default(&path)?;
        all.extend(stamped.iter().cloned());
        txn.write(&path, &all)?;
    }
    if !output.mutations.is_empty() {
        let path = paths::mutations(&deploy.env, &deploy.name);
        let mut all: Vec<StateMutation> = txn.read_or_default(&path)?;
        all.extend(output.mutations.iter().cloned());
        txn.write(&path, &all)?;
    }
    Ok(stamped)
}

/// Outcome of polling for receipts.
pub(crate) enum ReceiptPoll {
    Mined(Vec<Receipt>),
    Reverted(String),
    Pending(usize),
}

/// Poll until every hash has a receipt, one reverts, or attempts run out.
pub(crate) fn poll_receipts(
    deploy: &Deploy,
    hashes: &[String],
    session: &Session,
) -> Result<ReceiptPoll, StepError> {
    if hashes.is_empty() {
        return Ok(ReceiptPoll::Mined(Vec::new()));
    }
    let Some(chain) = session.chain.as_deref() else {
        return Err(StepError::halt(
            deploy,
            "no chain RPC is configured; pass --rpc-url or set [chain] rpc_url",
        ));
    };

    let attempts = session.poll.attempts.max(1);
    let mut pending = hashes.len();
    for attempt in 1..=attempts {
        let mut receipts = Vec::new();
        for hash in hashes {
            if let Some(receipt) = chain.transaction_receipt(hash)? {
                if !receipt.success {
                    return Ok(ReceiptPoll::Reverted(hash.clone()));
                }
                receipts.push(receipt);
            }
        }
        pending = hashes.len() - receipts.len();
        if pending == 0 {
            info!(deploy = %deploy.name, count = receipts.len(), "transactions mined");
            return Ok(ReceiptPoll::Mined(receipts));
        }
        if attempt < attempts {
            session.poll_delay();
        }
    }
    Ok(ReceiptPoll::Pending(pending))
}

/// Fetch a status up to `session.poll.attempts` times until `done` holds.
/// Returns the last status and whether it was reached.
pub(crate) fn poll_status<T>(
    session: &Session,
    mut fetch: impl FnMut() -> anyhow::Result<T>,
    done: impl Fn(&T) -> bool,
) -> Result<(T, bool), StepError> {
    let attempts = session.poll.attempts.max(1);
    let mut attempt = 1;
    loop {
        let status = fetch()?;
        if done(&status) {
            return Ok((status, true));
        }
        if attempt >= attempts {
            return Ok((status, false));
        }
        attempt += 1;
        session.poll_delay();
    }
}

/// Mark the deploy failed because `hash` reverted and commit.
pub(crate) fn fail_on_revert(
    deploy: &mut Deploy,
    txn: &mut Transaction<'_>,
    hash: &str,
) -> Result<(), StepError> {
    warn!(deploy = %deploy.name, transaction = hash, "transaction reverted; failing deploy");
    deploy.phase = Phase::Failed;
    commit_step(deploy, txn, &format!("transaction {hash} reverted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_are_shouted_snake_case() {
        assert_eq!(env_key("feeRecipient"), "FEERECIPIENT");
        assert_eq!(env_key("max-supply.v2"), "MAX_SUPPLY_V2");
    }

    #[test]
    fn unknown_phase_has_no_handler() {
        let mut deploy = Deploy::for_tests("d1", "main", Vec::new());
        deploy.phase = Phase::Unknown("warp_drive".into());
        assert!(handler_for(&deploy).is_err());
        deploy.phase = Phase::Complete;
        assert!(handler_for(&deploy).is_ok());
    }
}
