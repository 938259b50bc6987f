//! Segments proposed to, approved by and executed through a multisig.

use serde_json::json;
use tracing::{info, warn};

use super::{
    PhaseHandler, ReceiptPoll, commit_step, current_segment, fail_on_revert, poll_receipts,
    poll_status, record_outputs, run_tests, script_env, skip_if_missing, write_evidence,
};
use crate::deploy::error::StepError;
use crate::deploy::model::{Deploy, MultisigMetadata, SegmentMetadata};
use crate::deploy::phase::{self, Phase};
use crate::deploy::session::Session;
use crate::runner::RunMode;
use crate::signing::{MultisigCancel, MultisigStrategy};
use crate::store::{Transaction, paths::evidence};

pub struct MultisigHandler;

fn strategy<'a>(
    deploy: &Deploy,
    session: &'a Session,
) -> Result<&'a dyn MultisigStrategy, StepError> {
    session.multisig.as_deref().ok_or_else(|| {
        StepError::halt(
            deploy,
            "no multisig is configured; set [multisig] service_url",
        )
    })
}

fn metadata(deploy: &Deploy, index: usize) -> Result<MultisigMetadata, StepError> {
    match deploy.metadata_at(index) {
        Some(SegmentMetadata::Multisig(meta)) => Ok(meta.clone()),
        _ => Err(StepError::halt(
            deploy,
            format!("segment {index} has no multisig metadata"),
        )),
    }
}

/// Proposal hash, halting if the proposal never produced one.
fn proposal_hash(deploy: &Deploy, meta: &MultisigMetadata) -> Result<String, StepError> {
    meta.safe_tx_hash
        .clone()
        .ok_or_else(|| StepError::halt(deploy, "multisig proposal has no safeTxHash"))
}

impl MultisigHandler {
    fn start(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        let (index, segment) = current_segment(deploy)?;
        if skip_if_missing(deploy, &segment, txn)? {
            return Ok(());
        }
        run_tests(deploy, index, &segment, txn, session)?;

        let multisig = strategy(deploy, session)?;
        let env = script_env(deploy, txn)?;
        let request = session.request(deploy, &segment, RunMode::Propose, &env);
        let proposal = multisig.propose(session.runner.as_ref(), request)?;
        write_evidence(deploy, index, evidence::MULTISIG_RUN, &proposal.output, txn)?;

        let deployments = record_outputs(deploy, index, &proposal.signer, &proposal.output, txn)?;
        let empty = proposal.safe_tx_hash.is_none();
        info!(
            deploy = %deploy.name,
            segment = index,
            safe = %proposal.safe_address,
            safe_tx_hash = ?proposal.safe_tx_hash,
            "multisig proposal submitted"
        );
        deploy.set_metadata(
            index,
            SegmentMetadata::Multisig(MultisigMetadata {
                signer: proposal.signer,
                safe_address: proposal.safe_address,
                safe_tx_hash: proposal.safe_tx_hash,
                confirmed: empty,
                ..MultisigMetadata::default()
            }),
        );
        if !deployments.is_empty() {
            info!(deploy = %deploy.name, count = deployments.len(), "proposal deploys contracts");
        }

        if empty {
            phase::advance_segment(deploy);
            commit_step(deploy, txn, &format!("segment {index} had nothing to propose"))
        } else {
            phase::advance(deploy)?;
            commit_step(deploy, txn, &format!("segment {index} proposed to multisig"))
        }
    }

    fn wait_signers(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        let (index, _) = current_segment(deploy)?;
        let meta = metadata(deploy, index)?;
        let hash = proposal_hash(deploy, &meta)?;
        let multisig = strategy(deploy, session)?;
        let (status, met) = poll_status(
            session,
            || multisig.approvals(&meta.safe_address, &hash),
            |status| status.is_met(),
        )?;
        if !met {
            return Err(StepError::pause(
                deploy,
                format!(
                    "{} of {} multisig approvals collected for {hash} after {} checks",
                    status.confirmations, status.threshold, session.poll.attempts.max(1)
                ),
            ));
        }
        phase::advance(deploy)?;
        commit_step(
            deploy,
            txn,
            &format!(
                "segment {index} approved ({}/{})",
                status.confirmations, status.threshold
            ),
        )
    }

    fn execute_proposal(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        let (index, _) = current_segment(deploy)?;
        let meta = metadata(deploy, index)?;
        let hash = proposal_hash(deploy, &meta)?;
        let multisig = strategy(deploy, session)?;
        let (status, executed) = poll_status(
            session,
            || multisig.execution(&meta.safe_address, &hash),
            |status| status.executed,
        )?;
        if !executed {
            return Err(StepError::pause(
                deploy,
                format!(
                    "multisig transaction {hash} is approved but not executed after {} checks",
                    session.poll.attempts.max(1)
                ),
            ));
        }
        write_evidence(deploy, index, evidence::MULTISIG_EXECUTE, &status, txn)?;
        if let Some(meta) = deploy.multisig_metadata_mut(index) {
            meta.transaction_hash = status.transaction_hash.clone();
        }
        phase::advance(deploy)?;
        commit_step(deploy, txn, &format!("segment {index} executed"))
    }

    fn wait_confirm(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        let (index, _) = current_segment(deploy)?;
        let meta = metadata(deploy, index)?;
        let hashes: Vec<String> = meta.transaction_hash.iter().cloned().collect();
        match poll_receipts(deploy, &hashes, session)? {
            ReceiptPoll::Mined(receipts) => {
                write_evidence(deploy, index, evidence::CONFIRMED_TRANSACTIONS, &receipts, txn)?;
                if let Some(meta) = deploy.multisig_metadata_mut(index) {
                    meta.confirmed = true;
                }
                phase::advance(deploy)?;
                commit_step(deploy, txn, &format!("segment {index} confirmed"))
            }
            ReceiptPoll::Reverted(hash) => fail_on_revert(deploy, txn, &hash),
            ReceiptPoll::Pending(_) => Err(StepError::pause(
                deploy,
                format!(
                    "multisig execution {} still pending after {} checks",
                    hashes.join(", "),
                    session.poll.attempts.max(1)
                ),
            )),
        }
    }
}

impl PhaseHandler for MultisigHandler {
    fn execute(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        match deploy.phase {
            Phase::MultisigStart => self.start(deploy, txn, session),
            Phase::MultisigWaitSigners => self.wait_signers(deploy, txn, session),
            Phase::MultisigExecute => self.execute_proposal(deploy, txn, session),
            Phase::MultisigWaitConfirm => self.wait_confirm(deploy, txn, session),
            _ => Err(StepError::halt(
                deploy,
                format!("multisig handler cannot run phase {}", deploy.phase),
            )),
        }
    }

    /// Reject an outstanding proposal that has not been executed.
    fn cancel(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        let Some(index) = deploy.segment_index() else {
            return Ok(());
        };
        let Some(SegmentMetadata::Multisig(meta)) = deploy.metadata_at(index).cloned() else {
            return Ok(());
        };
        let Some(hash) = meta.safe_tx_hash.clone() else {
            return Ok(());
        };
        if meta.transaction_hash.is_some() {
            warn!(deploy = %deploy.name, safe_tx_hash = %hash, "proposal already executed; nothing to reject");
            return Ok(());
        }

        match strategy(deploy, session)?.cancel(&meta.safe_address, &hash)? {
            MultisigCancel::Rejected {
                safe_tx_hash,
                transaction_hash,
            } => {
                write_evidence(
                    deploy,
                    index,
                    evidence::MULTISIG_CANCEL,
                    &json!({
                        "proposal": hash,
                        "rejection": safe_tx_hash,
                        "transactionHash": transaction_hash,
                    }),
                    txn,
                )?;
                if let Some(meta) = deploy.multisig_metadata_mut(index) {
                    meta.cancellation_transaction_hash = Some(safe_tx_hash);
                }
                Ok(())
            }
            MultisigCancel::Unsupported(reason) if session.options.force_cancel => {
                warn!(
                    deploy = %deploy.name,
                    safe_tx_hash = %hash,
                    %reason,
                    "proposal left open; reject it from the multisig before reusing its nonce"
                );
                write_evidence(
                    deploy,
                    index,
                    evidence::MULTISIG_CANCEL,
                    &json!({
                        "proposal": hash,
                        "rejection": null,
                        "pendingWithOperator": reason,
                    }),
                    txn,
                )
            }
            MultisigCancel::Unsupported(reason) => Err(StepError::halt(
                deploy,
                format!(
                    "cannot cancel multisig proposal {hash}: {reason}; \
                     reject it from the multisig and rerun with --force"
                ),
            )),
        }
    }
}
