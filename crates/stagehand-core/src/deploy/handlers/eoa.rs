//! Segments signed and broadcast by a single externally-owned account.

use tracing::info;

use super::{
    PhaseHandler, ReceiptPoll, commit_step, current_segment, fail_on_revert, poll_receipts,
    record_outputs, run_tests, script_env, skip_if_missing, write_evidence,
};
use crate::deploy::error::StepError;
use crate::deploy::model::{Deploy, EoaMetadata, SegmentMetadata};
use crate::deploy::phase::{self, Phase};
use crate::deploy::session::Session;
use crate::runner::RunMode;
use crate::store::{Transaction, paths::evidence};

pub struct EoaHandler;

impl EoaHandler {
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

        let signer = session.signer()?;
        let env = script_env(deploy, txn)?;
        let request = session.request(deploy, &segment, RunMode::Broadcast, &env);
        let result = signer.request_new(session.runner.as_ref(), request)?;
        write_evidence(deploy, index, evidence::EOA_RUN, &result.output, txn)?;

        if !result.ready {
            commit_step(deploy, txn, &format!("signing failed for segment {index}"))?;
            return Err(StepError::halt(
                deploy,
                format!(
                    "signer {} did not sign {}{}",
                    signer.id(),
                    segment.filename,
                    result
                        .output
                        .error
                        .as_deref()
                        .map(|e| format!(": {e}"))
                        .unwrap_or_default()
                ),
            ));
        }

        let deployments = record_outputs(deploy, index, &result.signer, &result.output, txn)?;
        let transactions = result.output.transactions.clone();
        let nothing_sent = transactions.is_empty();
        info!(
            deploy = %deploy.name,
            segment = index,
            signer = %result.signer,
            transactions = transactions.len(),
            "segment signed"
        );
        deploy.set_metadata(
            index,
            SegmentMetadata::Eoa(EoaMetadata {
                signer: result.signer,
                transactions,
                deployments,
                confirmed: nothing_sent,
            }),
        );

        if nothing_sent {
            phase::advance_segment(deploy);
            commit_step(deploy, txn, &format!("segment {index} signed; no transactions"))
        } else {
            phase::advance(deploy)?;
            commit_step(deploy, txn, &format!("segment {index} signed and broadcast"))
        }
    }

    fn wait_confirm(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        let (index, _) = current_segment(deploy)?;
        let Some(SegmentMetadata::Eoa(meta)) = deploy.metadata_at(index).cloned() else {
            return Err(StepError::halt(
                deploy,
                format!("segment {index} has no EOA metadata to confirm"),
            ));
        };

        match poll_receipts(deploy, &meta.transactions, session)? {
            ReceiptPoll::Mined(receipts) => {
                write_evidence(deploy, index, evidence::CONFIRMED_TRANSACTIONS, &receipts, txn)?;
                if let Some(meta) = deploy.eoa_metadata_mut(index) {
                    meta.confirmed = true;
                }
                phase::advance(deploy)?;
                commit_step(deploy, txn, &format!("segment {index} confirmed"))
            }
            ReceiptPoll::Reverted(hash) => fail_on_revert(deploy, txn, &hash),
            ReceiptPoll::Pending(count) => Err(StepError::pause(
                deploy,
                format!(
                    "{count} of {} transactions still pending after {} checks",
                    meta.transactions.len(),
                    session.poll.attempts
                ),
            )),
        }
    }
}

impl PhaseHandler for EoaHandler {
    fn execute(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        match deploy.phase {
            Phase::EoaStart => self.start(deploy, txn, session),
            Phase::EoaWaitConfirm => self.wait_confirm(deploy, txn, session),
            _ => Err(StepError::halt(
                deploy,
                format!("EOA handler cannot run phase {}", deploy.phase),
            )),
        }
    }

    fn cancel(
        &self,
        deploy: &mut Deploy,
        _txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        for signer in &session.signers {
            signer.cancel(&deploy.name)?;
        }
        Ok(())
    }
}
