//! Segments run locally with no signature.

use super::{
    PhaseHandler, commit_step, current_segment, record_outputs, script_env, skip_if_missing,
    write_evidence,
};
use crate::deploy::error::StepError;
use crate::deploy::model::{Deploy, ScriptMetadata, SegmentMetadata};
use crate::deploy::phase::{self, Phase};
use crate::deploy::session::Session;
use crate::runner::RunMode;
use crate::store::{Transaction, paths::evidence};

pub struct ScriptHandler;

impl PhaseHandler for ScriptHandler {
    fn execute(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        if deploy.phase != Phase::ScriptRun {
            return Err(StepError::halt(
                deploy,
                format!("script handler cannot run phase {}", deploy.phase),
            ));
        }
        let (index, segment) = current_segment(deploy)?;
        if skip_if_missing(deploy, &segment, txn)? {
            return Ok(());
        }

        let env = script_env(deploy, txn)?;
        let request = session.request(deploy, &segment, RunMode::Execute, &env);
        let report = session.runner.run(&request)?;
        write_evidence(deploy, index, evidence::SCRIPT_RUN, &report, txn)?;
        deploy.set_metadata(
            index,
            SegmentMetadata::Script(ScriptMetadata {
                success: report.success,
            }),
        );

        if !report.success {
            commit_step(deploy, txn, &format!("script {} failed", segment.filename))?;
            return Err(StepError::halt(
                deploy,
                format!(
                    "script {} failed{}",
                    segment.filename,
                    report
                        .error
                        .as_deref()
                        .map(|e| format!(": {e}"))
                        .unwrap_or_default()
                ),
            ));
        }

        record_outputs(deploy, index, "", &report, txn)?;
        phase::advance(deploy)?;
        commit_step(deploy, txn, &format!("ran script {}", segment.filename))
    }

    fn cancel(
        &self,
        _deploy: &mut Deploy,
        _txn: &mut Transaction<'_>,
        _session: &Session,
    ) -> Result<(), StepError> {
        Ok(())
    }
}
