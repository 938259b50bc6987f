//! Phase state machine.
//!
//! A deploy walks its segments in order. Each segment kind has an entry
//! phase and a fixed chain of follow-up phases; once the last phase of a
//! segment is done the machine moves to the next segment, and after the
//! final segment to `complete`. System segments have no phases of their own
//! and are stepped over.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::model::Deploy;
use crate::store::{StoreError, Transaction, paths};
use crate::types::SegmentKind;

/// Current position of a deploy within its segment's phase chain.
///
/// Strings outside the known alphabet are kept as [`Phase::Unknown`] so a
/// document written by a newer build still loads and can be reported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Phase {
    /// Freshly created; nothing has run yet.
    #[default]
    Initial,
    EoaStart,
    EoaWaitConfirm,
    MultisigStart,
    MultisigWaitSigners,
    MultisigExecute,
    MultisigWaitConfirm,
    ScriptRun,
    Complete,
    Cancelled,
    Failed,
    Unknown(String),
}

impl Phase {
    pub fn as_str(&self) -> &str {
        match self {
            Phase::Initial => "",
            Phase::EoaStart => "eoa_start",
            Phase::EoaWaitConfirm => "eoa_wait_confirm",
            Phase::MultisigStart => "multisig_start",
            Phase::MultisigWaitSigners => "multisig_wait_signers",
            Phase::MultisigExecute => "multisig_execute",
            Phase::MultisigWaitConfirm => "multisig_wait_confirm",
            Phase::ScriptRun => "script_run",
            Phase::Complete => "complete",
            Phase::Cancelled => "cancelled",
            Phase::Failed => "failed",
            Phase::Unknown(other) => other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Cancelled | Phase::Failed)
    }

    /// Segment kind whose handler owns this phase. Global phases belong to
    /// the system handler.
    pub fn segment_kind(&self) -> Option<SegmentKind> {
        match self {
            Phase::EoaStart | Phase::EoaWaitConfirm => Some(SegmentKind::Eoa),
            Phase::MultisigStart
            | Phase::MultisigWaitSigners
            | Phase::MultisigExecute
            | Phase::MultisigWaitConfirm => Some(SegmentKind::Multisig),
            Phase::ScriptRun => Some(SegmentKind::Script),
            Phase::Initial | Phase::Complete | Phase::Cancelled | Phase::Failed => {
                Some(SegmentKind::System)
            }
            Phase::Unknown(_) => None,
        }
    }

    /// First phase of a segment of `kind`; `None` for system segments.
    pub fn entry_for(kind: SegmentKind) -> Option<Phase> {
        match kind {
            SegmentKind::Eoa => Some(Phase::EoaStart),
            SegmentKind::Multisig => Some(Phase::MultisigStart),
            SegmentKind::Script => Some(Phase::ScriptRun),
            SegmentKind::System => None,
        }
    }
}

impl From<String> for Phase {
    fn from(value: String) -> Self {
        match value.as_str() {
            "" => Phase::Initial,
            "eoa_start" => Phase::EoaStart,
            "eoa_wait_confirm" => Phase::EoaWaitConfirm,
            "multisig_start" => Phase::MultisigStart,
            "multisig_wait_signers" => Phase::MultisigWaitSigners,
            "multisig_execute" => Phase::MultisigExecute,
            "multisig_wait_confirm" => Phase::MultisigWaitConfirm,
            "script_run" => Phase::ScriptRun,
            "complete" => Phase::Complete,
            "cancelled" => Phase::Cancelled,
            "failed" => Phase::Failed,
            _ => Phase::Unknown(value),
        }
    }
}

impl From<Phase> for String {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Unknown(other) => other,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Initial => f.write_str("(initial)"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error("deploy {deploy} is in unknown phase '{phase}'")]
    UnknownPhase { deploy: String, phase: String },
}

/// Move to the entry phase of the next non-system segment, or to `complete`
/// when none is left. `segment_id` is left alone on completion.
pub fn advance_segment(deploy: &mut Deploy) {
    let mut next = deploy.segment_id + 1;
    loop {
        let Some(segment) = usize::try_from(next)
            .ok()
            .and_then(|index| deploy.segments.get(index))
        else {
            deploy.phase = Phase::Complete;
            return;
        };
        if let Some(entry) = Phase::entry_for(segment.kind) {
            deploy.segment_id = next;
            deploy.phase = entry;
            return;
        }
        next += 1;
    }
}

/// Apply one transition of the phase table.
pub fn advance(deploy: &mut Deploy) -> Result<(), PhaseError> {
    let from = deploy.phase.clone();
    match &deploy.phase {
        Phase::Initial => {
            deploy.segment_id = -1;
            advance_segment(deploy);
        }
        Phase::EoaStart => deploy.phase = Phase::EoaWaitConfirm,
        Phase::MultisigStart => deploy.phase = Phase::MultisigWaitSigners,
        Phase::MultisigWaitSigners => deploy.phase = Phase::MultisigExecute,
        Phase::MultisigExecute => deploy.phase = Phase::MultisigWaitConfirm,
        Phase::EoaWaitConfirm | Phase::MultisigWaitConfirm | Phase::ScriptRun => {
            advance_segment(deploy)
        }
        Phase::Complete | Phase::Cancelled | Phase::Failed => return Ok(()),
        Phase::Unknown(phase) => {
            return Err(PhaseError::UnknownPhase {
                deploy: deploy.name.clone(),
                phase: phase.clone(),
            });
        }
    }
    info!(
        deploy = %deploy.name,
        from = %from,
        to = %deploy.phase,
        segment = deploy.segment_id,
        "phase advanced"
    );
    Ok(())
}

/// Stage the deploy record in `txn`. Nothing is committed.
pub fn persist(deploy: &Deploy, txn: &mut Transaction<'_>) -> Result<(), StoreError> {
    txn.write(&paths::deploy(&deploy.env, &deploy.name), deploy)
}
