//! Persisted deploy records.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::phase::Phase;
use crate::types::{DeployedContract, SegmentKind};
use crate::upgrade::Upgrade;

/// One step of a deploy, instantiated from an upgrade phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: usize,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EoaMetadata {
    pub signer: String,
    #[serde(default)]
    pub transactions: Vec<String>,
    #[serde(default)]
    pub deployments: Vec<DeployedContract>,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultisigMetadata {
    pub signer: String,
    pub safe_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_tx_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_transaction_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptMetadata {
    pub success: bool,
}

/// Evidence recorded for a segment, tagged by segment kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SegmentMetadata {
    Eoa(EoaMetadata),
    Multisig(MultisigMetadata),
    Script(ScriptMetadata),
}

/// `deploys/{env}/{name}/deploy.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deploy {
    pub name: String,
    pub env: String,
    pub upgrade: String,
    pub chain_id: u64,
    pub upgrade_path: PathBuf,
    #[serde(default)]
    pub phase: Phase,
    /// Index of the current segment; `-1` before the first one starts.
    pub segment_id: i64,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub metadata: Vec<Option<SegmentMetadata>>,
    pub start_time: String,
    pub start_timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_timestamp: Option<i64>,
}

impl Deploy {
    /// Instantiate a deploy of `upgrade` against `env`, named after the
    /// start minute and the upgrade.
    pub fn new(
        env: &str,
        chain_id: u64,
        upgrade: &Upgrade,
        upgrade_path: PathBuf,
        now: DateTime<Utc>,
    ) -> Self {
        let segments = upgrade
            .phases
            .iter()
            .enumerate()
            .map(|(id, phase)| Segment {
                id,
                kind: phase.kind,
                filename: phase.filename.clone(),
                arguments: phase.arguments.clone(),
            })
            .collect();
        Self {
            name: format!("{}-{}", now.format("%Y-%m-%d-%H-%M"), upgrade.name),
            env: env.to_string(),
            upgrade: upgrade.name.clone(),
            chain_id,
            upgrade_path,
            phase: Phase::Initial,
            segment_id: -1,
            segments,
            metadata: Vec::new(),
            start_time: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            start_timestamp: now.timestamp_millis(),
            end_time: None,
            end_timestamp: None,
        }
    }

    /// Index of the current segment, if one has started.
    pub fn segment_index(&self) -> Option<usize> {
        usize::try_from(self.segment_id).ok()
    }

    pub fn current_segment(&self) -> Option<&Segment> {
        self.segment_index().and_then(|index| self.segments.get(index))
    }

    /// Absolute path of a segment's script.
    pub fn script_path(&self, segment: &Segment) -> PathBuf {
        self.upgrade_path.join(&segment.filename)
    }

    pub fn metadata_at(&self, index: usize) -> Option<&SegmentMetadata> {
        self.metadata.get(index).and_then(Option::as_ref)
    }

    pub fn set_metadata(&mut self, index: usize, metadata: SegmentMetadata) {
        if self.metadata.len() <= index {
            self.metadata.resize(index + 1, None);
        }
        self.metadata[index] = Some(metadata);
    }

    pub fn eoa_metadata_mut(&mut self, index: usize) -> Option<&mut EoaMetadata> {
        match self.metadata.get_mut(index) {
            Some(Some(SegmentMetadata::Eoa(meta))) => Some(meta),
            _ => None,
        }
    }

    pub fn multisig_metadata_mut(&mut self, index: usize) -> Option<&mut MultisigMetadata> {
        match self.metadata.get_mut(index) {
            Some(Some(SegmentMetadata::Multisig(meta))) => Some(meta),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end_timestamp.is_some()
    }

    pub fn stamp_end(&mut self, now: DateTime<Utc>) {
        self.end_time = Some(now.to_rfc3339_opts(SecondsFormat::Millis, true));
        self.end_timestamp = Some(now.timestamp_millis());
    }

    /// Command an operator runs to pick this deploy back up.
    pub fn resume_command(&self) -> String {
        format!("stagehand deploy run --resume --env {}", self.env)
    }

    #[cfg(test)]
    pub(crate) fn for_tests(name: &str, env: &str, segments: Vec<Segment>) -> Self {
        Self {
            name: name.to_string(),
            env: env.to_string(),
            upgrade: "test-upgrade".to_string(),
            chain_id: 1,
            upgrade_path: PathBuf::from("upgrades/test-upgrade"),
            phase: Phase::Initial,
            segment_id: -1,
            segments,
            metadata: Vec::new(),
            start_time: "2024-01-01T00:00:00.000Z".to_string(),
            start_timestamp: 1_704_067_200_000,
            end_time: None,
            end_timestamp: None,
        }
    }
}
