//! Configuration layer merging
//!
//! The project file overrides the global file key by key. Signers are merged
//! by id, so a project can add signers to the ones a user keeps globally.

use super::schema::StagehandConfig;

/// Merge the global and project layers into the effective configuration.
pub fn merge_configs(
    global: Option<StagehandConfig>,
    project: Option<StagehandConfig>,
) -> anyhow::Result<StagehandConfig> {
    let mut merged = global.unwrap_or_default();
    if let Some(project) = project {
        merge_layer(&mut merged, project);
    }
    merged.validate()?;
    Ok(merged)
}

fn merge_layer(base: &mut StagehandConfig, layer: StagehandConfig) {
    overlay(&mut base.upgrades_dir, layer.upgrades_dir);

    overlay(&mut base.store.backend, layer.store.backend);
    overlay(&mut base.store.path, layer.store.path);
    overlay(&mut base.store.branch, layer.store.branch);

    overlay(&mut base.lock.ttl_secs, layer.lock.ttl_secs);
    overlay(&mut base.lock.holder, layer.lock.holder);

    overlay(&mut base.poll.attempts, layer.poll.attempts);
    overlay(&mut base.poll.delay_secs, layer.poll.delay_secs);

    overlay(&mut base.runner.command, layer.runner.command);
    overlay(&mut base.runner.test_command, layer.runner.test_command);

    overlay(&mut base.chain.rpc_url, layer.chain.rpc_url);

    overlay(&mut base.multisig.service_url, layer.multisig.service_url);
    overlay(&mut base.multisig.proposer, layer.multisig.proposer);

    base.signers.extend(layer.signers);
}

fn overlay<T>(base: &mut Option<T>, layer: Option<T>) {
    if layer.is_some() {
        *base = layer;
    }
}
