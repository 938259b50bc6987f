//! Global phases: starting a deploy and closing it out.

use serde_json::{Map, Value};
use tracing::info;

use super::{PhaseHandler, commit_step};
use crate::deploy::error::StepError;
use crate::deploy::model::Deploy;
use crate::deploy::phase::{self, Phase};
use crate::deploy::session::Session;
use crate::environment;
use crate::store::{Transaction, paths};
use crate::types::{DeployedContract, StateMutation};
use crate::upgrade::UpgradeCatalog;

pub struct SystemHandler;

impl PhaseHandler for SystemHandler {
    fn execute(
        &self,
        deploy: &mut Deploy,
        txn: &mut Transaction<'_>,
        session: &Session,
    ) -> Result<(), StepError> {
        match deploy.phase {
            Phase::Initial => {
                phase::advance(deploy)?;
                commit_step(deploy, txn, "started")
            }
            Phase::Complete => finalize(deploy, txn, session),
            Phase::Failed | Phase::Cancelled => close_out(deploy, txn, session),
            _ => Err(StepError::halt(
                deploy,
                format!("system handler cannot run phase {}", deploy.phase),
            )),
        }
    }

    fn cancel(
        &self,
        deploy: &mut Deploy,
        _txn: &mut Transaction<'_>,
        _session: &Session,
    ) -> Result<(), StepError> {
        if deploy.phase.is_terminal() {
            return Err(anyhow::anyhow!("deploy {} is already {}", deploy.name, deploy.phase).into());
        }
        Ok(())
    }
}

/// Apply a completed deploy to its environment in one commit.
///
/// Mutations are folded into the parameter document, deployed contracts
/// merged into the manifest, the version bumped and the in-progress pointer
/// cleared.
pub fn finalize(
    deploy: &mut Deploy,
    txn: &mut Transaction<'_>,
    session: &Session,
) -> Result<(), StepError> {
    let env = deploy.env.clone();
    let Some(upgrade) = UpgradeCatalog::find(txn, &deploy.upgrade)? else {
        return Err(StepError::halt(
            deploy,
            format!("upgrade {} is no longer registered", deploy.upgrade),
        ));
    };

    let mutations: Vec<StateMutation> =
        txn.read_or_default(&paths::mutations(&env, &deploy.name))?;
    if !mutations.is_empty() {
        let schema: Option<Value> = {
            let doc = txn.optional_document(&paths::parameters_schema(&env))?;
            if doc.exists() { Some(doc.value()?) } else { None }
        };
        let mut parameters: Map<String, Value> = txn.read_or_default(&paths::parameters(&env))?;
        for mutation in mutations {
            if let Some(schema) = &schema {
                if let Err(reason) = check_parameter(schema, &mutation) {
                    return Err(StepError::halt(deploy, reason));
                }
            }
            parameters.insert(mutation.name, mutation.next);
        }
        txn.write(&paths::parameters(&env), &parameters)?;
    }

    let mut manifest = environment::load(txn, &env)?;
    let contracts: Vec<DeployedContract> =
        txn.read_or_default(&paths::deployed_contracts(&env, &deploy.name))?;
    for contract in contracts {
        manifest.contracts.record(contract);
    }
    let previous = manifest.deployed_version.clone();
    manifest.deployed_version = upgrade.to.clone();
    manifest.latest_deployed_commit = upgrade.commit.clone();
    txn.write(&paths::environment_manifest(&env), &manifest)?;

    environment::set_active_deploy(txn, &env, None)?;
    deploy.stamp_end(session.now());
    info!(deploy = %deploy.name, env = %env, from = %previous, to = %upgrade.to, "deploy complete");
    commit_step(
        deploy,
        txn,
        &format!("complete; {env} upgraded from {previous} to {}", upgrade.to),
    )
}

/// Clear the pointer and stamp the end time of a failed or cancelled
/// deploy. The environment is otherwise left as it was.
pub fn close_out(
    deploy: &mut Deploy,
    txn: &mut Transaction<'_>,
    session: &Session,
) -> Result<(), StepError> {
    environment::set_active_deploy(txn, &deploy.env, None)?;
    deploy.stamp_end(session.now());
    info!(deploy = %deploy.name, phase = %deploy.phase, "deploy closed");
    commit_step(deploy, txn, &format!("closed as {}", deploy.phase))
}

/// Check `mutation.next` against `properties.<name>.type` in a JSON schema.
fn check_parameter(schema: &Value, mutation: &StateMutation) -> Result<(), String> {
    let Some(expected) = schema
        .get("properties")
        .and_then(|props| props.get(&mutation.name))
        .and_then(|prop| prop.get("type"))
    else {
        return Ok(());
    };
    let allowed: Vec<&str> = match expected {
        Value::String(name) => vec![name.as_str()],
        Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
        _ => return Ok(()),
    };
    if allowed.iter().any(|name| json_type_matches(name, &mutation.next)) {
        return Ok(());
    }
    Err(format!(
        "parameter {} must be {}, got {}",
        mutation.name,
        allowed.join(" or "),
        mutation.next
    ))
}

fn json_type_matches(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => false,
    }
}
